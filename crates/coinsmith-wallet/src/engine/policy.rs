//! Standardness policy applied by [`NativeEngine::verify`](super::NativeEngine).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use coinsmith_core::coin::PoolCoin;
use coinsmith_core::constants::{
    DEFAULT_ABSURD_FEE, DEFAULT_DUST_THRESHOLD, DEFAULT_MAX_TX_SIZE, DEFAULT_MIN_RELAY_FEE_PER_KB,
};
use coinsmith_core::crypto::{PublicKey, verify_input_signature};
use coinsmith_core::error::PolicyViolation;
use coinsmith_core::fee::FeeRate;
use coinsmith_core::script::MultisigDescriptor;
use coinsmith_core::types::{OutPoint, Transaction};

/// Limits a transaction must respect to be accepted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EnginePolicy {
    /// Outputs below this value (other than OP_RETURN) are rejected, and
    /// leftover below it is folded into the fee instead of becoming change.
    pub dust_threshold: u64,
    /// Largest accepted serialized size in bytes.
    pub max_tx_size: usize,
    /// Minimum fee rate for relay.
    pub min_relay_fee: FeeRate,
    /// Fees above this are assumed to be mistakes.
    pub absurd_fee: u64,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            dust_threshold: DEFAULT_DUST_THRESHOLD,
            max_tx_size: DEFAULT_MAX_TX_SIZE,
            min_relay_fee: FeeRate::from_per_kb(DEFAULT_MIN_RELAY_FEE_PER_KB),
            absurd_fee: DEFAULT_ABSURD_FEE,
        }
    }
}

impl EnginePolicy {
    /// Every way `tx` breaks policy, given the coins it may spend.
    pub fn check(&self, tx: &Transaction, coins: &HashMap<OutPoint, PoolCoin>) -> Vec<PolicyViolation> {
        let mut violations = Vec::new();

        if tx.inputs.is_empty() {
            violations.push(PolicyViolation::NoInputs);
        }
        if tx.outputs.is_empty() {
            violations.push(PolicyViolation::NoOutputs);
        }

        let mut seen = HashSet::new();
        let mut input_total: u64 = 0;
        for (index, input) in tx.inputs.iter().enumerate() {
            if !seen.insert(&input.previous_output) {
                violations.push(PolicyViolation::DuplicateInput(input.previous_output.clone()));
                continue;
            }
            let Some(coin) = coins.get(&input.previous_output) else {
                violations.push(PolicyViolation::UnknownInput { index });
                continue;
            };
            input_total = input_total.saturating_add(coin.amount);

            if coin.redeem_script != input.redeem_script {
                violations.push(PolicyViolation::RedeemScriptMismatch { index });
                continue;
            }
            if let Some(v) = check_signatures(tx, index, coin) {
                violations.push(v);
            }
        }

        for (index, output) in tx.outputs.iter().enumerate() {
            if !output.script_pubkey.is_op_return() && output.value < self.dust_threshold {
                violations.push(PolicyViolation::DustOutput {
                    index,
                    value: output.value,
                    threshold: self.dust_threshold,
                });
            }
        }

        let size = tx.size().unwrap_or(usize::MAX);
        match tx.total_output_value() {
            Some(output_total) if output_total <= input_total => {
                let fee = input_total - output_total;
                let minimum = self.min_relay_fee.fee_for(size);
                if fee < minimum {
                    violations.push(PolicyViolation::FeeTooLow { fee, minimum });
                }
                if fee > self.absurd_fee {
                    violations.push(PolicyViolation::AbsurdFee {
                        fee,
                        maximum: self.absurd_fee,
                    });
                }
            }
            output_total => violations.push(PolicyViolation::InputsBelowOutputs {
                inputs: input_total,
                outputs: output_total.unwrap_or(u64::MAX),
            }),
        }

        if size > self.max_tx_size {
            violations.push(PolicyViolation::Oversized {
                size,
                max: self.max_tx_size,
            });
        }

        violations
    }
}

fn check_signatures(tx: &Transaction, index: usize, coin: &PoolCoin) -> Option<PolicyViolation> {
    let signatures = &tx.inputs[index].signatures;
    if signatures.is_empty() {
        return Some(PolicyViolation::MissingSignature { index });
    }

    match &coin.redeem_script {
        Some(redeem) => {
            let Ok(descriptor) = MultisigDescriptor::from_redeem_script(redeem) else {
                return Some(PolicyViolation::RedeemScriptMismatch { index });
            };
            if coin.script_pubkey != descriptor.script_pubkey() {
                return Some(PolicyViolation::RedeemScriptMismatch { index });
            }
            let mut signers: HashSet<PublicKey> = HashSet::new();
            for sig in signatures {
                match verify_input_signature(tx, index, sig) {
                    Ok(pk) if descriptor.contains(&pk) => {
                        signers.insert(pk);
                    }
                    _ => return Some(PolicyViolation::InvalidSignature { index }),
                }
            }
            let need = descriptor.threshold() as usize;
            (signers.len() < need).then_some(PolicyViolation::NotEnoughSignatures {
                index,
                have: signers.len(),
                need,
            })
        }
        None => {
            let owner = coin.script_pubkey.pubkey_hash();
            let valid = signatures.len() == 1
                && verify_input_signature(tx, index, &signatures[0])
                    .is_ok_and(|pk| Some(pk.pubkey_hash()) == owner);
            (!valid).then_some(PolicyViolation::InvalidSignature { index })
        }
    }
}
