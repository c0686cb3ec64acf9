//! Reference transaction assembly engine.
//!
//! [`NativeEngine`] implements [`AssemblyEngine`] over the core transaction
//! format. Selection is deterministic: required coins first, then the
//! smallest single coin that closes the remaining gap, falling back to the
//! largest coin when none does. Fees are estimated from the serialized size
//! of a draft carrying placeholder signatures, so a signed build pays for the
//! bytes it will actually have.

mod policy;

pub use policy::EnginePolicy;

use std::collections::HashMap;

use rand::seq::SliceRandom;
use tracing::{debug, warn};

use coinsmith_core::coin::PoolCoin;
use coinsmith_core::crypto::{KeyPair, sign_transaction_input};
use coinsmith_core::error::{EngineError, PolicyViolation};
use coinsmith_core::fee::FeeRate;
use coinsmith_core::script::{MultisigDescriptor, Script};
use coinsmith_core::traits::{AssemblyEngine, EngineFactory};
use coinsmith_core::types::{Hash256, InputSignature, OutPoint, Transaction, TxInput, TxOutput};

/// Upper bound on fee/size fixed-point iterations.
const MAX_FEE_ROUNDS: usize = 10;

/// In-process assembly engine for one build.
#[derive(Debug, Default)]
pub struct NativeEngine {
    policy: EnginePolicy,
    pool: Vec<PoolCoin>,
    required: Vec<OutPoint>,
    keys: Vec<KeyPair>,
    outputs: Vec<TxOutput>,
    change: Option<Script>,
    fee: u64,
    shuffle: bool,
}

impl NativeEngine {
    pub fn new(policy: EnginePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    fn output_total(&self) -> Result<u64, EngineError> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.value))
            .ok_or(EngineError::ValueOverflow)
    }

    /// Coins covering `target`, or the exact shortfall of the whole pool.
    fn select(&self, target: u64) -> Result<Vec<&PoolCoin>, EngineError> {
        let mut chosen: Vec<&PoolCoin> = Vec::with_capacity(self.required.len());
        for op in &self.required {
            let coin = self
                .pool
                .iter()
                .find(|c| &c.outpoint == op)
                .ok_or_else(|| EngineError::UnknownRequiredInput(op.clone()))?;
            chosen.push(coin);
        }
        let mut sum = chosen.iter().fold(0u64, |acc, c| acc.saturating_add(c.amount));

        let mut remaining: Vec<&PoolCoin> = self
            .pool
            .iter()
            .filter(|c| !self.required.contains(&c.outpoint))
            .collect();
        remaining.sort_by(|a, b| b.amount.cmp(&a.amount).then(a.outpoint.cmp(&b.outpoint)));

        while sum < target {
            let gap = target - sum;
            let pick = match remaining.iter().rposition(|c| c.amount >= gap) {
                Some(pos) => pos,
                None if remaining.is_empty() => {
                    return Err(EngineError::InsufficientFunds { missing: gap });
                }
                None => 0,
            };
            let coin = remaining.remove(pick);
            sum = sum.saturating_add(coin.amount);
            chosen.push(coin);
        }
        Ok(chosen)
    }

    /// The transaction shape for `coins`, unsigned, with `change` appended.
    fn draft(&self, coins: &[&PoolCoin], change: Option<u64>) -> Transaction {
        let inputs = coins
            .iter()
            .map(|c| TxInput {
                previous_output: c.outpoint.clone(),
                signatures: Vec::new(),
                redeem_script: c.redeem_script.clone(),
            })
            .collect();
        let mut outputs = self.outputs.clone();
        if let Some(value) = change {
            outputs.push(TxOutput {
                value,
                script_pubkey: self
                    .change
                    .clone()
                    .unwrap_or_else(|| Script::p2pkh(&Hash256::ZERO)),
            });
        }
        Transaction {
            inputs,
            outputs,
            ..Transaction::new()
        }
    }

    /// Serialized size of `tx` once every input carries its signatures.
    fn signed_size(&self, mut tx: Transaction) -> Result<usize, EngineError> {
        for input in &mut tx.inputs {
            let count = match &input.redeem_script {
                Some(rs) => MultisigDescriptor::from_redeem_script(rs)?.threshold() as usize,
                None => 1,
            };
            input.signatures = vec![
                InputSignature {
                    public_key: vec![0; 32],
                    signature: vec![0; 64],
                };
                count
            ];
        }
        tx.size()
    }

    fn change_value(&self, sum: u64, target: u64) -> Option<u64> {
        let leftover = sum.saturating_sub(target);
        (leftover >= self.policy.dust_threshold).then_some(leftover)
    }

    fn sign_inputs(&self, tx: &mut Transaction) -> Result<(), EngineError> {
        let coins: HashMap<&OutPoint, &PoolCoin> =
            self.pool.iter().map(|c| (&c.outpoint, c)).collect();
        for index in 0..tx.inputs.len() {
            let Some(coin) = coins.get(&tx.inputs[index].previous_output) else {
                continue;
            };
            let signers: Vec<&KeyPair> = match &coin.redeem_script {
                Some(rs) => {
                    let descriptor = MultisigDescriptor::from_redeem_script(rs)?;
                    self.keys
                        .iter()
                        .filter(|k| descriptor.contains(&k.public_key()))
                        .collect()
                }
                None => {
                    let owner = coin.script_pubkey.pubkey_hash();
                    self.keys
                        .iter()
                        .filter(|k| Some(k.public_key().pubkey_hash()) == owner)
                        .take(1)
                        .collect()
                }
            };
            if signers.is_empty() {
                debug!(index, outpoint = %coin.outpoint, "no local key for input");
            }
            for key in signers {
                sign_transaction_input(tx, index, key)?;
            }
        }
        Ok(())
    }
}

impl AssemblyEngine for NativeEngine {
    fn add_coins(&mut self, coins: Vec<PoolCoin>) {
        for coin in coins {
            if !self.pool.iter().any(|c| c.outpoint == coin.outpoint) {
                self.pool.push(coin);
            }
        }
    }

    fn require_input(&mut self, outpoint: OutPoint) {
        if !self.required.contains(&outpoint) {
            self.required.push(outpoint);
        }
    }

    fn add_keys(&mut self, keys: Vec<KeyPair>) {
        for key in keys {
            let pk = key.public_key();
            if !self.keys.iter().any(|k| k.public_key() == pk) {
                self.keys.push(key);
            }
        }
    }

    fn send(&mut self, script_pubkey: Script, amount: u64) {
        self.outputs.push(TxOutput {
            value: amount,
            script_pubkey,
        });
    }

    fn set_change(&mut self, script_pubkey: Script) {
        self.change = Some(script_pubkey);
    }

    fn send_fees(&mut self, fee: u64) {
        self.fee = fee;
    }

    fn shuffle(&mut self) {
        self.shuffle = true;
    }

    fn estimate_fees(&self, rate: FeeRate) -> Result<u64, EngineError> {
        let outputs = self.output_total()?;
        converge_fee(|fee| {
            let target = outputs.checked_add(fee).ok_or(EngineError::ValueOverflow)?;
            let coins = match self.select(target) {
                Ok(coins) => coins,
                // Price the whole pool; assembly reports the shortfall.
                Err(EngineError::InsufficientFunds { .. }) => self.pool.iter().collect(),
                Err(e) => return Err(e),
            };
            let sum = coins.iter().fold(0u64, |acc, c| acc.saturating_add(c.amount));
            let change = self.change_value(sum, target);
            let size = self.signed_size(self.draft(&coins, change))?;
            Ok(rate.fee_for(size))
        })
    }

    fn assemble(&mut self, sign: bool) -> Result<Transaction, EngineError> {
        let target = self
            .output_total()?
            .checked_add(self.fee)
            .ok_or(EngineError::ValueOverflow)?;
        let coins = self.select(target)?;
        let sum = coins.iter().fold(0u64, |acc, c| acc.saturating_add(c.amount));

        let change = self.change_value(sum, target);
        if change.is_some() && self.change.is_none() {
            return Err(EngineError::MissingChangeScript);
        }
        let mut tx = self.draft(&coins, change);

        if self.shuffle {
            let mut rng = rand::thread_rng();
            tx.inputs.shuffle(&mut rng);
            tx.outputs.shuffle(&mut rng);
        }
        if sign {
            self.sign_inputs(&mut tx)?;
        }

        debug!(
            inputs = tx.inputs.len(),
            outputs = tx.outputs.len(),
            fee = sum.saturating_sub(tx.total_output_value().unwrap_or(sum)),
            sign,
            "transaction assembled"
        );
        Ok(tx)
    }

    fn verify(&self, tx: &Transaction) -> Result<(), Vec<PolicyViolation>> {
        let coins: HashMap<OutPoint, PoolCoin> = self
            .pool
            .iter()
            .map(|c| (c.outpoint.clone(), c.clone()))
            .collect();
        let violations = self.policy.check(tx, &coins);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

/// Hands out [`NativeEngine`]s sharing one policy.
#[derive(Debug, Clone, Default)]
pub struct NativeEngineFactory {
    policy: EnginePolicy,
}

impl NativeEngineFactory {
    pub fn new(policy: EnginePolicy) -> Self {
        Self { policy }
    }
}

impl EngineFactory for NativeEngineFactory {
    fn create(&self) -> Box<dyn AssemblyEngine> {
        Box::new(NativeEngine::new(self.policy.clone()))
    }
}

/// Re-price from a zero fee until the fee `price` demands stops growing.
///
/// Gives up after [`MAX_FEE_ROUNDS`] with the last fee demanded.
fn converge_fee(
    mut price: impl FnMut(u64) -> Result<u64, EngineError>,
) -> Result<u64, EngineError> {
    let mut fee = 0u64;
    for _ in 0..MAX_FEE_ROUNDS {
        let needed = price(fee)?;
        if needed <= fee {
            return Ok(fee);
        }
        fee = needed;
    }
    warn!(fee, rounds = MAX_FEE_ROUNDS, "fee estimate did not settle");
    Ok(fee)
}
