//! Trait interfaces between the transaction builder and its collaborators.
//!
//! - [`UtxoIndex`]: spendable coins and change addresses (wallet side)
//! - [`FeePolicy`]: fee rates by confirmation target
//! - [`AssemblyEngine`]: assembles, signs and verifies one transaction
//! - [`EngineFactory`]: hands out a fresh engine per build

use crate::coin::{MultisigCoin, PoolCoin, SpendableCoin, WalletCoin};
use crate::crypto::KeyPair;
use crate::error::{EngineError, IndexError, PolicyViolation};
use crate::fee::FeeRate;
use crate::script::{MultisigDescriptor, Script};
use crate::types::{AccountRef, OutPoint, Transaction};

/// Read access to the wallet's unspent outputs.
///
/// Implementations are shared between concurrent builds and must be safe
/// for concurrent reads.
pub trait UtxoIndex: Send + Sync {
    /// Spendable single-key coins of an account with at least `min_confirmations`.
    fn spendable_outputs(
        &self,
        account: &AccountRef,
        min_confirmations: u32,
    ) -> Result<Vec<WalletCoin>, IndexError>;

    /// Spendable coins locked to `descriptor`'s script.
    fn spendable_multisig_outputs(
        &self,
        descriptor: &MultisigDescriptor,
        min_confirmations: u32,
    ) -> Result<Vec<MultisigCoin>, IndexError>;

    /// An unused change script for the account, derived if none is pending.
    ///
    /// Repeated calls return the same script until it receives funds.
    fn change_script(&self, account: &AccountRef) -> Result<Script, IndexError>;

    /// Total of [`spendable_outputs`](Self::spendable_outputs).
    fn spendable_balance(
        &self,
        account: &AccountRef,
        min_confirmations: u32,
    ) -> Result<u64, IndexError> {
        Ok(self
            .spendable_outputs(account, min_confirmations)?
            .iter()
            .fold(0u64, |acc, c| acc.saturating_add(c.amount())))
    }
}

/// Source of fee rates.
pub trait FeePolicy: Send + Sync {
    /// Rate expected to confirm within `confirmation_target` blocks.
    fn fee_rate(&self, confirmation_target: u32) -> FeeRate;
}

/// Assembles one transaction from a coin pool and output requests.
///
/// An engine instance belongs to a single build: inputs are registered,
/// then [`assemble`](Self::assemble) performs final coin selection, adds
/// change, and optionally signs.
pub trait AssemblyEngine: Send {
    /// Add candidate coins. The engine picks the subset it spends.
    fn add_coins(&mut self, coins: Vec<PoolCoin>);

    /// Force a pooled coin to be spent.
    fn require_input(&mut self, outpoint: OutPoint);

    /// Register signing credentials.
    fn add_keys(&mut self, keys: Vec<KeyPair>);

    /// Request an output. Outputs keep registration order.
    fn send(&mut self, script_pubkey: Script, amount: u64);

    /// Destination for leftover value.
    fn set_change(&mut self, script_pubkey: Script);

    /// Absolute fee the transaction must pay.
    fn send_fees(&mut self, fee: u64);

    /// Randomize input and output order at assembly time.
    fn shuffle(&mut self);

    /// Fee the current request would pay at `rate`, including a change
    /// output if one would be created.
    fn estimate_fees(&self, rate: FeeRate) -> Result<u64, EngineError>;

    /// Select coins and build the transaction.
    ///
    /// Fails with [`EngineError::InsufficientFunds`] carrying the exact
    /// shortfall when the pool cannot cover outputs plus fee.
    fn assemble(&mut self, sign: bool) -> Result<Transaction, EngineError>;

    /// Check a transaction against engine policy, returning every violation.
    fn verify(&self, tx: &Transaction) -> Result<(), Vec<PolicyViolation>>;
}

/// Creates fresh, disposable engines.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Box<dyn AssemblyEngine>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Hash256;

    struct FixedIndex {
        coins: Vec<WalletCoin>,
    }

    impl UtxoIndex for FixedIndex {
        fn spendable_outputs(&self, _: &AccountRef, min_conf: u32) -> Result<Vec<WalletCoin>, IndexError> {
            Ok(self
                .coins
                .iter()
                .filter(|c| c.confirmations >= min_conf)
                .cloned()
                .collect())
        }

        fn spendable_multisig_outputs(
            &self,
            _: &MultisigDescriptor,
            _: u32,
        ) -> Result<Vec<MultisigCoin>, IndexError> {
            Ok(Vec::new())
        }

        fn change_script(&self, _: &AccountRef) -> Result<Script, IndexError> {
            Ok(Script::p2pkh(&Hash256::ZERO))
        }
    }

    #[test]
    fn default_balance_respects_confirmations() {
        let index = FixedIndex {
            coins: vec![
                WalletCoin::new(OutPoint::new(Hash256([1; 32]), 0), 300, Hash256::ZERO, 0),
                WalletCoin::new(OutPoint::new(Hash256([2; 32]), 0), 700, Hash256::ZERO, 6),
            ],
        };
        let account = AccountRef::new("w", "a");
        assert_eq!(index.spendable_balance(&account, 0).unwrap(), 1000);
        assert_eq!(index.spendable_balance(&account, 1).unwrap(), 700);
    }
}
