//! Spendable coins as seen by the wallet index and the assembly engine.
//!
//! The index hands out two flavors of coin: [`WalletCoin`] locked to one of
//! the wallet's own keys, and [`MultisigCoin`] locked to a
//! [`MultisigDescriptor`]. Both implement [`SpendableCoin`], which is all the
//! coin gate needs, and both flatten into a [`PoolCoin`] for the engine.

use serde::{Deserialize, Serialize};

use crate::script::{MultisigDescriptor, Script};
use crate::types::{Hash256, OutPoint};

/// Who can sign for a coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinOwner<'a> {
    /// A single wallet key, identified by its pubkey hash.
    Key(&'a Hash256),
    /// A multisig descriptor.
    Multisig(&'a MultisigDescriptor),
}

impl CoinOwner<'_> {
    /// Stable identity used to derive each owner's credential only once.
    pub fn id(&self) -> Hash256 {
        match self {
            Self::Key(hash) => **hash,
            Self::Multisig(descriptor) => descriptor.id(),
        }
    }
}

/// Capabilities the coin gate and engine need from any coin.
pub trait SpendableCoin {
    fn outpoint(&self) -> &OutPoint;

    fn amount(&self) -> u64;

    fn script_pubkey(&self) -> &Script;

    /// Redeem script for script-hash coins; `None` for single-key coins.
    fn redeem_script(&self) -> Option<Script>;

    fn owner(&self) -> CoinOwner<'_>;

    /// Flatten into the form the assembly engine consumes.
    fn to_pool_coin(&self) -> PoolCoin {
        PoolCoin {
            outpoint: self.outpoint().clone(),
            amount: self.amount(),
            script_pubkey: self.script_pubkey().clone(),
            redeem_script: self.redeem_script(),
        }
    }
}

/// A coin locked to one of the wallet's own keys.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WalletCoin {
    pub outpoint: OutPoint,
    pub amount: u64,
    pub script_pubkey: Script,
    /// Confirmations at the time the index produced this coin.
    pub confirmations: u32,
    /// Pubkey hash of the owning key.
    pub owner: Hash256,
}

impl WalletCoin {
    /// A pay-to-pubkey-hash coin owned by `owner`.
    pub fn new(outpoint: OutPoint, amount: u64, owner: Hash256, confirmations: u32) -> Self {
        Self {
            outpoint,
            amount,
            script_pubkey: Script::p2pkh(&owner),
            confirmations,
            owner,
        }
    }
}

impl SpendableCoin for WalletCoin {
    fn outpoint(&self) -> &OutPoint {
        &self.outpoint
    }

    fn amount(&self) -> u64 {
        self.amount
    }

    fn script_pubkey(&self) -> &Script {
        &self.script_pubkey
    }

    fn redeem_script(&self) -> Option<Script> {
        None
    }

    fn owner(&self) -> CoinOwner<'_> {
        CoinOwner::Key(&self.owner)
    }
}

/// A coin locked to a multisig descriptor.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MultisigCoin {
    pub outpoint: OutPoint,
    pub amount: u64,
    pub confirmations: u32,
    pub descriptor: MultisigDescriptor,
    script_pubkey: Script,
}

impl MultisigCoin {
    pub fn new(
        outpoint: OutPoint,
        amount: u64,
        descriptor: MultisigDescriptor,
        confirmations: u32,
    ) -> Self {
        let script_pubkey = descriptor.script_pubkey();
        Self {
            outpoint,
            amount,
            confirmations,
            descriptor,
            script_pubkey,
        }
    }
}

impl SpendableCoin for MultisigCoin {
    fn outpoint(&self) -> &OutPoint {
        &self.outpoint
    }

    fn amount(&self) -> u64 {
        self.amount
    }

    fn script_pubkey(&self) -> &Script {
        &self.script_pubkey
    }

    fn redeem_script(&self) -> Option<Script> {
        Some(self.descriptor.redeem_script())
    }

    fn owner(&self) -> CoinOwner<'_> {
        CoinOwner::Multisig(&self.descriptor)
    }
}

/// A coin as handed to the assembly engine's pool.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PoolCoin {
    pub outpoint: OutPoint,
    pub amount: u64,
    pub script_pubkey: Script,
    pub redeem_script: Option<Script>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn descriptor() -> MultisigDescriptor {
        let keys = (1..=3u8)
            .map(|i| KeyPair::from_secret_bytes([i; 32]).public_key())
            .collect();
        MultisigDescriptor::new(2, keys).unwrap()
    }

    #[test]
    fn wallet_coin_is_p2pkh_to_owner() {
        let owner = Hash256([5; 32]);
        let coin = WalletCoin::new(OutPoint::new(Hash256([1; 32]), 0), 100, owner, 3);
        assert_eq!(coin.script_pubkey().pubkey_hash(), Some(owner));
        assert_eq!(coin.owner().id(), owner);
        assert!(coin.to_pool_coin().redeem_script.is_none());
    }

    #[test]
    fn multisig_coin_carries_redeem_script() {
        let d = descriptor();
        let coin = MultisigCoin::new(OutPoint::new(Hash256([1; 32]), 0), 100, d.clone(), 1);
        let pool = coin.to_pool_coin();
        assert_eq!(pool.redeem_script, Some(d.redeem_script()));
        assert_eq!(pool.script_pubkey, d.script_pubkey());
        assert_eq!(coin.owner().id(), d.id());
    }
}
