//! Secrets loader: signing credentials for the selected coins.

use std::collections::HashSet;

use tracing::debug;

use coinsmith_core::coin::{CoinOwner, SpendableCoin};
use coinsmith_core::crypto::KeyPair;
use coinsmith_core::traits::AssemblyEngine;
use coinsmith_core::types::{AccountRef, Hash256};

use crate::error::WalletError;
use crate::keys::KeyChain;
use crate::request::BuildRequest;

/// Source of decrypted key material.
pub trait KeyStore: Send + Sync {
    /// Unlock `account`'s keys with `passphrase`.
    fn unlock(&self, account: &AccountRef, passphrase: &str) -> Result<KeyChain, WalletError>;
}

/// Register one signing key per distinct coin owner with the engine.
///
/// Does nothing for unsigned builds. Returns how many keys were registered.
pub fn load_secrets<C: SpendableCoin>(
    engine: &mut dyn AssemblyEngine,
    keys: &dyn KeyStore,
    request: &BuildRequest,
    coins: &[C],
) -> Result<usize, WalletError> {
    if !request.sign {
        return Ok(0);
    }
    let passphrase = request
        .passphrase
        .as_deref()
        .ok_or_else(|| WalletError::Configuration("signing requires a passphrase".into()))?;
    let chain = keys.unlock(&request.account, passphrase)?;

    let mut seen: HashSet<Hash256> = HashSet::new();
    let mut signers: Vec<KeyPair> = Vec::new();
    for coin in coins {
        let owner = coin.owner();
        if !seen.insert(owner.id()) {
            continue;
        }
        let key = match owner {
            CoinOwner::Key(pkh) => chain.keypair_for_pubkey_hash(pkh),
            CoinOwner::Multisig(descriptor) => {
                chain.keypairs_for_multisig(descriptor).into_iter().next()
            }
        };
        let key = key.ok_or_else(|| {
            WalletError::KeyNotFound(format!("no key for coin {} (owner {})", coin.outpoint(), owner.id()))
        })?;
        signers.push(key.clone());
    }

    let count = signers.len();
    engine.add_keys(signers);
    debug!(account = %request.account, keys = count, "signing keys loaded");
    Ok(count)
}
