//! Seed management and per-account key derivation.
//!
//! Child keys are Ed25519 keypairs derived with BLAKE3's KDF from the
//! wallet seed, the account index and the child index. The same seed always
//! yields the same keys, so an account's key material is never stored, only
//! re-derived after the seed is unlocked.

use std::collections::HashMap;
use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use coinsmith_core::crypto::KeyPair;
use coinsmith_core::script::MultisigDescriptor;
use coinsmith_core::types::Hash256;

/// BLAKE3 KDF context for child key derivation.
const KDF_CONTEXT: &str = "coinsmith-wallet account key derivation v1";

/// A 32-byte master seed.
///
/// Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Seed {
    bytes: [u8; 32],
}

impl Seed {
    /// Generate a random seed from the OS RNG.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Raw seed bytes. Handle with care.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl Clone for Seed {
    fn clone(&self) -> Self {
        Self { bytes: self.bytes }
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seed").field("bytes", &"[REDACTED]").finish()
    }
}

/// Keys of one account, derived on demand and cached.
pub struct KeyChain {
    seed: Seed,
    account_index: u32,
    keypairs: HashMap<u32, KeyPair>,
    /// Reverse lookup: pubkey hash -> child index.
    by_pubkey_hash: HashMap<Hash256, u32>,
}

impl KeyChain {
    pub fn new(seed: Seed, account_index: u32) -> Self {
        Self {
            seed,
            account_index,
            keypairs: HashMap::new(),
            by_pubkey_hash: HashMap::new(),
        }
    }

    pub fn account_index(&self) -> u32 {
        self.account_index
    }

    /// Derive (or fetch) the keypair at child `index`.
    pub fn derive_keypair(&mut self, index: u32) -> &KeyPair {
        let seed = &self.seed;
        let account = self.account_index;
        let by_hash = &mut self.by_pubkey_hash;
        self.keypairs.entry(index).or_insert_with(|| {
            let kp = derive_child_keypair(seed, account, index);
            by_hash.insert(kp.public_key().pubkey_hash(), index);
            kp
        })
    }

    /// Derive every child key below `n`.
    ///
    /// Called after unlocking so lookups by pubkey hash cover every address
    /// the account has handed out.
    pub fn restore_to_index(&mut self, n: u32) {
        for i in 0..n {
            self.derive_keypair(i);
        }
    }

    /// The derived keypair whose pubkey hashes to `hash`, if any.
    pub fn keypair_for_pubkey_hash(&self, hash: &Hash256) -> Option<&KeyPair> {
        self.by_pubkey_hash
            .get(hash)
            .and_then(|idx| self.keypairs.get(idx))
    }

    /// Derived keys that are cosigners of `descriptor`.
    pub fn keypairs_for_multisig(&self, descriptor: &MultisigDescriptor) -> Vec<&KeyPair> {
        let mut indexed: Vec<(&u32, &KeyPair)> = self
            .keypairs
            .iter()
            .filter(|(_, kp)| descriptor.contains(&kp.public_key()))
            .collect();
        indexed.sort_by_key(|(i, _)| **i);
        indexed.into_iter().map(|(_, kp)| kp).collect()
    }

    pub fn known_pubkey_hashes(&self) -> impl Iterator<Item = &Hash256> {
        self.by_pubkey_hash.keys()
    }

    pub fn len(&self) -> usize {
        self.keypairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypairs.is_empty()
    }
}

impl fmt::Debug for KeyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyChain")
            .field("account_index", &self.account_index)
            .field("cached_keys", &self.keypairs.len())
            .finish()
    }
}

/// Derive child `index` of account `account` from `seed`.
pub fn derive_child_keypair(seed: &Seed, account: u32, index: u32) -> KeyPair {
    let mut ikm = Vec::with_capacity(40);
    ikm.extend_from_slice(seed.as_bytes());
    ikm.extend_from_slice(&account.to_le_bytes());
    ikm.extend_from_slice(&index.to_le_bytes());
    let mut derived = blake3::derive_key(KDF_CONTEXT, &ikm);
    ikm.zeroize();
    let kp = KeyPair::from_secret_bytes(derived);
    derived.zeroize();
    kp
}
