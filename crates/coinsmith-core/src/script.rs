//! Locking scripts and multisig descriptors.
//!
//! Scripts are opaque byte strings to most of the crate. Only four shapes
//! are constructed or recognized here:
//!
//! ```text
//! pay-to-pubkey-hash:  OP_DUP OP_HASH 0x20 <pubkey hash> OP_EQUALVERIFY OP_CHECKSIG
//! pay-to-script-hash:  OP_HASH 0x20 <script hash> OP_EQUAL
//! multisig redeem:     OP_m (0x20 <pubkey>)*n OP_n OP_CHECKMULTISIG
//! data carrier:        OP_RETURN <len> <data>
//! ```
//!
//! All hashes are BLAKE3.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{MAX_MULTISIG_KEYS, MAX_OP_RETURN_DATA};
use crate::crypto::PublicKey;
use crate::error::ScriptError;
use crate::types::Hash256;

pub const OP_0: u8 = 0x00;
pub const OP_1: u8 = 0x51;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKMULTISIG: u8 = 0xae;

const PUSH_32: u8 = 0x20;
const P2PKH_LEN: usize = 37;
const P2SH_LEN: usize = 35;

/// A locking (or redeem) script.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Script(#[serde(with = "hex::serde")] pub Vec<u8>);

impl Script {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Pay-to-pubkey-hash script locking funds to the owner of `pubkey_hash`.
    pub fn p2pkh(pubkey_hash: &Hash256) -> Self {
        let mut bytes = Vec::with_capacity(P2PKH_LEN);
        bytes.extend_from_slice(&[OP_DUP, OP_HASH, PUSH_32]);
        bytes.extend_from_slice(pubkey_hash.as_bytes());
        bytes.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        Self(bytes)
    }

    /// Pay-to-script-hash script locking funds to a redeem script's hash.
    pub fn p2sh(script_hash: &Hash256) -> Self {
        let mut bytes = Vec::with_capacity(P2SH_LEN);
        bytes.extend_from_slice(&[OP_HASH, PUSH_32]);
        bytes.extend_from_slice(script_hash.as_bytes());
        bytes.push(OP_EQUAL);
        Self(bytes)
    }

    /// Unspendable data-carrier script. At most [`MAX_OP_RETURN_DATA`] bytes.
    pub fn op_return(data: &[u8]) -> Result<Self, ScriptError> {
        if data.len() > MAX_OP_RETURN_DATA {
            return Err(ScriptError::DataTooLarge {
                len: data.len(),
                max: MAX_OP_RETURN_DATA,
            });
        }
        let mut bytes = Vec::with_capacity(data.len() + 2);
        bytes.push(OP_RETURN);
        bytes.push(data.len() as u8);
        bytes.extend_from_slice(data);
        Ok(Self(bytes))
    }

    /// The pubkey hash of a pay-to-pubkey-hash script.
    pub fn pubkey_hash(&self) -> Option<Hash256> {
        let b = &self.0;
        if b.len() == P2PKH_LEN
            && b[..3] == [OP_DUP, OP_HASH, PUSH_32]
            && b[35..] == [OP_EQUALVERIFY, OP_CHECKSIG]
        {
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&b[3..35]);
            Some(Hash256(hash))
        } else {
            None
        }
    }

    /// The script hash of a pay-to-script-hash script.
    pub fn script_hash(&self) -> Option<Hash256> {
        let b = &self.0;
        if b.len() == P2SH_LEN && b[..2] == [OP_HASH, PUSH_32] && b[34] == OP_EQUAL {
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&b[2..34]);
            Some(Hash256(hash))
        } else {
            None
        }
    }

    pub fn is_op_return(&self) -> bool {
        self.0.first() == Some(&OP_RETURN)
    }

    /// BLAKE3 hash of the script bytes (what a pay-to-script-hash commits to).
    pub fn hash(&self) -> Hash256 {
        Hash256::digest(&self.0)
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// An m-of-n multisig policy over Ed25519 keys.
///
/// Funds are locked to `p2sh(hash(redeem_script))`; spending reveals the
/// redeem script and at least `threshold` signatures from `public_keys`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MultisigDescriptor {
    threshold: u8,
    public_keys: Vec<PublicKey>,
}

impl MultisigDescriptor {
    /// Create a descriptor requiring `threshold` of `public_keys`.
    pub fn new(threshold: u8, public_keys: Vec<PublicKey>) -> Result<Self, ScriptError> {
        let n = public_keys.len();
        if n == 0 || n > MAX_MULTISIG_KEYS {
            return Err(ScriptError::KeyCount(n));
        }
        if threshold == 0 || threshold as usize > n {
            return Err(ScriptError::InvalidThreshold { threshold, keys: n });
        }
        Ok(Self {
            threshold,
            public_keys,
        })
    }

    /// Parse a multisig redeem script back into a descriptor.
    pub fn from_redeem_script(script: &Script) -> Result<Self, ScriptError> {
        let b = script.as_bytes();
        if b.len() < 3 || *b.last().unwrap_or(&OP_0) != OP_CHECKMULTISIG {
            return Err(ScriptError::NotMultisig);
        }
        let m = small_int(b[0]).ok_or(ScriptError::NotMultisig)?;
        let n = small_int(b[b.len() - 2]).ok_or(ScriptError::NotMultisig)?;
        let body = &b[1..b.len() - 2];
        if body.len() != n as usize * 33 {
            return Err(ScriptError::NotMultisig);
        }
        let mut keys = Vec::with_capacity(n as usize);
        for chunk in body.chunks(33) {
            if chunk[0] != PUSH_32 {
                return Err(ScriptError::NotMultisig);
            }
            let mut raw = [0u8; 32];
            raw.copy_from_slice(&chunk[1..]);
            keys.push(PublicKey::from_bytes(&raw).map_err(|_| ScriptError::NotMultisig)?);
        }
        Self::new(m, keys)
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn public_keys(&self) -> &[PublicKey] {
        &self.public_keys
    }

    pub fn contains(&self, key: &PublicKey) -> bool {
        self.public_keys.contains(key)
    }

    /// The redeem script revealed when spending.
    pub fn redeem_script(&self) -> Script {
        let mut bytes = Vec::with_capacity(self.public_keys.len() * 33 + 3);
        bytes.push(OP_1 - 1 + self.threshold);
        for key in &self.public_keys {
            bytes.push(PUSH_32);
            bytes.extend_from_slice(&key.to_bytes());
        }
        bytes.push(OP_1 - 1 + self.public_keys.len() as u8);
        bytes.push(OP_CHECKMULTISIG);
        Script(bytes)
    }

    /// Stable identity of the descriptor: the hash of its redeem script.
    pub fn id(&self) -> Hash256 {
        self.redeem_script().hash()
    }

    /// The locking script funds sent to this descriptor carry.
    pub fn script_pubkey(&self) -> Script {
        Script::p2sh(&self.id())
    }
}

impl fmt::Display for MultisigDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "multi({}-of-{})", self.threshold, self.public_keys.len())
    }
}

fn small_int(op: u8) -> Option<u8> {
    if (OP_1..OP_1 + MAX_MULTISIG_KEYS as u8).contains(&op) {
        Some(op - OP_1 + 1)
    } else {
        None
    }
}
