//! Core transaction types: hashes, outpoints, inputs, outputs, transactions.
//!
//! All monetary values are in base units (1 COIN = 10^8 base units).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::EngineError;
use crate::script::Script;

/// A 32-byte hash value.
///
/// Used for transaction IDs, pubkey hashes and script hashes (all BLAKE3).
/// Serialized as a lowercase hex string.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(#[serde(with = "hex::serde")] pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes).
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// BLAKE3 digest of arbitrary data.
    pub fn digest(data: &[u8]) -> Self {
        Self(blake3::hash(data).into())
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    /// Transaction ID containing the referenced output.
    pub txid: Hash256,
    /// Index of the output within the transaction.
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, index: u32) -> Self {
        Self { txid, index }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// One signature attached to an input, together with the key that made it.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct InputSignature {
    /// Ed25519 public key (32 bytes).
    #[serde(with = "hex::serde")]
    pub public_key: Vec<u8>,
    /// Ed25519 signature (64 bytes).
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

/// A transaction input, spending a previous output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxInput {
    /// The outpoint being spent.
    pub previous_output: OutPoint,
    /// Signatures over this input. Empty until signed.
    pub signatures: Vec<InputSignature>,
    /// Redeem script for script-hash (multisig) spends.
    pub redeem_script: Option<Script>,
}

impl TxInput {
    /// An unsigned input spending `previous_output`.
    pub fn unsigned(previous_output: OutPoint) -> Self {
        Self {
            previous_output,
            signatures: Vec::new(),
            redeem_script: None,
        }
    }

    pub fn is_signed(&self) -> bool {
        !self.signatures.is_empty()
    }
}

/// A transaction output, creating a new UTXO.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    /// Value in base units.
    pub value: u64,
    /// Locking script.
    pub script_pubkey: Script,
}

/// A transaction transferring value between scripts.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Format version.
    pub version: u32,
    /// Inputs consuming previous outputs.
    pub inputs: Vec<TxInput>,
    /// New outputs created by this transaction.
    pub outputs: Vec<TxOutput>,
    /// Block height before which this tx is invalid.
    pub lock_time: u32,
}

impl Transaction {
    /// An empty transaction with the current format version.
    pub fn new() -> Self {
        Self {
            version: crate::constants::TX_VERSION,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
        }
    }

    /// Canonical byte encoding (bincode, standard config).
    pub fn encode(&self) -> Result<Vec<u8>, EngineError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| EngineError::Serialization(e.to_string()))
    }

    /// Decode a transaction produced by [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> Result<Self, EngineError> {
        let (tx, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        Ok(tx)
    }

    /// Serialized size in bytes. This is the size fee rates apply to.
    pub fn size(&self) -> Result<usize, EngineError> {
        Ok(self.encode()?.len())
    }

    /// Transaction ID: BLAKE3 of the encoding with all signatures stripped.
    ///
    /// Signing does not change the txid, so an unsigned build and its
    /// signed counterpart share an identifier.
    pub fn txid(&self) -> Result<Hash256, EngineError> {
        let mut stripped = self.clone();
        for input in &mut stripped.inputs {
            input.signatures.clear();
        }
        Ok(Hash256::digest(&stripped.encode()?))
    }

    /// Sum of all output values. Returns None on overflow.
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }

    /// Whether any input spends `outpoint`.
    pub fn spends(&self, outpoint: &OutPoint) -> bool {
        self.inputs.iter().any(|i| &i.previous_output == outpoint)
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

/// Names one account inside one wallet.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountRef {
    pub wallet_name: String,
    pub account_name: String,
}

impl AccountRef {
    pub fn new(wallet_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            wallet_name: wallet_name.into(),
            account_name: account_name.into(),
        }
    }
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.wallet_name, self.account_name)
    }
}
