//! Error types shared across Coinsmith crates.
use thiserror::Error;

use crate::types::OutPoint;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid signature bytes")] InvalidSignature,
    #[error("signature verification failed")] VerificationFailed,
    #[error("input index out of bounds: {index} >= {len}")] InputIndexOutOfBounds { index: usize, len: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("data too large: {len} > {max}")] DataTooLarge { len: usize, max: usize },
    #[error("invalid multisig threshold {threshold} for {keys} keys")] InvalidThreshold { threshold: u8, keys: usize },
    #[error("invalid multisig key count: {0}")] KeyCount(usize),
    #[error("not a multisig redeem script")] NotMultisig,
}

/// Failures of the wallet/UTXO index.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("unknown wallet: {0}")] UnknownWallet(String),
    #[error("unknown account: {0}")] UnknownAccount(String),
    #[error("storage: {0}")] Storage(String),
}

/// Failures reported by a transaction assembly engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Coins in the pool cannot cover outputs plus fee.
    #[error("insufficient funds: missing {missing}")] InsufficientFunds { missing: u64 },
    #[error("change is due but no change script was set")] MissingChangeScript,
    #[error("required input {0} is not in the coin pool")] UnknownRequiredInput(OutPoint),
    #[error("value overflow")] ValueOverflow,
    #[error("serialization: {0}")] Serialization(String),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error(transparent)] Script(#[from] ScriptError),
}

/// One reason an assembled transaction fails engine policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("transaction has no inputs")] NoInputs,
    #[error("transaction has no outputs")] NoOutputs,
    #[error("output {index} is dust: {value} < {threshold}")] DustOutput { index: usize, value: u64, threshold: u64 },
    #[error("transaction too large: {size} > {max}")] Oversized { size: usize, max: usize },
    #[error("fee {fee} below relay minimum {minimum}")] FeeTooLow { fee: u64, minimum: u64 },
    #[error("absurd fee {fee} above {maximum}")] AbsurdFee { fee: u64, maximum: u64 },
    #[error("inputs {inputs} do not cover outputs {outputs}")] InputsBelowOutputs { inputs: u64, outputs: u64 },
    #[error("duplicate input {0}")] DuplicateInput(OutPoint),
    #[error("input {index} spends an unknown coin")] UnknownInput { index: usize },
    #[error("input {index} is not signed")] MissingSignature { index: usize },
    #[error("input {index} carries an invalid signature")] InvalidSignature { index: usize },
    #[error("input {index} has {have} of {need} required signatures")] NotEnoughSignatures { index: usize, have: usize, need: usize },
    #[error("input {index} redeem script does not match its coin")] RedeemScriptMismatch { index: usize },
}

impl PolicyViolation {
    /// Violations that only mean signatures are still outstanding.
    pub fn is_signature_gap(&self) -> bool {
        matches!(self, Self::MissingSignature { .. } | Self::NotEnoughSignatures { .. })
    }
}
