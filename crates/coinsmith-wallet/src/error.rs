//! Wallet error types.

use coinsmith_core::error::{CryptoError, EngineError, IndexError, ScriptError};
use thiserror::Error;

/// Errors that can occur while building, funding or probing transactions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// The request is malformed or asks for something unsupported.
    #[error("invalid request: {0}")]
    Configuration(String),

    /// Not enough value to cover the request.
    ///
    /// `missing` is the exact shortfall when it is known.
    #[error("insufficient funds: {reason}")]
    InsufficientFunds {
        reason: String,
        missing: Option<u64>,
    },

    /// An explicitly required input cannot be spent by this wallet.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The assembled transaction failed policy verification.
    #[error("transaction failed verification: {0}")]
    TransactionBuild(String),

    /// A state the pipeline should never reach.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),

    /// Required signing key not found in the keychain.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Wrong passphrase for encrypted key material.
    #[error("invalid password")]
    InvalidPassword,

    /// Encryption failure.
    #[error("encryption: {0}")]
    Encryption(String),

    /// Encrypted key material is truncated or malformed.
    #[error("corrupted key material: {0}")]
    CorruptedKeys(String),

    /// Serialization error.
    #[error("serialization: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Index(#[from] IndexError),

    /// Engine failure other than a funding shortfall.
    #[error(transparent)]
    Engine(EngineError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Script(#[from] ScriptError),
}

impl WalletError {
    /// Shorthand for an [`InsufficientFunds`](Self::InsufficientFunds) without a known shortfall.
    pub fn insufficient(reason: impl Into<String>) -> Self {
        Self::InsufficientFunds {
            reason: reason.into(),
            missing: None,
        }
    }

    /// The shortfall carried by an insufficient-funds error, if any.
    pub fn missing_funds(&self) -> Option<u64> {
        match self {
            Self::InsufficientFunds { missing, .. } => *missing,
            _ => None,
        }
    }
}

impl From<EngineError> for WalletError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::InsufficientFunds { missing } => Self::InsufficientFunds {
                reason: format!("missing funds: {missing}"),
                missing: Some(missing),
            },
            other => Self::Engine(other),
        }
    }
}
