//! # coinsmith-wallet: transaction building for UTXO wallets.
//!
//! Decides which coins fund a payment, how much fee it pays and where the
//! change goes, then drives an [`AssemblyEngine`](coinsmith_core::traits::AssemblyEngine)
//! to produce (and optionally sign and verify) the transaction.
//!
//! # Modules
//!
//! - [`error`]: `WalletError` enum
//! - [`request`]: `BuildRequest` and `Recipient`
//! - [`recipients`]: recipient validation and registration
//! - [`coin_selection`]: bounded candidate gate over the wallet's coins
//! - [`secrets`]: signing credential loading
//! - [`change`]: change destination resolution
//! - [`fee`]: fee schedule and fee resolution
//! - [`handler`]: the build pipeline, funding and fee estimation
//! - [`prober`]: maximum spendable amount
//! - [`reservation`]: short-lived input leases between builds
//! - [`engine`]: reference assembly engine
//! - [`keys`]: seed and per-account key derivation
//! - [`encryption`]: argon2id + AES-256-GCM seed encryption
//! - [`wallet`]: in-memory wallet index and key store

pub mod change;
pub mod coin_selection;
pub mod encryption;
pub mod engine;
pub mod error;
pub mod fee;
pub mod handler;
pub mod keys;
pub mod prober;
pub mod recipients;
pub mod request;
pub mod reservation;
pub mod secrets;
pub mod wallet;

// Re-exports for convenient access
pub use engine::{EnginePolicy, NativeEngine, NativeEngineFactory};
pub use error::WalletError;
pub use fee::FeeSchedule;
pub use handler::{BuiltTransaction, TransactionHandler};
pub use keys::{KeyChain, Seed};
pub use prober::SpendableLimit;
pub use request::{BuildRequest, OpReturn, Recipient};
pub use reservation::InputReservations;
pub use secrets::KeyStore;
pub use wallet::{Wallet, WalletStore};
