//! Integration tests for Coinsmith.
//!
//! The tests under `tests/` drive [`TransactionHandler`] end to end over a
//! real [`WalletStore`](coinsmith_wallet::WalletStore) and the native
//! engine, checking the build pipeline's externally visible contract.
//!
//! [`TransactionHandler`]: coinsmith_wallet::TransactionHandler

pub mod helpers;
