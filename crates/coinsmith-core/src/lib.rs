//! # coinsmith-core
//! Foundation types and contract traits for Coinsmith.
//!
//! Everything a transaction builder needs to talk about without knowing
//! who stores the coins, who prices block space, or who assembles and
//! signs the final transaction.

pub mod coin;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod fee;
pub mod script;
pub mod traits;
pub mod types;
