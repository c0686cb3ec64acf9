//! Protocol and policy constants. All monetary values in base units
//! (1 COIN = 10^8 base units).

pub const COIN: u64 = 100_000_000;

/// Transaction format version written by the builder.
pub const TX_VERSION: u32 = 1;

/// Candidate count after which the coin gate may stop accumulating,
/// provided the running sum already exceeds the requested total.
pub const MAX_CANDIDATE_COINS: usize = 500;

/// Confirmation target (in blocks) for [`FeeType::Low`](crate::fee::FeeType::Low).
pub const LOW_FEE_TARGET: u32 = 50;

/// Confirmation target (in blocks) for [`FeeType::Medium`](crate::fee::FeeType::Medium).
pub const MEDIUM_FEE_TARGET: u32 = 20;

/// Confirmation target (in blocks) for [`FeeType::High`](crate::fee::FeeType::High).
pub const HIGH_FEE_TARGET: u32 = 5;

/// Outputs below this value (other than zero-value data outputs) are dust.
pub const DEFAULT_DUST_THRESHOLD: u64 = 546;

/// Largest transaction the default engine policy will accept, in bytes.
pub const DEFAULT_MAX_TX_SIZE: usize = 100_000;

/// Minimum relay fee rate, in base units per 1000 bytes.
pub const DEFAULT_MIN_RELAY_FEE_PER_KB: u64 = 1_000;

/// A fee above this many base units is considered absurd by default policy.
pub const DEFAULT_ABSURD_FEE: u64 = COIN / 10;

/// Maximum payload of an OP_RETURN data output.
pub const MAX_OP_RETURN_DATA: usize = 80;

/// Maximum number of keys in a multisig descriptor.
pub const MAX_MULTISIG_KEYS: usize = 16;

/// Default lifetime of an input reservation, in seconds.
pub const DEFAULT_RESERVATION_TTL_SECS: u64 = 600;
