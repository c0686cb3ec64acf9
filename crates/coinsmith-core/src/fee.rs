//! Fee rates and fee priority tiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::{HIGH_FEE_TARGET, LOW_FEE_TARGET, MEDIUM_FEE_TARGET};

/// A fee rate in base units per 1000 bytes of serialized transaction.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FeeRate {
    per_kb: u64,
}

impl FeeRate {
    pub const ZERO: Self = Self { per_kb: 0 };

    pub const fn from_per_kb(per_kb: u64) -> Self {
        Self { per_kb }
    }

    pub fn per_kb(&self) -> u64 {
        self.per_kb
    }

    /// Fee for a transaction of `size` bytes, rounded up.
    ///
    /// Saturates instead of overflowing.
    pub fn fee_for(&self, size: usize) -> u64 {
        let product = (size as u128) * (self.per_kb as u128);
        let fee = product.div_ceil(1000);
        u64::try_from(fee).unwrap_or(u64::MAX)
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/kB", self.per_kb)
    }
}

/// Priority tier a caller picks instead of a raw fee rate.
///
/// Each tier is a confirmation target handed to the fee policy source.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeeType {
    Low,
    #[default]
    Medium,
    High,
}

impl FeeType {
    /// Blocks within which a transaction paying this tier should confirm.
    pub fn confirmation_target(&self) -> u32 {
        match self {
            Self::Low => LOW_FEE_TARGET,
            Self::Medium => MEDIUM_FEE_TARGET,
            Self::High => HIGH_FEE_TARGET,
        }
    }
}

impl FromStr for FeeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown fee type: {other}")),
        }
    }
}

impl fmt::Display for FeeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fee_rounds_up() {
        let rate = FeeRate::from_per_kb(1000);
        assert_eq!(rate.fee_for(250), 250);
        let rate = FeeRate::from_per_kb(1);
        assert_eq!(rate.fee_for(1), 1);
        assert_eq!(rate.fee_for(1000), 1);
        assert_eq!(rate.fee_for(1001), 2);
    }

    #[test]
    fn zero_rate_is_free() {
        assert_eq!(FeeRate::ZERO.fee_for(10_000), 0);
    }

    #[test]
    fn fee_saturates() {
        assert_eq!(FeeRate::from_per_kb(u64::MAX).fee_for(usize::MAX), u64::MAX);
    }

    #[test]
    fn fee_type_targets() {
        assert_eq!(FeeType::Low.confirmation_target(), 50);
        assert_eq!(FeeType::Medium.confirmation_target(), 20);
        assert_eq!(FeeType::High.confirmation_target(), 5);
    }

    #[test]
    fn fee_type_parse() {
        assert_eq!("HIGH".parse::<FeeType>().unwrap(), FeeType::High);
        assert!("urgent".parse::<FeeType>().is_err());
        assert_eq!(FeeType::Low.to_string(), "low");
    }

    proptest! {
        #[test]
        fn fee_monotonic_in_size(rate in 0u64..1_000_000, a in 0usize..200_000, b in 0usize..200_000) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let r = FeeRate::from_per_kb(rate);
            prop_assert!(r.fee_for(lo) <= r.fee_for(hi));
        }

        #[test]
        fn fee_never_below_exact(rate in 0u64..1_000_000, size in 0usize..200_000) {
            let fee = FeeRate::from_per_kb(rate).fee_for(size) as u128;
            prop_assert!(fee * 1000 >= size as u128 * rate as u128);
            prop_assert!(fee * 1000 < size as u128 * rate as u128 + 1000);
        }
    }
}
