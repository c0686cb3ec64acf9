//! Fee estimator and a static fee schedule.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use coinsmith_core::constants::{HIGH_FEE_TARGET, LOW_FEE_TARGET, MEDIUM_FEE_TARGET};
use coinsmith_core::fee::FeeRate;
use coinsmith_core::traits::{AssemblyEngine, FeePolicy};

use crate::error::WalletError;
use crate::request::BuildRequest;

/// Fee rates keyed by confirmation target.
///
/// A target between two entries gets the rate of the nearest smaller
/// target; a target below every entry gets the most aggressive rate.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FeeSchedule {
    rates: BTreeMap<u32, FeeRate>,
    fallback: FeeRate,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self::from_tiers(
            FeeRate::from_per_kb(5_000),
            FeeRate::from_per_kb(10_000),
            FeeRate::from_per_kb(20_000),
        )
    }
}

impl FeeSchedule {
    /// An empty schedule answering every target with `fallback`.
    pub fn new(fallback: FeeRate) -> Self {
        Self {
            rates: BTreeMap::new(),
            fallback,
        }
    }

    /// One rate per priority tier; the medium rate doubles as the fallback.
    pub fn from_tiers(low: FeeRate, medium: FeeRate, high: FeeRate) -> Self {
        let mut schedule = Self::new(medium);
        schedule
            .set_rate(LOW_FEE_TARGET, low)
            .set_rate(MEDIUM_FEE_TARGET, medium)
            .set_rate(HIGH_FEE_TARGET, high);
        schedule
    }

    pub fn set_rate(&mut self, confirmation_target: u32, rate: FeeRate) -> &mut Self {
        self.rates.insert(confirmation_target, rate);
        self
    }
}

impl FeePolicy for FeeSchedule {
    fn fee_rate(&self, confirmation_target: u32) -> FeeRate {
        self.rates
            .range(..=confirmation_target)
            .next_back()
            .or_else(|| self.rates.iter().next())
            .map(|(_, rate)| *rate)
            .unwrap_or(self.fallback)
    }
}

/// The rate a request pays: its override, else the policy rate for its tier.
pub fn fee_rate_for(policy: &dyn FeePolicy, request: &BuildRequest) -> FeeRate {
    request
        .fee_rate
        .unwrap_or_else(|| policy.fee_rate(request.fee_type.confirmation_target()))
}

/// Decide the fee and register it with the engine.
///
/// An explicit fee is used verbatim; otherwise the engine estimates one for
/// its current inputs, outputs and change.
pub fn resolve_fee(
    engine: &mut dyn AssemblyEngine,
    policy: &dyn FeePolicy,
    request: &BuildRequest,
) -> Result<u64, WalletError> {
    let fee = match request.fee {
        Some(fee) => fee,
        None => {
            let rate = fee_rate_for(policy, request);
            let fee = engine.estimate_fees(rate)?;
            debug!(%rate, fee, "fee estimated");
            fee
        }
    };
    engine.send_fees(fee);
    Ok(fee)
}
