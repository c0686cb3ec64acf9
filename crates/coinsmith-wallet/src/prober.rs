//! Spendable-limit prober.
//!
//! The largest amount an account can send is its balance minus the fee of
//! a transaction that sweeps it. Rather than modelling that transaction
//! separately, the prober asks the engine to pay the whole balance to a
//! throwaway script: the engine's insufficient-funds shortfall is then
//! exactly the fee.
//!
//! This relies on the engine always reporting a shortfall for a full-balance
//! spend. A zero fee rate breaks that assumption and surfaces as
//! [`WalletError::InternalInvariant`].

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use coinsmith_core::error::EngineError;
use coinsmith_core::fee::FeeType;
use coinsmith_core::script::Script;
use coinsmith_core::types::{AccountRef, Hash256};

use crate::error::WalletError;
use crate::handler::{Stages, TransactionHandler};
use crate::request::BuildRequest;

/// Maximum amount an account can send, and the fee that sending it costs.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpendableLimit {
    pub max_spendable: u64,
    pub fee: u64,
}

impl TransactionHandler<'_> {
    /// Probe the most `account` can send at `fee_type` priority.
    ///
    /// With `allow_unconfirmed`, coins with zero confirmations count.
    pub fn max_spendable(
        &self,
        account: &AccountRef,
        fee_type: FeeType,
        allow_unconfirmed: bool,
    ) -> Result<SpendableLimit, WalletError> {
        let min_confirmations = if allow_unconfirmed { 0 } else { 1 };
        let balance = self
            .index
            .spendable_outputs(account, min_confirmations)?
            .iter()
            .filter(|c| !self.reservations.is_reserved(&c.outpoint))
            .fold(0u64, |acc, c| acc.saturating_add(c.amount));
        if balance == 0 {
            return Ok(SpendableLimit::default());
        }

        let mut request = BuildRequest::new(account.clone());
        request
            .add_recipient(Script::p2pkh(&Hash256::ZERO), balance)
            .set_fee_type(fee_type)
            .set_min_confirmations(min_confirmations)
            .set_sign(false);

        let mut engine = self.engines.create();
        self.prepare(engine.as_mut(), &request, Stages::Probe)?;

        match engine.assemble(false) {
            Err(EngineError::InsufficientFunds { missing }) => {
                let limit = SpendableLimit {
                    max_spendable: balance.saturating_sub(missing),
                    fee: missing,
                };
                debug!(%account, balance, fee = limit.fee, "spendable limit probed");
                Ok(limit)
            }
            Ok(_) => {
                warn!(%account, balance, "full-balance probe was funded");
                Err(WalletError::InternalInvariant(
                    "probe spending the entire balance assembled without a shortfall".into(),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }
}
