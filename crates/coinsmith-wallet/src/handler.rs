//! Build orchestrator.
//!
//! [`TransactionHandler`] runs the linear build pipeline:
//!
//! 1. validate and register recipients
//! 2. gate the account's coins into the engine's pool
//! 3. load signing keys (signed builds only)
//! 4. resolve the change destination
//! 5. resolve the fee
//! 6. assemble, then verify against engine policy
//!
//! Each build gets a fresh engine from the [`EngineFactory`]; nothing is
//! shared between builds except the read-only collaborators and the input
//! reservation table.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use coinsmith_core::coin::SpendableCoin;
use coinsmith_core::error::PolicyViolation;
use coinsmith_core::script::Script;
use coinsmith_core::traits::{AssemblyEngine, EngineFactory, FeePolicy, UtxoIndex};
use coinsmith_core::types::{OutPoint, Transaction};

use crate::change::resolve_change;
use crate::coin_selection::{InputConstraint, register_coins, select_coins};
use crate::error::WalletError;
use crate::fee::resolve_fee;
use crate::recipients::{register_recipients, validate_recipients};
use crate::request::{BuildRequest, Recipient};
use crate::reservation::InputReservations;
use crate::secrets::{KeyStore, load_secrets};

/// A successfully built transaction and what went into it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BuiltTransaction {
    pub transaction: Transaction,
    /// Fee the transaction was built to pay.
    pub fee: u64,
    /// Change destination registered for the build.
    pub change_script: Script,
}

impl BuiltTransaction {
    /// Outpoints the transaction spends.
    pub fn spent(&self) -> Vec<OutPoint> {
        self.transaction
            .inputs
            .iter()
            .map(|i| i.previous_output.clone())
            .collect()
    }
}

/// Which stages run before assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stages {
    /// Everything: keys, change and fee.
    Build,
    /// Change and fee, no keys.
    Estimate,
    /// Fee only.
    Probe,
}

/// Output of the pre-assembly stages.
#[derive(Debug)]
pub(crate) struct Prepared {
    pub fee: u64,
    pub change_script: Option<Script>,
}

/// Builds, funds and prices transactions for wallet accounts.
pub struct TransactionHandler<'a> {
    pub(crate) index: &'a dyn UtxoIndex,
    pub(crate) fee_policy: &'a dyn FeePolicy,
    pub(crate) keys: &'a dyn KeyStore,
    pub(crate) engines: &'a dyn EngineFactory,
    pub(crate) reservations: &'a InputReservations,
}

impl<'a> TransactionHandler<'a> {
    pub fn new(
        index: &'a dyn UtxoIndex,
        fee_policy: &'a dyn FeePolicy,
        keys: &'a dyn KeyStore,
        engines: &'a dyn EngineFactory,
        reservations: &'a InputReservations,
    ) -> Self {
        Self {
            index,
            fee_policy,
            keys,
            engines,
            reservations,
        }
    }

    /// Build a transaction for `request`.
    ///
    /// Signed builds lease their inputs until [`release`](Self::release) or
    /// the lease expires.
    pub fn build(&self, request: &BuildRequest) -> Result<BuiltTransaction, WalletError> {
        let mut engine = self.engines.create();
        let prepared = self.prepare(engine.as_mut(), request, Stages::Build)?;

        if request.shuffle {
            engine.shuffle();
        }
        let tx = engine.assemble(request.sign)?;

        if !request.skip_verification {
            self.check(engine.as_ref(), &tx, request.sign)?;
        }
        if request.sign {
            self.reservations.try_reserve_transaction(&tx).map_err(|taken| {
                WalletError::InvalidInput(format!("input {taken} was reserved by a concurrent build"))
            })?;
        }

        info!(
            account = %request.account,
            inputs = tx.inputs.len(),
            outputs = tx.outputs.len(),
            fee = prepared.fee,
            signed = request.sign,
            "transaction built"
        );
        Ok(BuiltTransaction {
            transaction: tx,
            fee: prepared.fee,
            change_script: prepared
                .change_script
                .ok_or_else(|| WalletError::InternalInvariant("build without change".into()))?,
        })
    }

    /// The fee `request` would pay, without assembling anything.
    pub fn estimate_fee(&self, request: &BuildRequest) -> Result<u64, WalletError> {
        let mut engine = self.engines.create();
        let prepared = self.prepare(engine.as_mut(), request, Stages::Estimate)?;
        debug!(account = %request.account, fee = prepared.fee, "fee estimate");
        Ok(prepared.fee)
    }

    /// Add inputs and change to `tx` so it pays for itself.
    ///
    /// `tx`'s outputs become the recipients and its inputs are required. On
    /// success the new change output and funding inputs are appended to `tx`
    /// in place. Existing output amounts are never adjusted. The result is
    /// unsigned.
    pub fn fund_transaction(
        &self,
        tx: &mut Transaction,
        request: &BuildRequest,
    ) -> Result<BuiltTransaction, WalletError> {
        if !request.recipients.is_empty() {
            return Err(WalletError::Configuration(
                "a funded transaction supplies its own outputs; recipients must be empty".into(),
            ));
        }

        let mut funding = request.clone();
        funding.recipients = tx
            .outputs
            .iter()
            .map(|o| Recipient::new(o.script_pubkey.clone(), o.value))
            .collect();
        funding.selected_inputs = tx.inputs.iter().map(|i| i.previous_output.clone()).collect();
        funding.allow_other_inputs = true;
        funding.sign = false;
        funding.shuffle = false;

        let built = self.build(&funding)?;

        let original_outputs = tx.outputs.len();
        let original_inputs = tx.inputs.len();
        tx.outputs
            .extend(built.transaction.outputs.iter().skip(original_outputs).cloned());
        for input in &built.transaction.inputs {
            if !tx.spends(&input.previous_output) {
                tx.inputs.push(input.clone());
            }
        }
        info!(
            added_inputs = tx.inputs.len() - original_inputs,
            added_outputs = tx.outputs.len() - original_outputs,
            fee = built.fee,
            "transaction funded"
        );

        Ok(BuiltTransaction {
            transaction: tx.clone(),
            ..built
        })
    }

    /// Free the input leases held by `tx`.
    pub fn release(&self, tx: &Transaction) -> usize {
        self.reservations.release(tx)
    }

    /// Run the pre-assembly stages for `request` against `engine`.
    pub(crate) fn prepare(
        &self,
        engine: &mut dyn AssemblyEngine,
        request: &BuildRequest,
        stages: Stages,
    ) -> Result<Prepared, WalletError> {
        let total = validate_recipients(request)?;
        register_recipients(engine, request)?;

        match &request.multisig {
            Some(descriptor) => {
                let coins = self
                    .index
                    .spendable_multisig_outputs(descriptor, request.min_confirmations)?;
                self.prepare_with(engine, request, total, coins, stages)
            }
            None => {
                let coins = self
                    .index
                    .spendable_outputs(&request.account, request.min_confirmations)?;
                self.prepare_with(engine, request, total, coins, stages)
            }
        }
    }

    fn prepare_with<C: SpendableCoin>(
        &self,
        engine: &mut dyn AssemblyEngine,
        request: &BuildRequest,
        total: u64,
        coins: Vec<C>,
        stages: Stages,
    ) -> Result<Prepared, WalletError> {
        let constraint = InputConstraint {
            required: &request.selected_inputs,
            allow_other: request.selected_inputs.is_empty() || request.allow_other_inputs,
        };
        let coins = select_coins(coins, total, constraint, self.reservations)?;
        register_coins(engine, &coins, &request.selected_inputs);

        if stages == Stages::Build {
            load_secrets(engine, self.keys, request, &coins)?;
        }
        let change_script = match stages {
            Stages::Build | Stages::Estimate => Some(resolve_change(engine, self.index, request)?),
            Stages::Probe => None,
        };
        let fee = resolve_fee(engine, self.fee_policy, request)?;

        Ok(Prepared { fee, change_script })
    }

    /// Fail on policy violations; unsigned builds tolerate missing signatures.
    fn check(
        &self,
        engine: &dyn AssemblyEngine,
        tx: &Transaction,
        signed: bool,
    ) -> Result<(), WalletError> {
        let Err(violations) = engine.verify(tx) else {
            return Ok(());
        };
        let blocking: Vec<PolicyViolation> = violations
            .into_iter()
            .filter(|v| signed || !v.is_signature_gap())
            .collect();
        if blocking.is_empty() {
            return Ok(());
        }
        let reasons = blocking
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        warn!(reasons = %reasons, "transaction failed verification");
        Err(WalletError::TransactionBuild(reasons))
    }
}
