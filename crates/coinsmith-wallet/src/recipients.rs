//! Recipient validation and registration.
//!
//! Rejects zero amounts and fee subtraction up front, before any coin is
//! fetched, then registers outputs with the engine in request order. The
//! optional OP_RETURN output is registered last.

use coinsmith_core::script::Script;
use coinsmith_core::traits::AssemblyEngine;

use crate::error::WalletError;
use crate::request::BuildRequest;

/// Validate the request's outputs and return the total amount they send.
pub fn validate_recipients(request: &BuildRequest) -> Result<u64, WalletError> {
    if request.recipients.is_empty() {
        return Err(WalletError::Configuration("no recipients".into()));
    }

    let mut total: u64 = 0;
    for (i, r) in request.recipients.iter().enumerate() {
        if r.amount == 0 {
            return Err(WalletError::Configuration(format!(
                "recipient {i} amount is zero"
            )));
        }
        if r.subtract_fee {
            return Err(WalletError::Configuration(format!(
                "recipient {i} requests fee subtraction, which is not supported"
            )));
        }
        total = total
            .checked_add(r.amount)
            .ok_or_else(|| WalletError::Configuration("total amount overflow".into()))?;
    }

    if let Some(op_return) = &request.op_return {
        Script::op_return(&op_return.data)?;
        total = total
            .checked_add(op_return.amount)
            .ok_or_else(|| WalletError::Configuration("total amount overflow".into()))?;
    }

    Ok(total)
}

/// Register every output with the engine, recipients first, in list order.
pub fn register_recipients(
    engine: &mut dyn AssemblyEngine,
    request: &BuildRequest,
) -> Result<(), WalletError> {
    for r in &request.recipients {
        engine.send(r.script_pubkey.clone(), r.amount);
    }
    if let Some(op_return) = &request.op_return {
        engine.send(Script::op_return(&op_return.data)?, op_return.amount);
    }
    Ok(())
}
