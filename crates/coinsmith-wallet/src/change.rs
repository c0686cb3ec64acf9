//! Change resolver.
//!
//! Runs before fee estimation, since a change output changes the size the
//! fee is computed for.

use coinsmith_core::script::Script;
use coinsmith_core::traits::{AssemblyEngine, UtxoIndex};

use crate::error::WalletError;
use crate::request::BuildRequest;

/// Pick the change destination and register it with the engine.
///
/// Multisig spends return change to the descriptor itself. Otherwise an
/// explicit override wins over the account's next unused change address.
pub fn resolve_change(
    engine: &mut dyn AssemblyEngine,
    index: &dyn UtxoIndex,
    request: &BuildRequest,
) -> Result<Script, WalletError> {
    let script = match (&request.multisig, &request.change_script) {
        (Some(descriptor), _) => descriptor.script_pubkey(),
        (None, Some(script)) => script.clone(),
        (None, None) => index.change_script(&request.account)?,
    };
    engine.set_change(script.clone());
    Ok(script)
}
