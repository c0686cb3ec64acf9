//! Build requests.
//!
//! A [`BuildRequest`] describes one transaction the caller wants: who gets
//! paid, which account pays, how the fee is chosen and whether the result
//! is signed. Requests are plain data; the
//! [`TransactionHandler`](crate::handler::TransactionHandler) borrows one
//! per build and never mutates it.

use serde::{Deserialize, Serialize};

use coinsmith_core::fee::{FeeRate, FeeType};
use coinsmith_core::script::{MultisigDescriptor, Script};
use coinsmith_core::types::{AccountRef, OutPoint};

/// A payment output request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    /// Destination locking script.
    pub script_pubkey: Script,
    /// Amount in base units.
    pub amount: u64,
    /// Deduct the fee from this output. Not supported; rejected at validation.
    #[serde(default)]
    pub subtract_fee: bool,
}

impl Recipient {
    pub fn new(script_pubkey: Script, amount: u64) -> Self {
        Self {
            script_pubkey,
            amount,
            subtract_fee: false,
        }
    }
}

/// An OP_RETURN data output attached after the recipients.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OpReturn {
    #[serde(with = "hex::serde")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub amount: u64,
}

/// Everything one build needs to know.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Account that funds the transaction.
    pub account: AccountRef,
    /// Outputs to create, in order.
    pub recipients: Vec<Recipient>,
    /// Priority tier used when neither `fee` nor `fee_rate` is set.
    pub fee_type: FeeType,
    /// Fee rate overriding the tier.
    pub fee_rate: Option<FeeRate>,
    /// Absolute fee, used verbatim.
    pub fee: Option<u64>,
    /// Coins with fewer confirmations are ignored.
    pub min_confirmations: u32,
    /// Inputs the transaction must spend.
    pub selected_inputs: Vec<OutPoint>,
    /// With `selected_inputs` set, whether other coins may be added.
    pub allow_other_inputs: bool,
    pub sign: bool,
    /// Unlocks the account's key material when signing.
    pub passphrase: Option<String>,
    /// Randomize input and output order.
    pub shuffle: bool,
    /// Spend from this multisig descriptor instead of the account's keys.
    pub multisig: Option<MultisigDescriptor>,
    /// Accept a transaction that fails engine policy (e.g. partially signed).
    pub skip_verification: bool,
    /// Change destination overriding the account's change address.
    pub change_script: Option<Script>,
    pub op_return: Option<OpReturn>,
}

impl BuildRequest {
    /// A signed, verified, unshuffled request at medium priority that
    /// spends coins with at least one confirmation.
    pub fn new(account: AccountRef) -> Self {
        Self {
            account,
            recipients: Vec::new(),
            fee_type: FeeType::Medium,
            fee_rate: None,
            fee: None,
            min_confirmations: 1,
            selected_inputs: Vec::new(),
            allow_other_inputs: false,
            sign: true,
            passphrase: None,
            shuffle: false,
            multisig: None,
            skip_verification: false,
            change_script: None,
            op_return: None,
        }
    }

    /// Add a recipient to the transaction.
    pub fn add_recipient(&mut self, script_pubkey: Script, amount: u64) -> &mut Self {
        self.recipients.push(Recipient::new(script_pubkey, amount));
        self
    }

    pub fn set_fee_type(&mut self, fee_type: FeeType) -> &mut Self {
        self.fee_type = fee_type;
        self
    }

    pub fn set_fee_rate(&mut self, rate: FeeRate) -> &mut Self {
        self.fee_rate = Some(rate);
        self
    }

    pub fn set_fee(&mut self, fee: u64) -> &mut Self {
        self.fee = Some(fee);
        self
    }

    pub fn set_min_confirmations(&mut self, min_confirmations: u32) -> &mut Self {
        self.min_confirmations = min_confirmations;
        self
    }

    /// Require `inputs` to be spent; `allow_other` permits additional coins.
    pub fn select_inputs(&mut self, inputs: Vec<OutPoint>, allow_other: bool) -> &mut Self {
        self.selected_inputs = inputs;
        self.allow_other_inputs = allow_other;
        self
    }

    pub fn set_sign(&mut self, sign: bool) -> &mut Self {
        self.sign = sign;
        self
    }

    pub fn set_passphrase(&mut self, passphrase: impl Into<String>) -> &mut Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn set_shuffle(&mut self, shuffle: bool) -> &mut Self {
        self.shuffle = shuffle;
        self
    }

    pub fn set_multisig(&mut self, descriptor: MultisigDescriptor) -> &mut Self {
        self.multisig = Some(descriptor);
        self
    }

    pub fn set_skip_verification(&mut self, skip: bool) -> &mut Self {
        self.skip_verification = skip;
        self
    }

    pub fn set_change_script(&mut self, script: Script) -> &mut Self {
        self.change_script = Some(script);
        self
    }

    pub fn set_op_return(&mut self, data: Vec<u8>, amount: u64) -> &mut Self {
        self.op_return = Some(OpReturn { data, amount });
        self
    }
}
