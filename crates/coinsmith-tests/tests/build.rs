//! End-to-end build pipeline tests over a real wallet store.

use coinsmith_core::coin::PoolCoin;
use coinsmith_core::constants::{COIN, MAX_CANDIDATE_COINS};
use coinsmith_core::crypto::KeyPair;
use coinsmith_core::fee::FeeType;
use coinsmith_core::script::{MultisigDescriptor, Script};
use coinsmith_core::traits::{AssemblyEngine, FeePolicy, UtxoIndex};
use coinsmith_core::types::{Hash256, OutPoint, Transaction, TxOutput};
use coinsmith_tests::helpers::*;
use coinsmith_wallet::wallet::ADDRESS_POOL_SIZE;
use coinsmith_wallet::{NativeEngine, WalletError, WalletStore};

#[test]
fn zero_amount_recipient_is_configuration_error() {
    let fx = Fixture::new();
    fx.fund(&[COIN]);
    let err = fx.handler().build(&pay(0)).unwrap_err();
    assert!(matches!(err, WalletError::Configuration(_)), "{err}");
    assert_eq!(fx.engines.last_pool(), Vec::<OutPoint>::new());
}

#[test]
fn empty_account_has_no_spendable_transactions() {
    let fx = Fixture::new();
    let err = fx.handler().build(&pay(COIN)).unwrap_err();
    assert_eq!(
        err,
        WalletError::InsufficientFunds {
            reason: "no spendable transactions found".into(),
            missing: None,
        }
    );
}

#[test]
fn shortfall_is_reported_before_any_fee() {
    let fx = Fixture::new();
    fx.fund(&[COIN, COIN / 2]);
    let err = fx.handler().build(&pay(2 * COIN)).unwrap_err();
    assert_eq!(err.missing_funds(), Some(COIN / 2));
}

#[test]
fn engine_shortfall_is_the_fee() {
    let fx = Fixture::new();
    fx.fund(&[COIN]);
    let err = fx.handler().build(&pay(COIN)).unwrap_err();
    let missing = err.missing_funds().expect("engine shortfall");
    assert!(missing > 0);
    assert!(missing < COIN / 100);
}

#[test]
fn full_balance_payment_misses_exactly_the_fee() {
    let fx = Fixture::new();
    let coin = fx.fund(&[10 * COIN]);
    let err = fx.handler().build(&pay(10 * COIN)).unwrap_err();

    // One input, one output, no change, at the medium rate.
    let mut engine = NativeEngine::default();
    engine.add_coins(vec![PoolCoin {
        outpoint: coin[0].clone(),
        amount: 10 * COIN,
        script_pubkey: Script::p2pkh(&wallet_key(0).public_key().pubkey_hash()),
        redeem_script: None,
    }]);
    engine.send(payee(0xAA), 10 * COIN);
    let fee = engine
        .estimate_fees(fx.fees.fee_rate(FeeType::Medium.confirmation_target()))
        .unwrap();

    assert_eq!(err.missing_funds(), Some(fee));
}

#[test]
fn simple_payment_with_change() {
    let fx = Fixture::new();
    fx.fund(&[2 * COIN, 2 * COIN, COIN]);
    let built = fx.handler().build(&pay(COIN)).unwrap();
    let tx = &built.transaction;

    assert_eq!(tx.outputs.len(), 2);
    assert_eq!(tx.outputs[0].script_pubkey, payee(0xAA));
    assert_eq!(tx.outputs[0].value, COIN);
    assert_eq!(tx.outputs[1].script_pubkey, built.change_script);

    let inputs = fx.input_total(tx);
    assert!(inputs >= COIN + built.fee);
    assert_eq!(inputs - tx.total_output_value().unwrap(), built.fee);
    assert!(tx.inputs.iter().all(|i| i.is_signed()));
}

#[test]
fn change_goes_to_an_unused_wallet_address() {
    let fx = Fixture::new();
    fx.fund(&[3 * COIN]);
    let built = fx.handler().build(&pay(COIN)).unwrap();
    let change_hash = built.change_script.pubkey_hash().unwrap();
    let wallet = fx.store.wallet_by_name(WALLET).unwrap();
    let account = &wallet.accounts()[0];
    let record = account
        .addresses
        .iter()
        .find(|a| a.pubkey_hash == change_hash)
        .expect("change address belongs to the account");
    assert!(record.change);
    assert!(!record.used);
}

#[test]
fn signing_does_not_change_the_shape() {
    let fx = Fixture::new();
    fx.fund(&[COIN, 2 * COIN, 3 * COIN]);

    let mut unsigned = pay(COIN + COIN / 2);
    unsigned.set_sign(false);
    let draft = fx.handler().build(&unsigned).unwrap();
    assert!(fx.reservations.is_empty());

    let signed = fx.handler().build(&pay(COIN + COIN / 2)).unwrap();

    let spent = |tx: &Transaction| -> Vec<OutPoint> {
        tx.inputs.iter().map(|i| i.previous_output.clone()).collect()
    };
    assert_eq!(spent(&draft.transaction), spent(&signed.transaction));
    assert_eq!(draft.transaction.outputs, signed.transaction.outputs);
    assert_eq!(draft.fee, signed.fee);
    assert!(draft.transaction.inputs.iter().all(|i| i.signatures.is_empty()));
    assert!(signed.transaction.inputs.iter().all(|i| i.is_signed()));
}

#[test]
fn estimate_matches_build() {
    let fx = Fixture::new();
    fx.fund(&[COIN, COIN, COIN]);
    let request = pay(2 * COIN);
    let estimate = fx.handler().estimate_fee(&request).unwrap();
    let built = fx.handler().build(&request).unwrap();
    assert_eq!(estimate, built.fee);
}

#[test]
fn explicit_fee_is_paid_verbatim() {
    let fx = Fixture::new();
    fx.fund(&[2 * COIN]);
    let mut request = pay(COIN);
    request.set_fee(123_456);
    let built = fx.handler().build(&request).unwrap();
    assert_eq!(built.fee, 123_456);
    assert_eq!(
        fx.input_total(&built.transaction) - built.transaction.total_output_value().unwrap(),
        123_456
    );
}

#[test]
fn missing_required_input_is_invalid_either_way() {
    let fx = Fixture::new();
    fx.fund(&[COIN, COIN]);
    let unknown = OutPoint::new(Hash256([0xEE; 32]), 3);
    for allow_other in [false, true] {
        let mut request = pay(COIN / 2);
        request.select_inputs(vec![unknown.clone()], allow_other);
        let err = fx.handler().build(&request).unwrap_err();
        assert!(matches!(err, WalletError::InvalidInput(_)), "{err}");
    }
}

#[test]
fn restricted_inputs_pool_exactly_the_selection() {
    let fx = Fixture::new();
    let coins = fx.fund(&[2 * COIN, 2 * COIN, 2 * COIN]);
    let selected = vec![coins[0].clone(), coins[2].clone()];

    let mut request = pay(COIN);
    request.select_inputs(selected.clone(), false);
    let built = fx.handler().build(&request).unwrap();

    let mut pooled = fx.engines.last_pool();
    pooled.sort();
    let mut expected = selected.clone();
    expected.sort();
    assert_eq!(pooled, expected);

    let mut spent = built.spent();
    spent.sort();
    assert_eq!(spent, expected);
}

#[test]
fn open_selection_may_add_coins() {
    let fx = Fixture::new();
    let coins = fx.fund(&[COIN / 2, 3 * COIN]);

    let mut request = pay(2 * COIN);
    request.select_inputs(vec![coins[0].clone()], true);
    let built = fx.handler().build(&request).unwrap();

    assert_eq!(fx.engines.last_pool().len(), 2);
    let spent = built.spent();
    assert!(spent.contains(&coins[0]));
    assert!(spent.contains(&coins[1]));
}

#[test]
fn candidate_pool_is_bounded() {
    let fx = Fixture::new();
    fx.fund(&vec![COIN / 100; 600]);
    let mut request = pay(COIN);
    request.set_sign(false);
    let built = fx.handler().build(&request).unwrap();

    assert_eq!(fx.engines.last_pool().len(), MAX_CANDIDATE_COINS + 1);
    assert!(built.transaction.inputs.len() <= MAX_CANDIDATE_COINS + 1);
}

#[test]
fn op_return_follows_recipients() {
    let fx = Fixture::new();
    fx.fund(&[2 * COIN]);
    let mut request = pay(COIN);
    request
        .add_recipient(payee(0xBB), COIN / 4)
        .set_op_return(b"coinsmith".to_vec(), 0);
    let built = fx.handler().build(&request).unwrap();
    let outputs = &built.transaction.outputs;
    assert_eq!(outputs[0].script_pubkey, payee(0xAA));
    assert_eq!(outputs[1].script_pubkey, payee(0xBB));
    assert!(outputs[2].script_pubkey.is_op_return());
    assert_eq!(outputs[3].script_pubkey, built.change_script);
}

#[test]
fn oversized_op_return_is_rejected() {
    let fx = Fixture::new();
    fx.fund(&[2 * COIN]);
    let mut request = pay(COIN);
    request.set_op_return(vec![0; 81], 0);
    let err = fx.handler().build(&request).unwrap_err();
    assert!(matches!(err, WalletError::Script(_)), "{err}");
}

#[test]
fn signing_requires_the_right_passphrase() {
    let fx = Fixture::new();
    fx.fund(&[2 * COIN]);
    let mut request = pay(COIN);
    request.set_passphrase("wrong");
    assert_eq!(fx.handler().build(&request).unwrap_err(), WalletError::InvalidPassword);
    assert!(fx.reservations.is_empty());
}

#[test]
fn fund_transaction_rejects_recipients() {
    let fx = Fixture::new();
    fx.fund(&[2 * COIN]);
    let mut tx = Transaction::new();
    tx.outputs.push(TxOutput {
        value: COIN,
        script_pubkey: payee(0xAA),
    });
    let err = fx.handler().fund_transaction(&mut tx, &pay(COIN)).unwrap_err();
    assert!(matches!(err, WalletError::Configuration(_)), "{err}");
    assert!(tx.inputs.is_empty());
}

#[test]
fn fund_transaction_appends_inputs_and_change() {
    let fx = Fixture::new();
    fx.fund(&[COIN, 3 * COIN]);
    let payment = TxOutput {
        value: 2 * COIN,
        script_pubkey: payee(0xAA),
    };
    let mut tx = Transaction::new();
    tx.outputs.push(payment.clone());

    let mut request = pay(0);
    request.recipients.clear();
    let funded = fx.handler().fund_transaction(&mut tx, &request).unwrap();

    assert_eq!(tx, funded.transaction);
    assert_eq!(tx.outputs[0], payment);
    assert_eq!(tx.outputs.len(), 2);
    assert_eq!(tx.outputs[1].script_pubkey, funded.change_script);
    assert!(!tx.inputs.is_empty());
    assert!(tx.inputs.iter().all(|i| i.signatures.is_empty()));
    assert_eq!(fx.input_total(&tx) - tx.total_output_value().unwrap(), funded.fee);
    assert!(fx.reservations.is_empty());
}

fn cosigned(fx: &Fixture) -> MultisigDescriptor {
    let ours = wallet_key(1).public_key();
    let theirs = KeyPair::from_secret_bytes([0x77; 32]).public_key();
    let descriptor = MultisigDescriptor::new(2, vec![ours, theirs]).unwrap();
    fx.fund_multisig(&descriptor, 2 * COIN);
    fx.fund_multisig(&descriptor, COIN);
    descriptor
}

#[test]
fn partial_multisig_fails_verification() {
    let fx = Fixture::new();
    let descriptor = cosigned(&fx);
    let mut request = pay(COIN);
    request.set_multisig(descriptor);
    let err = fx.handler().build(&request).unwrap_err();
    assert!(matches!(err, WalletError::TransactionBuild(_)), "{err}");
    assert!(fx.reservations.is_empty());
}

#[test]
fn partial_multisig_with_verification_skipped() {
    let fx = Fixture::new();
    let descriptor = cosigned(&fx);
    let mut request = pay(COIN);
    request.set_multisig(descriptor.clone()).set_skip_verification(true);
    let built = fx.handler().build(&request).unwrap();

    assert_eq!(built.change_script, descriptor.script_pubkey());
    for input in &built.transaction.inputs {
        assert_eq!(input.signatures.len(), 1);
        assert_eq!(input.redeem_script, Some(descriptor.redeem_script()));
    }
}

#[test]
fn unsigned_multisig_passes_verification() {
    let fx = Fixture::new();
    let descriptor = cosigned(&fx);
    let mut request = pay(COIN);
    request.set_multisig(descriptor).set_sign(false);
    let built = fx.handler().build(&request).unwrap();
    assert!(built.transaction.inputs.iter().all(|i| i.signatures.is_empty()));
}

#[test]
fn shuffled_build_keeps_the_same_parts() {
    let fx = Fixture::new();
    fx.fund(&[COIN, COIN, COIN, COIN]);
    let mut request = pay(3 * COIN);
    request
        .add_recipient(payee(0xBB), COIN / 2)
        .set_sign(false)
        .set_shuffle(true);
    let built = fx.handler().build(&request).unwrap();

    let mut values: Vec<u64> = built.transaction.outputs.iter().map(|o| o.value).collect();
    values.sort();
    assert_eq!(values.len(), 3);
    assert!(values.contains(&(3 * COIN)));
    assert!(values.contains(&(COIN / 2)));
    assert_eq!(built.transaction.inputs.len(), 4);
}

#[test]
fn signed_builds_keep_change_addresses_fresh() {
    let fx = Fixture::new();
    let rounds = ADDRESS_POOL_SIZE + 5;
    fx.fund(&vec![2 * COIN; rounds]);

    let mut changes: Vec<Script> = Vec::new();
    for round in 0..rounds {
        let built = fx
            .handler()
            .build(&pay(COIN))
            .unwrap_or_else(|e| panic!("build #{round} failed: {e}"));
        assert!(
            !changes.contains(&built.change_script),
            "change address reused in build #{round}"
        );
        changes.push(built.change_script.clone());
        fx.apply(&built.transaction);
    }
}

#[test]
fn unsigned_builds_reuse_change_once_pool_runs_out() {
    let fx = Fixture::new();
    let rounds = ADDRESS_POOL_SIZE + 3;
    fx.fund(&vec![2 * COIN; rounds]);
    let mut request = pay(COIN);
    request.set_sign(false);

    let mut changes: Vec<Script> = Vec::new();
    for round in 0..rounds {
        let built = fx
            .handler()
            .build(&request)
            .unwrap_or_else(|e| panic!("build #{round} failed: {e}"));
        changes.push(built.change_script.clone());
        fx.apply(&built.transaction);
    }
    let newest = &changes[ADDRESS_POOL_SIZE - 1];
    assert!(changes[ADDRESS_POOL_SIZE..].iter().all(|c| c == newest));
}

#[test]
fn applied_spend_survives_snapshot_reload() {
    let fx = Fixture::new();
    fx.fund(&[2 * COIN, 3 * COIN]);
    let built = fx.handler().build(&pay(COIN)).unwrap();
    fx.apply(&built.transaction);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wallets.json");
    fx.store.save_to_file(&path).unwrap();
    let loaded = WalletStore::load_from_file(&path).unwrap();

    assert_eq!(
        loaded.wallet_by_name(WALLET).unwrap(),
        fx.store.wallet_by_name(WALLET).unwrap()
    );
    assert_eq!(loaded.spendable_balance(&account(), 0).unwrap(), fx.balance());
    assert_ne!(
        loaded.change_script(&account()).unwrap(),
        built.change_script
    );
}
