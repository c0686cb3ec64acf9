//! Shared fixtures for the integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use parking_lot::Mutex;

use coinsmith_core::coin::{MultisigCoin, PoolCoin, WalletCoin};
use coinsmith_core::crypto::KeyPair;
use coinsmith_core::error::{EngineError, PolicyViolation};
use coinsmith_core::fee::FeeRate;
use coinsmith_core::script::{MultisigDescriptor, Script};
use coinsmith_core::traits::{AssemblyEngine, EngineFactory, UtxoIndex};
use coinsmith_core::types::{AccountRef, Hash256, OutPoint, Transaction};
use coinsmith_wallet::encryption::KdfParams;
use coinsmith_wallet::keys::derive_child_keypair;
use coinsmith_wallet::wallet::DEFAULT_ACCOUNT;
use coinsmith_wallet::{
    BuildRequest, FeeSchedule, InputReservations, NativeEngineFactory, Seed, TransactionHandler,
    Wallet, WalletStore,
};

pub const WALLET: &str = "main";
pub const PASSPHRASE: &str = "correct horse battery staple";
pub const SEED: [u8; 32] = [0x42; 32];

/// Destination script outside the wallet.
pub fn payee(seed: u8) -> Script {
    Script::p2pkh(&Hash256([seed; 32]))
}

pub fn account() -> AccountRef {
    AccountRef::new(WALLET, DEFAULT_ACCOUNT)
}

/// Key `index` of the fixture wallet's default account.
pub fn wallet_key(index: u32) -> KeyPair {
    derive_child_keypair(&Seed::from_bytes(SEED), 0, index)
}

/// A signed request paying `amount` to [`payee`]`(0xAA)`.
pub fn pay(amount: u64) -> BuildRequest {
    let mut request = BuildRequest::new(account());
    request
        .add_recipient(payee(0xAA), amount)
        .set_passphrase(PASSPHRASE);
    request
}

/// An engine factory that counts engines and records what each one pooled.
#[derive(Default)]
pub struct SpyFactory {
    inner: NativeEngineFactory,
    created: AtomicUsize,
    pools: Arc<Mutex<Vec<Vec<OutPoint>>>>,
}

impl SpyFactory {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Outpoints handed to the most recent engine.
    pub fn last_pool(&self) -> Vec<OutPoint> {
        self.pools.lock().last().cloned().unwrap_or_default()
    }
}

impl EngineFactory for SpyFactory {
    fn create(&self) -> Box<dyn AssemblyEngine> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let slot = {
            let mut pools = self.pools.lock();
            pools.push(Vec::new());
            pools.len() - 1
        };
        Box::new(SpyEngine {
            inner: self.inner.create(),
            pools: Arc::clone(&self.pools),
            slot,
        })
    }
}

struct SpyEngine {
    inner: Box<dyn AssemblyEngine>,
    pools: Arc<Mutex<Vec<Vec<OutPoint>>>>,
    slot: usize,
}

impl AssemblyEngine for SpyEngine {
    fn add_coins(&mut self, coins: Vec<PoolCoin>) {
        self.pools.lock()[self.slot].extend(coins.iter().map(|c| c.outpoint.clone()));
        self.inner.add_coins(coins);
    }

    fn require_input(&mut self, outpoint: OutPoint) {
        self.inner.require_input(outpoint);
    }

    fn add_keys(&mut self, keys: Vec<KeyPair>) {
        self.inner.add_keys(keys);
    }

    fn send(&mut self, script_pubkey: Script, amount: u64) {
        self.inner.send(script_pubkey, amount);
    }

    fn set_change(&mut self, script_pubkey: Script) {
        self.inner.set_change(script_pubkey);
    }

    fn send_fees(&mut self, fee: u64) {
        self.inner.send_fees(fee);
    }

    fn shuffle(&mut self) {
        self.inner.shuffle();
    }

    fn estimate_fees(&self, rate: FeeRate) -> Result<u64, EngineError> {
        self.inner.estimate_fees(rate)
    }

    fn assemble(&mut self, sign: bool) -> Result<Transaction, EngineError> {
        self.inner.assemble(sign)
    }

    fn verify(&self, tx: &Transaction) -> Result<(), Vec<PolicyViolation>> {
        self.inner.verify(tx)
    }
}

/// One wallet in a store, plus everything a handler borrows.
pub struct Fixture {
    pub store: WalletStore,
    pub fees: FeeSchedule,
    pub engines: SpyFactory,
    pub reservations: InputReservations,
    next_txid: AtomicU32,
}

impl Fixture {
    pub fn new() -> Self {
        let wallet = Wallet::create(WALLET, &Seed::from_bytes(SEED), PASSPHRASE, KdfParams::light())
            .expect("wallet");
        let store = WalletStore::new();
        store.insert(wallet);
        Self {
            store,
            fees: FeeSchedule::default(),
            engines: SpyFactory::default(),
            reservations: InputReservations::default(),
            next_txid: AtomicU32::new(1),
        }
    }

    pub fn handler(&self) -> TransactionHandler<'_> {
        TransactionHandler::new(
            &self.store,
            &self.fees,
            &self.store,
            &self.engines,
            &self.reservations,
        )
    }

    fn next_outpoint(&self) -> OutPoint {
        let n = self.next_txid.fetch_add(1, Ordering::SeqCst);
        OutPoint::new(Hash256::digest(&n.to_le_bytes()), 0)
    }

    /// Pay one confirmed coin per amount to the wallet's first receive address.
    pub fn fund(&self, amounts: &[u64]) -> Vec<OutPoint> {
        self.fund_with_confirmations(amounts, 6)
    }

    pub fn fund_with_confirmations(&self, amounts: &[u64], confirmations: u32) -> Vec<OutPoint> {
        let owner = wallet_key(0).public_key().pubkey_hash();
        amounts
            .iter()
            .map(|&amount| {
                let outpoint = self.next_outpoint();
                let coin = WalletCoin::new(outpoint.clone(), amount, owner, confirmations);
                self.store
                    .update(WALLET, |w| w.add_coin(coin))
                    .expect("fund");
                outpoint
            })
            .collect()
    }

    /// Add a confirmed coin locked to `descriptor`.
    pub fn fund_multisig(&self, descriptor: &MultisigDescriptor, amount: u64) -> OutPoint {
        let outpoint = self.next_outpoint();
        let coin = MultisigCoin::new(outpoint.clone(), amount, descriptor.clone(), 6);
        self.store
            .update(WALLET, |w| {
                w.add_multisig_coin(coin);
                Ok(())
            })
            .expect("fund multisig");
        outpoint
    }

    /// Amount of a coin the wallet holds, single-key or multisig.
    pub fn amount_of(&self, outpoint: &OutPoint) -> u64 {
        let wallet = self.store.wallet_by_name(WALLET).expect("wallet");
        wallet
            .accounts()
            .iter()
            .flat_map(|a| a.coins.iter().map(|c| (&c.outpoint, c.amount)))
            .chain(wallet.multisig_coins().iter().map(|c| (&c.outpoint, c.amount)))
            .find(|(op, _)| *op == outpoint)
            .map(|(_, amount)| amount)
            .expect("coin held by wallet")
    }

    /// Sum of the wallet coins `tx` spends.
    pub fn input_total(&self, tx: &Transaction) -> u64 {
        tx.inputs
            .iter()
            .map(|i| self.amount_of(&i.previous_output))
            .sum()
    }

    /// Record `tx` as broadcast: drop its spent coins and add its outputs.
    pub fn apply(&self, tx: &Transaction) {
        self.store
            .update(WALLET, |w| w.apply_transaction(tx))
            .expect("apply");
    }

    pub fn balance(&self) -> u64 {
        self.store
            .spendable_balance(&account(), 0)
            .expect("balance")
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}
