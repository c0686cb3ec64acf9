//! In-memory wallets and the index the transaction handler reads.
//!
//! A [`Wallet`] holds its seed encrypted, a pool of derived addresses per
//! account and the coins paid to them. Address pubkey hashes are stored in
//! the clear so the wallet can be indexed without unlocking; deriving new
//! addresses needs the passphrase, so every unlock through [`KeyStore`]
//! refills the pools. An exhausted pool falls back to reusing its newest
//! address. [`WalletStore`] keeps named wallets behind a lock and serves them
//! through [`UtxoIndex`] and [`KeyStore`].

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use coinsmith_core::coin::{MultisigCoin, WalletCoin};
use coinsmith_core::error::IndexError;
use coinsmith_core::script::{MultisigDescriptor, Script};
use coinsmith_core::traits::UtxoIndex;
use coinsmith_core::types::{AccountRef, Hash256, OutPoint, Transaction};

use crate::encryption::{self, KdfParams};
use crate::error::WalletError;
use crate::keys::{KeyChain, Seed, derive_child_keypair};
use crate::secrets::KeyStore;

/// Unused addresses kept ready per kind (receive and change).
pub const ADDRESS_POOL_SIZE: usize = 20;

/// Name of the account every new wallet starts with.
pub const DEFAULT_ACCOUNT: &str = "account 0";

/// Snapshot format version written by [`WalletStore::save_to_file`].
pub const SNAPSHOT_VERSION: u32 = 1;

/// One derived address of an account.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AddressRecord {
    pub index: u32,
    pub pubkey_hash: Hash256,
    /// Change addresses are never handed out for receiving.
    pub change: bool,
    /// Set once a coin has been paid to the address.
    pub used: bool,
}

impl AddressRecord {
    pub fn script_pubkey(&self) -> Script {
        Script::p2pkh(&self.pubkey_hash)
    }
}

/// A named account: an address pool and the coins it owns.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub index: u32,
    pub addresses: Vec<AddressRecord>,
    pub coins: Vec<WalletCoin>,
}

impl Account {
    fn new(name: String, index: u32) -> Self {
        Self {
            name,
            index,
            addresses: Vec::new(),
            coins: Vec::new(),
        }
    }

    /// Next child index to derive.
    pub fn next_index(&self) -> u32 {
        self.addresses.len() as u32
    }

    pub fn owns(&self, pubkey_hash: &Hash256) -> bool {
        self.addresses.iter().any(|a| &a.pubkey_hash == pubkey_hash)
    }

    fn first_unused(&self, change: bool) -> Option<&AddressRecord> {
        self.addresses.iter().find(|a| a.change == change && !a.used)
    }

    fn last_of_kind(&self, change: bool) -> Option<&AddressRecord> {
        self.addresses.iter().rev().find(|a| a.change == change)
    }

    /// First unused address of the kind, else the newest one.
    fn fresh_or_reused(&self, change: bool) -> Option<&AddressRecord> {
        self.first_unused(change).or_else(|| {
            let reused = self.last_of_kind(change)?;
            warn!(
                account = %self.name,
                index = reused.index,
                change,
                "address pool exhausted, reusing newest address"
            );
            Some(reused)
        })
    }

    fn unused_count(&self, change: bool) -> usize {
        self.addresses
            .iter()
            .filter(|a| a.change == change && !a.used)
            .count()
    }

    fn mark_used(&mut self, pubkey_hash: &Hash256) {
        if let Some(a) = self.addresses.iter_mut().find(|a| &a.pubkey_hash == pubkey_hash) {
            a.used = true;
        }
    }

    /// Total of coins with at least `min_confirmations`.
    pub fn balance(&self, min_confirmations: u32) -> u64 {
        self.coins
            .iter()
            .filter(|c| c.confirmations >= min_confirmations)
            .fold(0u64, |acc, c| acc.saturating_add(c.amount))
    }
}

/// A wallet: encrypted seed, accounts, and watched multisig coins.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Wallet {
    pub name: String,
    #[serde(with = "hex::serde")]
    encrypted_seed: Vec<u8>,
    accounts: Vec<Account>,
    /// Descriptors whose outputs this wallet tracks.
    #[serde(default)]
    descriptors: Vec<MultisigDescriptor>,
    #[serde(default)]
    multisig_coins: Vec<MultisigCoin>,
}

impl Wallet {
    /// Create a wallet around `seed`, encrypting it under `passphrase`.
    ///
    /// The wallet starts with [`DEFAULT_ACCOUNT`] and a full address pool.
    pub fn create(
        name: impl Into<String>,
        seed: &Seed,
        passphrase: &str,
        params: KdfParams,
    ) -> Result<Self, WalletError> {
        let encrypted_seed = encryption::encrypt(seed.as_bytes(), passphrase.as_bytes(), params)?;
        let mut wallet = Self {
            name: name.into(),
            encrypted_seed,
            accounts: Vec::new(),
            descriptors: Vec::new(),
            multisig_coins: Vec::new(),
        };
        wallet.add_account_with_seed(DEFAULT_ACCOUNT, seed)?;
        info!(wallet = %wallet.name, "wallet created");
        Ok(wallet)
    }

    /// Decrypt the seed.
    pub fn unlock_seed(&self, passphrase: &str) -> Result<Seed, WalletError> {
        let mut plain = encryption::decrypt(&self.encrypted_seed, passphrase.as_bytes())?;
        let bytes: [u8; 32] = plain
            .as_slice()
            .try_into()
            .map_err(|_| WalletError::CorruptedKeys(format!("seed is {} bytes", plain.len())))?;
        zeroize::Zeroize::zeroize(&mut plain);
        Ok(Seed::from_bytes(bytes))
    }

    /// Add an account and fill its address pool.
    pub fn add_account(&mut self, name: &str, passphrase: &str) -> Result<&Account, WalletError> {
        let seed = self.unlock_seed(passphrase)?;
        self.add_account_with_seed(name, &seed)
    }

    fn add_account_with_seed(&mut self, name: &str, seed: &Seed) -> Result<&Account, WalletError> {
        if self.accounts.iter().any(|a| a.name == name) {
            return Err(WalletError::Configuration(format!("account {name} already exists")));
        }
        let index = self.accounts.len() as u32;
        self.accounts.push(Account::new(name.to_string(), index));
        let pos = self.accounts.len() - 1;
        top_up_account(&mut self.accounts[pos], seed);
        Ok(&self.accounts[pos])
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn account(&self, name: &str) -> Result<&Account, IndexError> {
        self.accounts
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| IndexError::UnknownAccount(format!("{}/{name}", self.name)))
    }

    fn account_mut(&mut self, name: &str) -> Result<&mut Account, IndexError> {
        let wallet = self.name.clone();
        self.accounts
            .iter_mut()
            .find(|a| a.name == name)
            .ok_or_else(|| IndexError::UnknownAccount(format!("{wallet}/{name}")))
    }

    /// Derive addresses until each kind has [`ADDRESS_POOL_SIZE`] unused.
    pub fn top_up(&mut self, account: &str, passphrase: &str) -> Result<(), WalletError> {
        let seed = self.unlock_seed(passphrase)?;
        let derived = top_up_account(self.account_mut(account)?, &seed);
        debug!(wallet = %self.name, account, derived, "address pool topped up");
        Ok(())
    }

    /// Keys of `account`, derived from the unlocked seed.
    pub fn keychain(&self, account: &str, passphrase: &str) -> Result<KeyChain, WalletError> {
        let acct = self.account(account)?;
        let mut chain = KeyChain::new(self.unlock_seed(passphrase)?, acct.index);
        chain.restore_to_index(acct.next_index());
        Ok(chain)
    }

    /// First unused receive script of `account`, reusing the newest one
    /// when the pool is exhausted.
    pub fn receive_script(&self, account: &str) -> Result<Script, IndexError> {
        self.account(account)?
            .fresh_or_reused(false)
            .map(AddressRecord::script_pubkey)
            .ok_or_else(|| IndexError::Storage("account has no receive addresses".into()))
    }

    /// First unused change script of `account`, reusing the newest one when
    /// the pool is exhausted.
    pub fn change_script(&self, account: &str) -> Result<Script, IndexError> {
        self.account(account)?
            .fresh_or_reused(true)
            .map(AddressRecord::script_pubkey)
            .ok_or_else(|| IndexError::Storage("account has no change addresses".into()))
    }

    /// Record a coin paid to one of the wallet's addresses.
    pub fn add_coin(&mut self, coin: WalletCoin) -> Result<(), WalletError> {
        let account = self
            .accounts
            .iter_mut()
            .find(|a| a.owns(&coin.owner))
            .ok_or_else(|| {
                WalletError::InvalidInput(format!("coin {} is not paid to this wallet", coin.outpoint))
            })?;
        account.mark_used(&coin.owner);
        account.coins.retain(|c| c.outpoint != coin.outpoint);
        debug!(account = %account.name, outpoint = %coin.outpoint, amount = coin.amount, "coin added");
        account.coins.push(coin);
        Ok(())
    }

    /// Track outputs locked to `descriptor`.
    pub fn watch_multisig(&mut self, descriptor: MultisigDescriptor) {
        if !self.descriptors.contains(&descriptor) {
            self.descriptors.push(descriptor);
        }
    }

    pub fn add_multisig_coin(&mut self, coin: MultisigCoin) {
        self.watch_multisig(coin.descriptor.clone());
        self.multisig_coins.retain(|c| c.outpoint != coin.outpoint);
        self.multisig_coins.push(coin);
    }

    pub fn multisig_coins(&self) -> &[MultisigCoin] {
        &self.multisig_coins
    }

    /// Drop coins `tx` spends and record its outputs to our scripts as
    /// unconfirmed coins.
    pub fn apply_transaction(&mut self, tx: &Transaction) -> Result<(), WalletError> {
        for account in &mut self.accounts {
            account.coins.retain(|c| !tx.spends(&c.outpoint));
        }
        self.multisig_coins.retain(|c| !tx.spends(&c.outpoint));

        let txid = tx.txid()?;
        for (index, output) in tx.outputs.iter().enumerate() {
            let outpoint = OutPoint::new(txid, index as u32);
            if let Some(pkh) = output.script_pubkey.pubkey_hash() {
                if self.accounts.iter().any(|a| a.owns(&pkh)) {
                    self.add_coin(WalletCoin::new(outpoint, output.value, pkh, 0))?;
                }
            } else if let Some(descriptor) = self
                .descriptors
                .iter()
                .find(|d| d.script_pubkey() == output.script_pubkey)
                .cloned()
            {
                self.add_multisig_coin(MultisigCoin::new(outpoint, output.value, descriptor, 0));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("name", &self.name)
            .field("accounts", &self.accounts.len())
            .field("multisig_coins", &self.multisig_coins.len())
            .finish()
    }
}

/// Returns how many addresses were derived.
fn top_up_account(account: &mut Account, seed: &Seed) -> usize {
    let before = account.addresses.len();
    for change in [false, true] {
        while account.unused_count(change) < ADDRESS_POOL_SIZE {
            let index = account.next_index();
            let pubkey_hash = derive_child_keypair(seed, account.index, index)
                .public_key()
                .pubkey_hash();
            account.addresses.push(AddressRecord {
                index,
                pubkey_hash,
                change,
                used: false,
            });
        }
    }
    account.addresses.len() - before
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    wallets: Vec<Wallet>,
}

/// Named wallets shared between concurrent builds.
#[derive(Debug, Default)]
pub struct WalletStore {
    wallets: RwLock<BTreeMap<String, Wallet>>,
}

impl WalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a wallet.
    pub fn insert(&self, wallet: Wallet) {
        self.wallets.write().insert(wallet.name.clone(), wallet);
    }

    /// A copy of the named wallet.
    pub fn wallet_by_name(&self, name: &str) -> Result<Wallet, IndexError> {
        self.wallets
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| IndexError::UnknownWallet(name.to_string()))
    }

    /// Run `f` against the named wallet under the write lock.
    pub fn update<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Wallet) -> Result<T, WalletError>,
    ) -> Result<T, WalletError> {
        let mut wallets = self.wallets.write();
        let wallet = wallets
            .get_mut(name)
            .ok_or_else(|| IndexError::UnknownWallet(name.to_string()))?;
        f(wallet)
    }

    pub fn wallet_names(&self) -> Vec<String> {
        self.wallets.read().keys().cloned().collect()
    }

    /// Load a JSON snapshot written by [`save_to_file`](Self::save_to_file).
    pub fn load_from_file(path: &Path) -> Result<Self, WalletError> {
        let data = std::fs::read(path).map_err(|e| WalletError::Io(e.to_string()))?;
        let snapshot: Snapshot = serde_json::from_slice(&data)
            .map_err(|e| WalletError::Serialization(format!("invalid snapshot: {e}")))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(WalletError::Serialization(format!(
                "unsupported snapshot version: {}",
                snapshot.version
            )));
        }
        let store = Self::new();
        for wallet in snapshot.wallets {
            store.insert(wallet);
        }
        Ok(store)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), WalletError> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            wallets: self.wallets.read().values().cloned().collect(),
        };
        let data = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| WalletError::Serialization(e.to_string()))?;
        std::fs::write(path, data).map_err(|e| WalletError::Io(e.to_string()))
    }
}

impl UtxoIndex for WalletStore {
    fn spendable_outputs(
        &self,
        account: &AccountRef,
        min_confirmations: u32,
    ) -> Result<Vec<WalletCoin>, IndexError> {
        let wallets = self.wallets.read();
        let wallet = wallets
            .get(&account.wallet_name)
            .ok_or_else(|| IndexError::UnknownWallet(account.wallet_name.clone()))?;
        Ok(wallet
            .account(&account.account_name)?
            .coins
            .iter()
            .filter(|c| c.confirmations >= min_confirmations)
            .cloned()
            .collect())
    }

    fn spendable_multisig_outputs(
        &self,
        descriptor: &MultisigDescriptor,
        min_confirmations: u32,
    ) -> Result<Vec<MultisigCoin>, IndexError> {
        let wallets = self.wallets.read();
        let mut coins: Vec<MultisigCoin> = Vec::new();
        for wallet in wallets.values() {
            for coin in wallet.multisig_coins() {
                if &coin.descriptor == descriptor
                    && coin.confirmations >= min_confirmations
                    && !coins.iter().any(|c| c.outpoint == coin.outpoint)
                {
                    coins.push(coin.clone());
                }
            }
        }
        Ok(coins)
    }

    fn change_script(&self, account: &AccountRef) -> Result<Script, IndexError> {
        self.wallets
            .read()
            .get(&account.wallet_name)
            .ok_or_else(|| IndexError::UnknownWallet(account.wallet_name.clone()))?
            .change_script(&account.account_name)
    }
}

impl KeyStore for WalletStore {
    /// Decrypt the seed, refill the account's address pools, and derive its
    /// keys.
    fn unlock(&self, account: &AccountRef, passphrase: &str) -> Result<KeyChain, WalletError> {
        let seed = self
            .wallets
            .read()
            .get(&account.wallet_name)
            .ok_or_else(|| IndexError::UnknownWallet(account.wallet_name.clone()))?
            .unlock_seed(passphrase)?;

        let (account_index, next_index) = {
            let mut wallets = self.wallets.write();
            let acct = wallets
                .get_mut(&account.wallet_name)
                .ok_or_else(|| IndexError::UnknownWallet(account.wallet_name.clone()))?
                .account_mut(&account.account_name)?;
            let derived = top_up_account(acct, &seed);
            if derived > 0 {
                debug!(account = %account, derived, "address pool refilled");
            }
            (acct.index, acct.next_index())
        };

        let mut chain = KeyChain::new(seed, account_index);
        chain.restore_to_index(next_index);
        Ok(chain)
    }
}
