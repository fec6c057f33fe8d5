/// Wallet Manager - Orchestration Layer
///
/// Owns every loaded wallet, the script → owner index and the wallet tip, and
/// delegates the per-wallet work to the modules under `wallet/`.
///
/// Locking: the wallet map is only held long enough to clone a handle, the
/// address index is never held while another lock is taken, and a single
/// wallet is mutated only under its own mutex. `process_lock` serialises
/// block application and rewinds.
use bip39::Mnemonic;
use bitcoin::bip32::Xpriv;
use bitcoin::key::rand;
use bitcoin::{Block, ScriptBuf, Transaction, Txid};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use crate::chain::{ChainIndexer, ChainedHeader};
use crate::config::WalletConfig;
use crate::error::{StorageError, WalletError};
use crate::storage::{Storage, WalletFile, WALLET_FILE_EXTENSION};
use crate::wallet::history::{self, AccountHistory, AccountHistorySlim};
use crate::wallet::processing::{self, BlockContext, ProcessingSettings};
use crate::wallet::{
    removal, script_reader, AccountBalance, AccountFilter, AddressManager, HdAccount, HdAddress,
    UnspentOutputReference, Wallet, WalletAccountReference,
};

/// Wallet and address that own an indexed script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptOwner {
    pub wallet_name: String,
    pub address: String,
}

struct UnlockedKey {
    master: Xpriv,
    expires_at: Option<Instant>,
}

pub struct WalletManager {
    pub config: WalletConfig,
    pub storage: Storage,
    chain: Arc<ChainIndexer>,
    wallets: RwLock<BTreeMap<String, Arc<Mutex<Wallet>>>>,
    keys_lookup: RwLock<HashMap<ScriptBuf, ScriptOwner>>,
    wallet_tip: RwLock<Option<ChainedHeader>>,
    process_lock: Mutex<()>,
    unlocked: Mutex<HashMap<String, UnlockedKey>>,
}

impl WalletManager {
    // ============================================================================
    // Constructor
    // ============================================================================

    pub fn new(config: WalletConfig, storage: Storage, chain: Arc<ChainIndexer>) -> Self {
        Self {
            config,
            storage,
            chain,
            wallets: RwLock::new(BTreeMap::new()),
            keys_lookup: RwLock::new(HashMap::new()),
            wallet_tip: RwLock::new(None),
            process_lock: Mutex::new(()),
            unlocked: Mutex::new(HashMap::new()),
        }
    }

    pub fn chain(&self) -> &Arc<ChainIndexer> {
        &self.chain
    }

    fn processing_settings(&self) -> ProcessingSettings {
        ProcessingSettings {
            address_buffer: self.config.address_buffer,
            conflict_policy: self.config.unconfirmed_conflict_policy,
        }
    }

    // ============================================================================
    // Lifecycle
    // ============================================================================

    /// Load every wallet file, apply the default wallet settings and build
    /// the address index.
    pub fn start(&self) -> Result<(), WalletError> {
        for name in self.storage.list_wallets()? {
            if self.is_loaded(&name) {
                continue;
            }
            let mut wallet = self.read_wallet_file(&name)?;
            wallet.ensure_address_buffer(self.config.address_buffer)?;
            self.resume_from_creation(&mut wallet);
            self.register_wallet(wallet)?;
            log::info!("Loaded wallet '{}'", name);
        }

        if let Some(name) = self.config.default_wallet_name.clone() {
            let password = self.config.default_wallet_password.clone();
            if !self.is_loaded(&name) {
                self.create_wallet(&password, &name, "", None)?;
                log::info!("Created default wallet '{}'", name);
            }
            if self.config.unlock_default_wallet {
                self.unlock_wallet(&password, &name, None)?;
            }
        }

        self.load_keys_lookup();

        if read_lock(&self.wallets).is_empty() {
            *write_lock(&self.wallet_tip) = Some(self.chain.tip());
        }
        log::info!(
            "Wallet manager started with {} wallet(s), {} indexed script(s)",
            read_lock(&self.wallets).len(),
            self.keys_lookup_count()
        );
        Ok(())
    }

    /// Persist every wallet.
    pub fn stop(&self) -> Result<(), WalletError> {
        let saved = self.save_wallets()?;
        log::info!("Wallet manager stopped, saved {} wallet(s)", saved);
        Ok(())
    }

    /// Create a wallet with one account and a full address buffer.
    ///
    /// A fresh 12-word mnemonic is generated when none is supplied.
    pub fn create_wallet(
        &self,
        password: &str,
        name: &str,
        passphrase: &str,
        mnemonic: Option<&str>,
    ) -> Result<Mnemonic, WalletError> {
        self.check_name_free(name)?;

        let mnemonic = match mnemonic {
            Some(words) => parse_mnemonic(words)?,
            None => Mnemonic::from_entropy(&rand::random::<[u8; 16]>())
                .map_err(|e| WalletError::Internal(format!("Failed to generate mnemonic: {}", e)))?,
        };

        let master = self.master_from_mnemonic(&mnemonic, passphrase)?;
        let mut wallet = self.build_wallet(name, password, &master, Utc::now())?;

        let tip = self.chain.tip();
        wallet.set_last_block_synced(&tip, self.chain.get_locator(&tip));

        self.storage.save_wallet(&WalletFile::from(&wallet))?;
        self.register_wallet(wallet)?;
        write_lock(&self.wallet_tip).get_or_insert(tip);

        log::info!("Created wallet '{}'", name);
        Ok(mnemonic)
    }

    /// Recreate a wallet from its mnemonic. Blocks after `creation_time`
    /// must be replayed; the wallet tip is rewound accordingly.
    pub fn recover_wallet(
        &self,
        password: &str,
        name: &str,
        mnemonic: &str,
        creation_time: DateTime<Utc>,
        passphrase: &str,
    ) -> Result<(), WalletError> {
        self.check_name_free(name)?;

        let mnemonic = parse_mnemonic(mnemonic)?;
        let master = self.master_from_mnemonic(&mnemonic, passphrase)?;
        let wallet = self.build_wallet(name, password, &master, creation_time)?;

        self.storage.save_wallet(&WalletFile::from(&wallet))?;
        self.register_wallet(wallet)?;
        self.rewind_tip_for(creation_time);

        log::info!("Recovered wallet '{}'", name);
        Ok(())
    }

    /// Create a watch-only wallet around one account extended public key.
    pub fn recover_wallet_from_xpub(
        &self,
        name: &str,
        xpub: &str,
        account_index: Option<u32>,
        creation_time: DateTime<Utc>,
    ) -> Result<(), WalletError> {
        self.check_name_free(name)?;

        let xpub = AddressManager::parse_xpub(xpub)?;
        let mut wallet = Wallet::watch_only(
            name,
            self.config.network,
            self.config.coin_type(),
            creation_time,
        );
        wallet.add_new_account_from_xpub(xpub, account_index, creation_time)?;
        wallet.ensure_address_buffer(self.config.address_buffer)?;

        self.storage.save_wallet(&WalletFile::from(&wallet))?;
        self.register_wallet(wallet)?;
        self.rewind_tip_for(creation_time);

        log::info!("Recovered watch-only wallet '{}'", name);
        Ok(())
    }

    /// Load a wallet file after checking the password against its seed.
    pub fn load_wallet(&self, password: &str, name: &str) -> Result<(), WalletError> {
        if let Ok(handle) = self.wallet_handle(name) {
            let wallet = lock(&handle);
            if !wallet.is_ext_pub_key_wallet {
                wallet.decrypt_master_key(password)?;
            }
            return Ok(());
        }

        let mut wallet = self.read_wallet_file(name)?;
        if !wallet.is_ext_pub_key_wallet {
            wallet.decrypt_master_key(password)?;
        }
        wallet.ensure_address_buffer(self.config.address_buffer)?;
        self.resume_from_creation(&mut wallet);
        self.register_wallet(wallet)?;

        log::info!("Loaded wallet '{}'", name);
        Ok(())
    }

    /// Snapshot the wallet under its lock, then write it out.
    pub fn save_wallet(&self, name: &str) -> Result<(), WalletError> {
        let file = {
            let handle = self.wallet_handle(name)?;
            let wallet = lock(&handle);
            WalletFile::from(&*wallet)
        };
        self.storage.save_wallet(&file)?;
        log::debug!("Saved wallet '{}'", name);
        Ok(())
    }

    /// Save every loaded wallet. Returns how many were written.
    pub fn save_wallets(&self) -> Result<usize, WalletError> {
        let names = self.get_wallets_names();
        for name in &names {
            self.save_wallet(name)?;
        }
        Ok(names.len())
    }

    pub fn get_wallet_file_extension(&self) -> &'static str {
        WALLET_FILE_EXTENSION
    }

    pub fn get_wallets_names(&self) -> Vec<String> {
        read_lock(&self.wallets).keys().cloned().collect()
    }

    /// Run `f` against a wallet under its lock.
    pub fn with_wallet<R>(&self, name: &str, f: impl FnOnce(&Wallet) -> R) -> Result<R, WalletError> {
        let handle = self.wallet_handle(name)?;
        let wallet = lock(&handle);
        Ok(f(&wallet))
    }

    /// Run a mutation against a wallet under its lock.
    pub fn with_wallet_mut<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Wallet) -> Result<R, WalletError>,
    ) -> Result<R, WalletError> {
        let handle = self.wallet_handle(name)?;
        let mut wallet = lock(&handle);
        f(&mut wallet)
    }

    fn wallet_handle(&self, name: &str) -> Result<Arc<Mutex<Wallet>>, WalletError> {
        read_lock(&self.wallets)
            .get(name)
            .cloned()
            .ok_or_else(|| wallet_not_found(name))
    }

    fn is_loaded(&self, name: &str) -> bool {
        read_lock(&self.wallets).contains_key(name)
    }

    fn check_name_free(&self, name: &str) -> Result<(), WalletError> {
        if name.trim().is_empty() || name.contains(['/', '\\']) {
            return Err(WalletError::Validation(format!(
                "'{}' is not a valid wallet name.",
                name
            )));
        }
        if self.is_loaded(name) || self.storage.wallet_exists(name) {
            return Err(WalletError::Validation(format!(
                "A wallet with name '{}' already exists.",
                name
            )));
        }
        Ok(())
    }

    fn master_from_mnemonic(&self, mnemonic: &Mnemonic, passphrase: &str) -> Result<Xpriv, WalletError> {
        Xpriv::new_master(self.config.network, &mnemonic.to_seed(passphrase))
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))
    }

    fn build_wallet(
        &self,
        name: &str,
        password: &str,
        master: &Xpriv,
        creation_time: DateTime<Utc>,
    ) -> Result<Wallet, WalletError> {
        let mut wallet = Wallet::from_master_key(
            name,
            self.config.network,
            self.config.coin_type(),
            master,
            password,
            &self.config.kdf,
            creation_time,
        )?;
        wallet.add_new_account(password, creation_time)?;
        wallet.ensure_address_buffer(self.config.address_buffer)?;
        Ok(wallet)
    }

    fn read_wallet_file(&self, name: &str) -> Result<Wallet, WalletError> {
        let file = self.storage.load_wallet(name).map_err(|e| match e {
            StorageError::FileNotFound(path) => {
                WalletError::NotFound(format!("No wallet file found at {}", path))
            }
            other => WalletError::Storage(other),
        })?;
        file.into_wallet()
    }

    /// Insert a wallet into the map and index its scripts.
    fn register_wallet(&self, wallet: Wallet) -> Result<(), WalletError> {
        let name = wallet.name.clone();
        let addresses: Vec<HdAddress> = wallet.all_addresses().cloned().collect();
        {
            let mut wallets = write_lock(&self.wallets);
            if wallets.contains_key(&name) {
                return Err(WalletError::Validation(format!(
                    "A wallet with name '{}' already exists.",
                    name
                )));
            }
            wallets.insert(name.clone(), Arc::new(Mutex::new(wallet)));
        }
        self.index_addresses(&name, &addresses);
        Ok(())
    }

    /// Move the wallet tip back so blocks since `creation_time` are replayed.
    fn rewind_tip_for(&self, creation_time: DateTime<Utc>) {
        self.rewind_tip_to(self.fork_for_creation_time(creation_time));
    }

    /// Outputs are not stored in the wallet file, so a loaded wallet syncs
    /// again from the last block before its creation.
    fn resume_from_creation(&self, wallet: &mut Wallet) {
        let fork = self.fork_for_creation_time(wallet.creation_time);
        wallet.set_last_block_synced(&fork, self.chain.get_locator(&fork));
        self.rewind_tip_to(fork);
    }

    /// Set the wallet tip to `fork` when it is unset or above it.
    fn rewind_tip_to(&self, fork: ChainedHeader) {
        let mut tip = write_lock(&self.wallet_tip);
        if tip.as_ref().map(|t| t.height > fork.height).unwrap_or(true) {
            log::info!("Rewinding wallet tip to height {} for replay", fork.height);
            *tip = Some(fork);
        }
    }

    /// Last block strictly before `creation_time`, or genesis.
    fn fork_for_creation_time(&self, creation_time: DateTime<Utc>) -> ChainedHeader {
        let mut fork = self.chain.genesis();
        for height in 1..=self.chain.height() {
            match self.chain.get_header_by_height(height) {
                Some(header) if header.time() < creation_time => fork = header,
                _ => break,
            }
        }
        fork
    }

    // ============================================================================
    // Accounts & Addresses
    // ============================================================================

    pub fn get_accounts(&self, wallet_name: &str, filter: AccountFilter) -> Result<Vec<HdAccount>, WalletError> {
        self.with_wallet(wallet_name, |wallet| wallet.get_accounts(filter).cloned().collect())
    }

    /// First normal account without used addresses, creating one if needed.
    pub fn get_unused_account(&self, wallet_name: &str, password: &str) -> Result<HdAccount, WalletError> {
        let buffer = self.config.address_buffer;
        let (account, created) = self.with_wallet_mut(wallet_name, |wallet| {
            if let Some(account) = wallet
                .get_accounts(AccountFilter::NormalAccounts)
                .find(|a| !a.has_used_addresses(&wallet.store))
            {
                return Ok((account.clone(), false));
            }

            let index = wallet.add_new_account(password, Utc::now())?.index;
            wallet.ensure_address_buffer(buffer)?;
            wallet
                .get_account_by_index(index)
                .cloned()
                .map(|account| (account, true))
                .ok_or_else(|| WalletError::Internal(format!("Account {} vanished", index)))
        })?;

        if created {
            let addresses: Vec<HdAddress> = account.all_addresses().cloned().collect();
            self.index_addresses(wallet_name, &addresses);
            self.save_wallet(wallet_name)?;
        }
        Ok(account)
    }

    pub fn get_unused_address(&self, account: &WalletAccountReference) -> Result<HdAddress, WalletError> {
        self.unused_addresses(account, 1, false)?
            .pop()
            .ok_or_else(|| WalletError::Internal("No unused address available".into()))
    }

    /// `count` unused receive addresses, extending the sequence when short.
    pub fn get_unused_addresses(
        &self,
        account: &WalletAccountReference,
        count: usize,
    ) -> Result<Vec<HdAddress>, WalletError> {
        self.unused_addresses(account, count, false)
    }

    pub fn get_unused_change_address(&self, account: &WalletAccountReference) -> Result<HdAddress, WalletError> {
        self.unused_addresses(account, 1, true)?
            .pop()
            .ok_or_else(|| WalletError::Internal("No unused change address available".into()))
    }

    fn unused_addresses(
        &self,
        reference: &WalletAccountReference,
        count: usize,
        is_change: bool,
    ) -> Result<Vec<HdAddress>, WalletError> {
        let (unused, created) = self.with_wallet_mut(&reference.wallet_name, |wallet| {
            let network = wallet.network;
            let mut unused: Vec<HdAddress> = account_ref(wallet, &reference.account_name)?
                .addresses(is_change)
                .iter()
                .filter(|a| !wallet.store.has_outputs_for(&a.address))
                .take(count)
                .cloned()
                .collect();

            let mut created = Vec::new();
            if unused.len() < count {
                let missing = (count - unused.len()) as u32;
                let account = wallet
                    .get_account_mut(&reference.account_name)
                    .ok_or_else(|| account_not_found(&reference.account_name))?;
                created = account.create_addresses(network, missing, is_change)?;
                unused.extend(created.iter().cloned());
            }
            Ok((unused, created))
        })?;

        if !created.is_empty() {
            self.index_addresses(&reference.wallet_name, &created);
            self.save_wallet(&reference.wallet_name)?;
        }
        Ok(unused)
    }

    // ============================================================================
    // Queries
    // ============================================================================

    /// Balances of every normal account, or of the named one.
    pub fn get_balances(
        &self,
        wallet_name: &str,
        account_name: Option<&str>,
    ) -> Result<Vec<AccountBalance>, WalletError> {
        self.with_wallet(wallet_name, |wallet| match account_name {
            Some(name) => {
                let account = account_ref(wallet, name)?;
                Ok(vec![wallet.get_account_balance(account)])
            }
            None => Ok(wallet.get_balances(AccountFilter::NormalAccounts)),
        })?
    }

    pub fn get_history(
        &self,
        wallet_name: &str,
        account_name: Option<&str>,
        filter: AccountFilter,
    ) -> Result<Vec<AccountHistory>, WalletError> {
        self.with_wallet(wallet_name, |wallet| {
            if let Some(name) = account_name {
                account_ref(wallet, name)?;
            }
            Ok(history::get_history(wallet, account_name, filter))
        })?
    }

    pub fn get_history_slim(
        &self,
        wallet_name: &str,
        account_name: Option<&str>,
        filter: AccountFilter,
    ) -> Result<Vec<AccountHistorySlim>, WalletError> {
        self.with_wallet(wallet_name, |wallet| {
            if let Some(name) = account_name {
                account_ref(wallet, name)?;
            }
            Ok(history::get_history_slim(wallet, account_name, filter))
        })?
    }

    /// Spendable outputs of every normal account with at least
    /// `confirmations` confirmations at the chain tip.
    pub fn get_spendable_transactions_in_wallet(
        &self,
        wallet_name: &str,
        confirmations: u32,
    ) -> Result<Vec<UnspentOutputReference>, WalletError> {
        let tip = self.chain.height();
        self.with_wallet(wallet_name, |wallet| {
            wallet.get_all_spendable_transactions(tip, confirmations, AccountFilter::NormalAccounts)
        })
    }

    pub fn get_spendable_transactions_in_account(
        &self,
        reference: &WalletAccountReference,
        confirmations: u32,
        filter: AccountFilter,
    ) -> Result<Vec<UnspentOutputReference>, WalletError> {
        let tip = self.chain.height();
        self.with_wallet(&reference.wallet_name, |wallet| {
            let account = account_ref(wallet, &reference.account_name)?;
            Ok(wallet.spendable_in_account(account, tip, confirmations, filter))
        })?
    }

    // ============================================================================
    // Transaction & Block Processing
    // ============================================================================

    /// Apply a transaction to every wallet it touches. Returns whether any
    /// wallet recorded it.
    pub fn process_transaction(
        &self,
        tx: &Transaction,
        block: Option<&BlockContext>,
    ) -> Result<bool, WalletError> {
        self.apply_transaction(tx, block, None)
    }

    /// Apply a block extending the wallet tip, then advance every wallet.
    pub fn process_block(&self, block: &Block, header: &ChainedHeader) -> Result<(), WalletError> {
        let _guard = lock(&self.process_lock);
        check_block_header(block, header)?;

        let tip = read_lock(&self.wallet_tip).clone();
        if let Some(tip) = tip {
            self.check_extends(&tip.hash, header)?;
        }

        let context = BlockContext::from_header(header);
        for tx in &block.txdata {
            self.apply_transaction(tx, Some(&context), None)?;
        }

        self.update_last_block_synced_height(header);
        log::debug!("Processed block {} at height {}", header.hash, header.height);
        Ok(())
    }

    /// Apply a block to a single wallet whose own cursor it must extend.
    pub fn process_block_for_wallet(
        &self,
        wallet_name: &str,
        block: &Block,
        header: &ChainedHeader,
    ) -> Result<(), WalletError> {
        let _guard = lock(&self.process_lock);
        check_block_header(block, header)?;

        if let Some(hash) = self.with_wallet(wallet_name, |w| w.last_block_synced_hash())? {
            self.check_extends(&hash, header)?;
        }

        let context = BlockContext::from_header(header);
        for tx in &block.txdata {
            self.apply_transaction(tx, Some(&context), Some(wallet_name))?;
        }

        self.update_wallet_last_block_synced_height(wallet_name, header)
    }

    fn check_extends(&self, tip_hash: &bitcoin::BlockHash, header: &ChainedHeader) -> Result<(), WalletError> {
        if header.previous_hash() == *tip_hash {
            return Ok(());
        }
        if !self.chain.contains(tip_hash) {
            return Err(WalletError::ChainSync(format!(
                "Block {} rejected: wallet tip was not found on the chain",
                header.hash
            )));
        }
        Err(WalletError::ChainSync(format!(
            "Block {} at height {} rejected: block is not the next block after the wallet tip",
            header.hash, header.height
        )))
    }

    fn apply_transaction(
        &self,
        tx: &Transaction,
        block: Option<&BlockContext>,
        only: Option<&str>,
    ) -> Result<bool, WalletError> {
        let owned = self.resolve_owners(tx);
        let handles: Vec<(String, Arc<Mutex<Wallet>>)> = read_lock(&self.wallets)
            .iter()
            .filter(|(name, _)| only.map(|o| o == name.as_str()).unwrap_or(true))
            .map(|(name, handle)| (name.clone(), handle.clone()))
            .collect();

        let settings = self.processing_settings();
        let mut relevant = false;
        let mut new_addresses = Vec::new();

        for (name, handle) in handles {
            let owned_outputs = owned.get(&name).map(Vec::as_slice).unwrap_or(&[]);
            let outcome = {
                let mut wallet = lock(&handle);
                processing::process_transaction(&mut wallet, tx, owned_outputs, block, &settings)?
            };

            relevant |= outcome.relevant && !outcome.skipped;
            if !outcome.evicted.is_empty() {
                log::info!(
                    "Wallet '{}': {} evicted {} conflicting transaction(s)",
                    name,
                    tx.compute_txid(),
                    outcome.evicted.len()
                );
            }
            if !outcome.new_addresses.is_empty() {
                new_addresses.push((name, outcome.new_addresses));
            }
        }

        for (name, addresses) in new_addresses {
            self.index_addresses(&name, &addresses);
        }
        Ok(relevant)
    }

    /// `(vout, address)` pairs of `tx` per owning wallet, one entry per output.
    fn resolve_owners(&self, tx: &Transaction) -> HashMap<String, Vec<(u32, String)>> {
        let index = read_lock(&self.keys_lookup);
        let mut owned: HashMap<String, Vec<(u32, String)>> = HashMap::new();

        for (vout, output) in tx.output.iter().enumerate() {
            let vout = vout as u32;
            for script in script_reader::destinations(&output.script_pubkey) {
                let Some(owner) = index.get(&script) else {
                    continue;
                };
                let entries = owned.entry(owner.wallet_name.clone()).or_default();
                if !entries.iter().any(|(v, _)| *v == vout) {
                    entries.push((vout, owner.address.clone()));
                }
            }
        }
        owned
    }

    // ============================================================================
    // Removal
    // ============================================================================

    /// Undo every block above `fork` in all wallets and rewind the tip.
    pub fn remove_blocks(&self, fork: &ChainedHeader) -> Result<usize, WalletError> {
        let _guard = lock(&self.process_lock);
        let locator = self.chain.get_locator(fork);

        let mut removed = 0;
        for handle in self.wallet_handles() {
            let mut wallet = lock(&handle);
            removed += removal::remove_blocks(&mut wallet, fork, locator.clone());
        }

        let mut tip = write_lock(&self.wallet_tip);
        if tip.as_ref().map(|t| t.height > fork.height).unwrap_or(true) {
            *tip = Some(fork.clone());
        }
        Ok(removed)
    }

    pub fn remove_transactions_by_ids(
        &self,
        wallet_name: &str,
        ids: &[Txid],
    ) -> Result<HashSet<(Txid, DateTime<Utc>)>, WalletError> {
        let ids: HashSet<Txid> = ids.iter().copied().collect();
        self.with_wallet_mut(wallet_name, |wallet| Ok(removal::remove_transactions(wallet, &ids)))
    }

    pub fn remove_all_transactions(
        &self,
        wallet_name: &str,
    ) -> Result<HashSet<(Txid, DateTime<Utc>)>, WalletError> {
        self.with_wallet_mut(wallet_name, |wallet| Ok(removal::remove_all_transactions(wallet)))
    }

    // ============================================================================
    // Address Index
    // ============================================================================

    /// Rebuild the script → owner index from every wallet.
    ///
    /// The entries are collected off to the side and merged in under one
    /// write, so a rebuild never drops addresses indexed concurrently and
    /// parallel rebuilds leave the same entry count.
    pub fn load_keys_lookup(&self) {
        let mut index = HashMap::new();
        for handle in self.wallet_handles() {
            let wallet = lock(&handle);
            for address in wallet.all_addresses() {
                for script in address.scripts() {
                    index.insert(
                        script,
                        ScriptOwner {
                            wallet_name: wallet.name.clone(),
                            address: address.address.clone(),
                        },
                    );
                }
            }
        }
        write_lock(&self.keys_lookup).extend(index);
    }

    pub fn keys_lookup_count(&self) -> usize {
        read_lock(&self.keys_lookup).len()
    }

    pub fn find_script_owner(&self, script: &ScriptBuf) -> Option<ScriptOwner> {
        read_lock(&self.keys_lookup).get(script).cloned()
    }

    pub(crate) fn index_addresses(&self, wallet_name: &str, addresses: &[HdAddress]) {
        let mut index = write_lock(&self.keys_lookup);
        for address in addresses {
            for script in address.scripts() {
                index.insert(
                    script,
                    ScriptOwner {
                        wallet_name: wallet_name.to_string(),
                        address: address.address.clone(),
                    },
                );
            }
        }
    }

    fn wallet_handles(&self) -> Vec<Arc<Mutex<Wallet>>> {
        read_lock(&self.wallets).values().cloned().collect()
    }

    // ============================================================================
    // Sync Position
    // ============================================================================

    /// Move every wallet and the wallet tip to `header`.
    pub fn update_last_block_synced_height(&self, header: &ChainedHeader) {
        let locator = self.chain.get_locator(header);
        for handle in self.wallet_handles() {
            lock(&handle).set_last_block_synced(header, locator.clone());
        }
        *write_lock(&self.wallet_tip) = Some(header.clone());
    }

    pub fn update_wallet_last_block_synced_height(
        &self,
        wallet_name: &str,
        header: &ChainedHeader,
    ) -> Result<(), WalletError> {
        let locator = self.chain.get_locator(header);
        self.with_wallet_mut(wallet_name, |wallet| {
            wallet.set_last_block_synced(header, locator);
            Ok(())
        })
    }

    /// Height of the wallet tip, or of the chain when no tip is set.
    pub fn last_block_height(&self) -> u32 {
        self.wallet_tip()
            .map(|tip| tip.height)
            .unwrap_or_else(|| self.chain.height())
    }

    pub fn wallet_tip(&self) -> Option<ChainedHeader> {
        read_lock(&self.wallet_tip).clone()
    }

    // ============================================================================
    // Keys
    // ============================================================================

    pub fn get_extended_private_key_for_address(
        &self,
        wallet_name: &str,
        password: &str,
        address: &str,
    ) -> Result<Xpriv, WalletError> {
        self.with_wallet(wallet_name, |wallet| {
            wallet.get_extended_private_key_for_address(password, address)
        })?
    }

    /// Keep the decrypted master key in memory for `timeout`, or until
    /// `lock_wallet` when no timeout is given.
    pub fn unlock_wallet(
        &self,
        password: &str,
        wallet_name: &str,
        timeout: Option<Duration>,
    ) -> Result<(), WalletError> {
        let master = self.with_wallet(wallet_name, |wallet| wallet.decrypt_master_key(password))??;
        lock(&self.unlocked).insert(
            wallet_name.to_string(),
            UnlockedKey {
                master,
                expires_at: timeout.map(|t| Instant::now() + t),
            },
        );
        log::info!("Unlocked wallet '{}'", wallet_name);
        Ok(())
    }

    pub fn lock_wallet(&self, wallet_name: &str) {
        if lock(&self.unlocked).remove(wallet_name).is_some() {
            log::info!("Locked wallet '{}'", wallet_name);
        }
    }

    /// Account extended private key of an unlocked wallet.
    pub fn get_ext_key(&self, reference: &WalletAccountReference) -> Result<Xpriv, WalletError> {
        let master = {
            let mut unlocked = lock(&self.unlocked);
            let expired = unlocked
                .get(&reference.wallet_name)
                .and_then(|key| key.expires_at)
                .map(|at| at <= Instant::now())
                .unwrap_or(false);
            if expired {
                unlocked.remove(&reference.wallet_name);
            }
            unlocked
                .get(&reference.wallet_name)
                .map(|key| key.master)
                .ok_or_else(|| {
                    WalletError::Credential(format!(
                        "Wallet '{}' is locked.",
                        reference.wallet_name
                    ))
                })?
        };

        let hd_path = self.with_wallet(&reference.wallet_name, |wallet| {
            account_ref(wallet, &reference.account_name).map(|a| a.hd_path.clone())
        })??;
        AddressManager::derive_private_key(&master, &hd_path)
    }
}

fn check_block_header(block: &Block, header: &ChainedHeader) -> Result<(), WalletError> {
    if block.block_hash() != header.hash {
        return Err(WalletError::Validation(format!(
            "Block {} does not match header {}",
            block.block_hash(),
            header.hash
        )));
    }
    Ok(())
}

fn parse_mnemonic(words: &str) -> Result<Mnemonic, WalletError> {
    Mnemonic::parse(words.trim())
        .map_err(|e| WalletError::Validation(format!("Invalid mnemonic: {}", e)))
}

fn account_ref<'a>(wallet: &'a Wallet, name: &str) -> Result<&'a HdAccount, WalletError> {
    wallet.get_account(name).ok_or_else(|| account_not_found(name))
}

pub(crate) fn wallet_not_found(name: &str) -> WalletError {
    WalletError::NotFound(format!("No wallet with name '{}' could be found.", name))
}

pub(crate) fn account_not_found(name: &str) -> WalletError {
    WalletError::NotFound(format!("No account with the name '{}' could be found.", name))
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
