//! A named wallet: encrypted seed, accounts and the outputs they own.

use bitcoin::bip32::{Xpriv, Xpub};
use bitcoin::{BlockHash, Network, Script};
use chrono::{DateTime, Utc};

use super::account::{HdAccount, SPECIAL_PURPOSE_ACCOUNT_INDEX_START};
use super::address_manager::AddressManager;
use super::crypto::{self, EncryptedSeed};
use super::output_store::OutputStore;
use super::types::{AccountBalance, AccountFilter, HdAddress, UnspentOutputReference};
use crate::chain::ChainedHeader;
use crate::config::KdfConfig;
use crate::error::WalletError;

/// Accounts of one coin type plus the wallet's sync position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountRoot {
    pub coin_type: u32,
    pub accounts: Vec<HdAccount>,
    /// Runtime only; never persisted.
    pub last_block_synced_height: Option<u32>,
    /// Runtime only; never persisted.
    pub last_block_synced_hash: Option<BlockHash>,
}

impl AccountRoot {
    pub fn new(coin_type: u32) -> Self {
        Self {
            coin_type,
            accounts: Vec::new(),
            last_block_synced_height: None,
            last_block_synced_hash: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Wallet {
    pub name: String,
    pub network: Network,
    /// Absent for watch-only wallets.
    pub encrypted_seed: Option<EncryptedSeed>,
    /// Hex encoded; absent for watch-only wallets.
    pub chain_code: Option<String>,
    pub creation_time: DateTime<Utc>,
    pub is_ext_pub_key_wallet: bool,
    pub account_root: AccountRoot,
    /// Runtime only; rebuilt from the chain.
    pub block_locator: Vec<BlockHash>,
    pub store: OutputStore,
}

impl Wallet {
    /// Create a wallet whose seed is encrypted under `password`.
    pub fn from_master_key(
        name: &str,
        network: Network,
        coin_type: u32,
        master: &Xpriv,
        password: &str,
        kdf: &KdfConfig,
        creation_time: DateTime<Utc>,
    ) -> Result<Self, WalletError> {
        Ok(Self {
            name: name.to_string(),
            network,
            encrypted_seed: Some(crypto::encrypt_seed(master, password, network, kdf)?),
            chain_code: Some(crypto::chain_code_hex(master)),
            creation_time,
            is_ext_pub_key_wallet: false,
            account_root: AccountRoot::new(coin_type),
            block_locator: Vec::new(),
            store: OutputStore::new(),
        })
    }

    /// Create a wallet with no private key material.
    pub fn watch_only(
        name: &str,
        network: Network,
        coin_type: u32,
        creation_time: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.to_string(),
            network,
            encrypted_seed: None,
            chain_code: None,
            creation_time,
            is_ext_pub_key_wallet: true,
            account_root: AccountRoot::new(coin_type),
            block_locator: Vec::new(),
            store: OutputStore::new(),
        }
    }

    pub fn coin_type(&self) -> u32 {
        self.account_root.coin_type
    }

    /// Decrypt the master key. Fails for watch-only wallets and wrong passwords.
    pub fn decrypt_master_key(&self, password: &str) -> Result<Xpriv, WalletError> {
        let seed = self.encrypted_seed.as_ref().ok_or_else(|| {
            WalletError::Validation(format!(
                "Wallet '{}' is watch-only and holds no private keys.",
                self.name
            ))
        })?;
        crypto::decrypt_seed(seed, password, self.network)
    }

    // ============================================================================
    // Accounts
    // ============================================================================

    pub fn get_accounts(&self, filter: AccountFilter) -> impl Iterator<Item = &HdAccount> {
        self.account_root
            .accounts
            .iter()
            .filter(move |a| filter == AccountFilter::AllAccounts || a.is_normal_account())
    }

    pub fn get_account(&self, name: &str) -> Option<&HdAccount> {
        self.account_root.accounts.iter().find(|a| a.name == name)
    }

    pub fn get_account_mut(&mut self, name: &str) -> Option<&mut HdAccount> {
        self.account_root.accounts.iter_mut().find(|a| a.name == name)
    }

    pub fn get_account_by_index(&self, index: u32) -> Option<&HdAccount> {
        self.account_root.accounts.iter().find(|a| a.index == index)
    }

    pub fn get_account_by_index_mut(&mut self, index: u32) -> Option<&mut HdAccount> {
        self.account_root.accounts.iter_mut().find(|a| a.index == index)
    }

    /// `1 + max(normal account indices)`, or 0 when there are none.
    pub fn next_account_index(&self) -> u32 {
        self.get_accounts(AccountFilter::NormalAccounts)
            .map(|a| a.index + 1)
            .max()
            .unwrap_or(0)
    }

    /// Add the next normal account, deriving its key from the seed.
    pub fn add_new_account(
        &mut self,
        password: &str,
        creation_time: DateTime<Utc>,
    ) -> Result<&HdAccount, WalletError> {
        let index = self.next_account_index();
        self.add_new_account_at(password, index, HdAccount::default_name(index), creation_time)
    }

    /// Add an account at a caller chosen index and name.
    pub fn add_new_account_at(
        &mut self,
        password: &str,
        index: u32,
        name: String,
        creation_time: DateTime<Utc>,
    ) -> Result<&HdAccount, WalletError> {
        self.check_index_free(index)?;
        if self.get_account(&name).is_some() {
            return Err(WalletError::Validation(format!(
                "There is already an account in this wallet with name: {}",
                name
            )));
        }

        let master = self.decrypt_master_key(password)?;
        let xpub = AddressManager::derive_account_xpub(&master, self.coin_type(), index)?;
        Ok(self.push_account(index, name, xpub, creation_time))
    }

    /// Add a watch-only account from an extended public key.
    ///
    /// Without an explicit index the next free normal index is used.
    pub fn add_new_account_from_xpub(
        &mut self,
        xpub: Xpub,
        account_index: Option<u32>,
        creation_time: DateTime<Utc>,
    ) -> Result<&HdAccount, WalletError> {
        if self.account_root.accounts.iter().any(|a| a.extended_pub_key == xpub) {
            return Err(WalletError::Validation(format!(
                "There is already an account in this wallet with this xpubkey: {}",
                xpub
            )));
        }

        let index = match account_index {
            Some(index) => {
                self.check_index_free(index)?;
                index
            }
            None => self.next_account_index(),
        };
        Ok(self.push_account(index, HdAccount::default_name(index), xpub, creation_time))
    }

    fn check_index_free(&self, index: u32) -> Result<(), WalletError> {
        if self.get_account_by_index(index).is_some() {
            return Err(WalletError::Validation(format!(
                "There is already an account in this wallet with index: {}",
                index
            )));
        }
        Ok(())
    }

    fn push_account(
        &mut self,
        index: u32,
        name: String,
        xpub: Xpub,
        creation_time: DateTime<Utc>,
    ) -> &HdAccount {
        let hd_path = AddressManager::account_hd_path(self.coin_type(), index);
        log::debug!("Wallet '{}': adding account '{}' at {}", self.name, name, hd_path);
        self.account_root
            .accounts
            .push(HdAccount::new(index, name, hd_path, xpub, creation_time));
        self.account_root.accounts.sort_by_key(|a| a.index);
        let position = self
            .account_root
            .accounts
            .iter()
            .position(|a| a.index == index)
            .unwrap_or(0);
        &self.account_root.accounts[position]
    }

    /// Top up every account's address sequences. Returns the new addresses.
    pub fn ensure_address_buffer(&mut self, buffer: u32) -> Result<Vec<HdAddress>, WalletError> {
        let mut created = Vec::new();
        let network = self.network;
        for account in self.account_root.accounts.iter_mut() {
            created.extend(account.ensure_address_buffer(&self.store, network, buffer)?);
        }
        Ok(created)
    }

    // ============================================================================
    // Addresses
    // ============================================================================

    pub fn all_addresses(&self) -> impl Iterator<Item = &HdAddress> {
        self.account_root
            .accounts
            .iter()
            .flat_map(|account| account.all_addresses())
    }

    /// Find the account and address record for an encoded address.
    pub fn find_address(&self, address: &str) -> Option<(&HdAccount, &HdAddress)> {
        self.account_root
            .accounts
            .iter()
            .find_map(|account| account.find_address(address).map(|a| (account, a)))
    }

    pub fn is_change_script(&self, script: &Script) -> bool {
        self.account_root
            .accounts
            .iter()
            .any(|account| account.is_change_script(script))
    }

    /// Private key for an owned address.
    pub fn get_extended_private_key_for_address(
        &self,
        password: &str,
        address: &str,
    ) -> Result<Xpriv, WalletError> {
        let (_, hd_address) = self.find_address(address).ok_or_else(|| {
            WalletError::NotFound(format!(
                "Address '{}' could not be found in wallet '{}'.",
                address, self.name
            ))
        })?;
        let master = self.decrypt_master_key(password)?;
        AddressManager::derive_private_key(&master, &hd_address.hd_path)
    }

    // ============================================================================
    // Queries
    // ============================================================================

    pub fn get_balances(&self, filter: AccountFilter) -> Vec<AccountBalance> {
        self.get_accounts(filter)
            .map(|account| self.get_account_balance(account))
            .collect()
    }

    pub fn get_account_balance(&self, account: &HdAccount) -> AccountBalance {
        let (confirmed, unconfirmed) = account.get_balances(&self.store, true);
        AccountBalance {
            account_index: account.index,
            account_name: account.name.clone(),
            hd_path: account.hd_path.clone(),
            confirmed,
            unconfirmed,
        }
    }

    /// Spendable outputs across the accounts selected by `filter`, ordered
    /// by account then address sequence position.
    pub fn get_all_spendable_transactions(
        &self,
        tip: u32,
        min_confirmations: u32,
        filter: AccountFilter,
    ) -> Vec<UnspentOutputReference> {
        self.get_accounts(filter)
            .flat_map(|account| self.spendable_in_account(account, tip, min_confirmations, filter))
            .collect()
    }

    pub fn spendable_in_account(
        &self,
        account: &HdAccount,
        tip: u32,
        min_confirmations: u32,
        filter: AccountFilter,
    ) -> Vec<UnspentOutputReference> {
        account
            .get_spendable_transactions(
                &self.store,
                tip,
                min_confirmations,
                !filter.includes_cold_stake(),
            )
            .map(|(address, output)| UnspentOutputReference {
                account_index: account.index,
                account_name: account.name.clone(),
                address: address.clone(),
                transaction: output.clone(),
                confirmations: output.confirmation.depth(tip),
            })
            .collect()
    }

    // ============================================================================
    // Sync position
    // ============================================================================

    pub fn last_block_synced_height(&self) -> Option<u32> {
        self.account_root.last_block_synced_height
    }

    pub fn last_block_synced_hash(&self) -> Option<BlockHash> {
        self.account_root.last_block_synced_hash
    }

    pub fn set_last_block_synced(&mut self, header: &ChainedHeader, locator: Vec<BlockHash>) {
        self.account_root.last_block_synced_height = Some(header.height);
        self.account_root.last_block_synced_hash = Some(header.hash);
        self.block_locator = locator;
    }
}
