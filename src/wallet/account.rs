//! HD accounts and their address sequences.

use bitcoin::bip32::Xpub;
use bitcoin::{Amount, Network, Script};
use chrono::{DateTime, Utc};

use super::address_manager::AddressManager;
use super::output_store::OutputStore;
use super::types::{HdAddress, TransactionOutputData};
use crate::error::WalletError;

/// Accounts at or above this index are reserved for special purposes
/// (cold staking) and skipped by normal account iteration.
pub const SPECIAL_PURPOSE_ACCOUNT_INDEX_START: u32 = 100_000_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HdAccount {
    pub index: u32,
    pub name: String,
    pub hd_path: String,
    pub extended_pub_key: Xpub,
    pub creation_time: DateTime<Utc>,
    pub external_addresses: Vec<HdAddress>,
    pub internal_addresses: Vec<HdAddress>,
}

impl HdAccount {
    pub fn new(
        index: u32,
        name: String,
        hd_path: String,
        extended_pub_key: Xpub,
        creation_time: DateTime<Utc>,
    ) -> Self {
        Self {
            index,
            name,
            hd_path,
            extended_pub_key,
            creation_time,
            external_addresses: Vec::new(),
            internal_addresses: Vec::new(),
        }
    }

    pub fn default_name(index: u32) -> String {
        format!("account {}", index)
    }

    pub fn is_normal_account(&self) -> bool {
        self.index < SPECIAL_PURPOSE_ACCOUNT_INDEX_START
    }

    pub fn addresses(&self, is_change: bool) -> &[HdAddress] {
        if is_change {
            &self.internal_addresses
        } else {
            &self.external_addresses
        }
    }

    /// External addresses followed by internal ones.
    pub fn all_addresses(&self) -> impl Iterator<Item = &HdAddress> {
        self.external_addresses
            .iter()
            .chain(self.internal_addresses.iter())
    }

    pub fn find_address(&self, address: &str) -> Option<&HdAddress> {
        self.all_addresses().find(|a| a.address == address)
    }

    pub fn find_address_mut(&mut self, address: &str) -> Option<&mut HdAddress> {
        self.external_addresses
            .iter_mut()
            .chain(self.internal_addresses.iter_mut())
            .find(|a| a.address == address)
    }

    pub fn is_change_script(&self, script: &Script) -> bool {
        self.internal_addresses
            .iter()
            .any(|a| a.script_pub_key.as_script() == script)
    }

    /// Append `count` addresses to one sequence and return them.
    pub fn create_addresses(
        &mut self,
        network: Network,
        count: u32,
        is_change: bool,
    ) -> Result<Vec<HdAddress>, WalletError> {
        let start = self.addresses(is_change).len() as u32;
        let mut created = Vec::with_capacity(count as usize);

        for index in start..start + count {
            let (pubkey, script_pub_key, address) =
                AddressManager::derive_address(&self.extended_pub_key, is_change, index, network)?;
            created.push(HdAddress {
                index,
                hd_path: format!("{}/{}/{}", self.hd_path, u32::from(is_change), index),
                address: address.to_string(),
                script_pub_key,
                pubkey,
                redeem_script: None,
            });
        }

        if is_change {
            self.internal_addresses.extend(created.iter().cloned());
        } else {
            self.external_addresses.extend(created.iter().cloned());
        }
        Ok(created)
    }

    /// Extend both sequences so at least `buffer` unused addresses follow the
    /// last used one. Returns the addresses that were added.
    pub fn ensure_address_buffer(
        &mut self,
        store: &OutputStore,
        network: Network,
        buffer: u32,
    ) -> Result<Vec<HdAddress>, WalletError> {
        let mut created = Vec::new();
        for is_change in [false, true] {
            let sequence = self.addresses(is_change);
            let len = sequence.len();
            let used_prefix = sequence
                .iter()
                .rposition(|a| store.has_outputs_for(&a.address))
                .map(|p| p + 1)
                .unwrap_or(0);
            let needed = used_prefix + buffer as usize;
            if len < needed {
                let missing = (needed - len) as u32;
                created.extend(self.create_addresses(network, missing, is_change)?);
            }
        }
        Ok(created)
    }

    pub fn get_first_unused_address(&self, store: &OutputStore, is_change: bool) -> Option<&HdAddress> {
        self.addresses(is_change)
            .iter()
            .find(|a| !store.has_outputs_for(&a.address))
    }

    pub fn has_used_addresses(&self, store: &OutputStore) -> bool {
        self.all_addresses().any(|a| store.has_outputs_for(&a.address))
    }

    /// Outputs received by this account's addresses, external first.
    pub fn get_transactions<'a>(
        &'a self,
        store: &'a OutputStore,
    ) -> impl Iterator<Item = (&'a HdAddress, &'a TransactionOutputData)> + 'a {
        self.all_addresses().flat_map(move |address| {
            store
                .get_for_address(&address.address)
                .map(move |output| (address, output))
        })
    }

    /// Confirmed and unconfirmed amounts of unspent outputs.
    ///
    /// Cold staking self-deposits are left out when `exclude_cold_stake` is set.
    pub fn get_balances(&self, store: &OutputStore, exclude_cold_stake: bool) -> (Amount, Amount) {
        let mut confirmed = Amount::ZERO;
        let mut unconfirmed = Amount::ZERO;

        for (_, output) in self.get_transactions(store) {
            if output.is_spent() || (exclude_cold_stake && output.is_cold_coin_stake) {
                continue;
            }
            if output.confirmation.is_confirmed() {
                confirmed += output.amount;
            } else {
                unconfirmed += output.amount;
            }
        }

        (confirmed, unconfirmed)
    }

    /// Unspent outputs with at least `min_confirmations` at chain height `tip`.
    ///
    /// An output at height `h` has `tip - h + 1` confirmations; unconfirmed
    /// outputs only qualify when `min_confirmations` is zero. Outputs claimed
    /// by a pending spend are not offered again.
    pub fn get_spendable_transactions<'a>(
        &'a self,
        store: &'a OutputStore,
        tip: u32,
        min_confirmations: u32,
        exclude_cold_stake: bool,
    ) -> impl Iterator<Item = (&'a HdAddress, &'a TransactionOutputData)> + 'a {
        self.get_transactions(store).filter(move |(_, output)| {
            if output.is_spent() || (exclude_cold_stake && output.is_cold_coin_stake) {
                return false;
            }
            match output.block_height() {
                Some(height) => {
                    i64::from(tip) - i64::from(height) + 1 >= i64::from(min_confirmations)
                }
                None => min_confirmations == 0,
            }
        })
    }
}
