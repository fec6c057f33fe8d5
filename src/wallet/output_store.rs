//! Per-wallet store of owned transaction outputs.
//!
//! Records live in an arena of slots; lookups by outpoint and by owning
//! address are indexes over slot handles, so an address never embeds its
//! own copy of the outputs it received.

use bitcoin::{OutPoint, Txid};
use std::collections::HashMap;

use super::types::{Confirmation, SpendingDetails, TransactionOutputData};

#[derive(Clone, Debug, Default)]
pub struct OutputStore {
    slots: Vec<Option<TransactionOutputData>>,
    free: Vec<usize>,
    by_outpoint: HashMap<OutPoint, usize>,
    /// Handles per address, in insertion order.
    by_address: HashMap<String, Vec<usize>>,
}

impl OutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_outpoint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_outpoint.is_empty()
    }

    /// Insert `record`, or overwrite the record with the same outpoint.
    ///
    /// Returns `false` when an identical record was already stored.
    pub fn insert_or_update(&mut self, record: TransactionOutputData) -> bool {
        if let Some(&handle) = self.by_outpoint.get(&record.out_point) {
            let Some(existing) = self.slots[handle].as_mut() else {
                return false;
            };
            if *existing == record {
                return false;
            }

            if existing.address != record.address {
                let old_address = existing.address.clone();
                self.unlink_address(&old_address, handle);
                self.by_address
                    .entry(record.address.clone())
                    .or_default()
                    .push(handle);
            }
            self.slots[handle] = Some(record);
            return true;
        }

        let handle = match self.free.pop() {
            Some(handle) => handle,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };
        self.by_outpoint.insert(record.out_point, handle);
        self.by_address
            .entry(record.address.clone())
            .or_default()
            .push(handle);
        self.slots[handle] = Some(record);
        true
    }

    pub fn get(&self, out_point: &OutPoint) -> Option<&TransactionOutputData> {
        let handle = *self.by_outpoint.get(out_point)?;
        self.slots[handle].as_ref()
    }

    pub fn contains(&self, out_point: &OutPoint) -> bool {
        self.by_outpoint.contains_key(out_point)
    }

    pub fn remove(&mut self, out_point: &OutPoint) -> Option<TransactionOutputData> {
        let handle = self.by_outpoint.remove(out_point)?;
        let record = self.slots[handle].take()?;
        self.unlink_address(&record.address, handle);
        self.free.push(handle);
        Some(record)
    }

    /// Replace the spending details of a stored output. Returns whether the
    /// record changed.
    pub fn set_spending_details(
        &mut self,
        out_point: &OutPoint,
        spending: Option<SpendingDetails>,
    ) -> bool {
        match self.get_mut(out_point) {
            Some(record) if record.spending_details != spending => {
                record.spending_details = spending;
                true
            }
            _ => false,
        }
    }

    /// Update the confirmation of a stored output. Returns whether the
    /// record changed.
    pub fn set_confirmation(&mut self, out_point: &OutPoint, confirmation: Confirmation) -> bool {
        match self.get_mut(out_point) {
            Some(record) if record.confirmation != confirmation => {
                record.confirmation = confirmation;
                true
            }
            _ => false,
        }
    }

    /// All outputs received by `address`, in insertion order.
    pub fn get_for_address<'a>(
        &'a self,
        address: &str,
    ) -> impl Iterator<Item = &'a TransactionOutputData> + 'a {
        self.by_address
            .get(address)
            .into_iter()
            .flatten()
            .filter_map(move |&handle| self.slots[handle].as_ref())
    }

    pub fn get_for_addresses<'a, I>(
        &'a self,
        addresses: I,
    ) -> impl Iterator<Item = &'a TransactionOutputData> + 'a
    where
        I: IntoIterator<Item = &'a str>,
        I::IntoIter: 'a,
    {
        addresses
            .into_iter()
            .flat_map(move |address| self.get_for_address(address))
    }

    pub fn has_outputs_for(&self, address: &str) -> bool {
        self.by_address
            .get(address)
            .map(|handles| !handles.is_empty())
            .unwrap_or(false)
    }

    /// Outputs created by transaction `txid`.
    pub fn get_for_transaction(&self, txid: &Txid) -> Vec<&TransactionOutputData> {
        self.iter().filter(|r| r.out_point.txid == *txid).collect()
    }

    /// Outputs whose spending details point at transaction `txid`.
    pub fn get_spent_by(&self, txid: &Txid) -> Vec<&TransactionOutputData> {
        self.iter()
            .filter(|r| {
                r.spending_details
                    .as_ref()
                    .map(|spend| spend.transaction_id == *txid)
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransactionOutputData> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.by_outpoint.clear();
        self.by_address.clear();
    }

    fn get_mut(&mut self, out_point: &OutPoint) -> Option<&mut TransactionOutputData> {
        let handle = *self.by_outpoint.get(out_point)?;
        self.slots[handle].as_mut()
    }

    fn unlink_address(&mut self, address: &str, handle: usize) {
        if let Some(handles) = self.by_address.get_mut(address) {
            handles.retain(|h| *h != handle);
            if handles.is_empty() {
                self.by_address.remove(address);
            }
        }
    }
}
