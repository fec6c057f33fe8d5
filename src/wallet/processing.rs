/// Transaction ingestion for a single wallet
///
/// Records owned outputs, annotates spent ones and resolves double spends
/// before anything is written.
use bitcoin::{Address, Amount, BlockHash, OutPoint, Transaction, Txid};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

use super::ledger::Wallet;
use super::removal;
use super::script_reader;
use super::types::{Confirmation, HdAddress, PaymentDetails, SpendingDetails, TransactionOutputData};
use crate::chain::ChainedHeader;
use crate::cold_staking::script::ColdStakingScript;
use crate::config::UnconfirmedConflictPolicy;
use crate::error::WalletError;

/// Block a transaction was mined in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockContext {
    pub height: u32,
    pub hash: BlockHash,
    pub time: DateTime<Utc>,
}

impl BlockContext {
    pub fn from_header(header: &ChainedHeader) -> Self {
        Self {
            height: header.height,
            hash: header.hash,
            time: header.time(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ProcessingSettings {
    pub address_buffer: u32,
    pub conflict_policy: UnconfirmedConflictPolicy,
}

#[derive(Debug, Default)]
pub struct ProcessOutcome {
    /// The transaction touched this wallet.
    pub relevant: bool,
    /// The transaction lost a conflict and was not recorded.
    pub skipped: bool,
    /// Addresses appended to keep the address buffer.
    pub new_addresses: Vec<HdAddress>,
    /// Transactions evicted by a winning conflicting spend.
    pub evicted: HashSet<(Txid, DateTime<Utc>)>,
}

enum ConflictResolution {
    Apply(HashSet<Txid>),
    Skip,
}

/// Apply `tx` to `wallet`.
///
/// `owned_outputs` lists `(vout, address)` pairs the address index attributed
/// to this wallet.
pub fn process_transaction(
    wallet: &mut Wallet,
    tx: &Transaction,
    owned_outputs: &[(u32, String)],
    block: Option<&BlockContext>,
    settings: &ProcessingSettings,
) -> Result<ProcessOutcome, WalletError> {
    let txid = tx.compute_txid();
    let mut outcome = ProcessOutcome::default();

    if owned_outputs.is_empty() && spent_prevouts(wallet, tx).is_empty() {
        return Ok(outcome);
    }
    outcome.relevant = true;

    let confirmation = match block {
        Some(block) => Confirmation::at(block.height, block.hash),
        None => Confirmation::Unconfirmed,
    };

    match resolve_conflicts(wallet, tx, txid, &confirmation, settings.conflict_policy) {
        ConflictResolution::Skip => {
            outcome.skipped = true;
            return Ok(outcome);
        }
        ConflictResolution::Apply(evict) if !evict.is_empty() => {
            outcome.evicted = removal::remove_transactions(wallet, &evict);
        }
        ConflictResolution::Apply(_) => {}
    }

    let creation_time = block.map(|b| b.time).unwrap_or_else(Utc::now);
    let is_coinstake = script_reader::is_coinstake(tx);
    let mut touched_accounts = HashSet::new();

    for (vout, address) in owned_outputs {
        let Some(txout) = tx.output.get(*vout as usize) else {
            continue;
        };
        if txout.script_pubkey.is_empty() || txout.value == Amount::ZERO {
            continue;
        }
        let Some((account, hd_address)) = wallet.find_address(address) else {
            log::warn!("Wallet '{}': indexed address {} is unknown", wallet.name, address);
            continue;
        };

        let pays_template = ColdStakingScript::is_cold_staking(&txout.script_pubkey)
            || hd_address
                .redeem_script
                .as_ref()
                .map(|redeem| {
                    ColdStakingScript::is_cold_staking(redeem)
                        && ColdStakingScript::to_p2wsh(redeem) == txout.script_pubkey
                })
                .unwrap_or(false);
        touched_accounts.insert(account.index);

        let out_point = OutPoint::new(txid, *vout);
        let record = match wallet.store.get(&out_point) {
            Some(existing) => {
                let mut record = existing.clone();
                if block.is_some() {
                    record.confirmation = confirmation;
                }
                record.is_propagated = true;
                record
            }
            None => TransactionOutputData {
                out_point,
                address: address.clone(),
                amount: txout.value,
                script_pub_key: txout.script_pubkey.clone(),
                creation_time,
                confirmation,
                is_coinbase: tx.is_coinbase(),
                is_coinstake,
                is_cold_coin_stake: is_coinstake && pays_template,
                is_propagated: true,
                spending_details: None,
            },
        };

        if wallet.store.insert_or_update(record) {
            log::debug!(
                "Wallet '{}': recorded output {} for {} ({})",
                wallet.name,
                out_point,
                address,
                txout.value
            );
        }
    }

    let payments = build_payments(wallet, tx);
    for out_point in spent_prevouts(wallet, tx) {
        let existing = wallet
            .store
            .get(&out_point)
            .and_then(|r| r.spending_details.clone());

        let details = match existing {
            Some(mut details) if details.transaction_id == txid => {
                if block.is_some() {
                    details.confirmation = confirmation;
                }
                details
            }
            _ => SpendingDetails {
                transaction_id: txid,
                confirmation,
                creation_time,
                payments: payments.clone(),
                is_coinstake,
            },
        };

        if wallet.store.set_spending_details(&out_point, Some(details)) {
            log::debug!("Wallet '{}': output {} spent by {}", wallet.name, out_point, txid);
        }
    }

    let network = wallet.network;
    for account in wallet
        .account_root
        .accounts
        .iter_mut()
        .filter(|a| touched_accounts.contains(&a.index))
    {
        outcome.new_addresses.extend(account.ensure_address_buffer(
            &wallet.store,
            network,
            settings.address_buffer,
        )?);
    }

    Ok(outcome)
}

/// Prevouts of `tx` that are outputs owned by `wallet`.
fn spent_prevouts(wallet: &Wallet, tx: &Transaction) -> Vec<OutPoint> {
    tx.input
        .iter()
        .map(|input| input.previous_output)
        .filter(|prevout| wallet.store.contains(prevout))
        .collect()
}

/// Decide whether `tx` may be applied and which recorded spenders it evicts.
///
/// Confirmed spends always win over unconfirmed ones. Two unconfirmed spends
/// are settled by `policy`.
fn resolve_conflicts(
    wallet: &Wallet,
    tx: &Transaction,
    txid: Txid,
    confirmation: &Confirmation,
    policy: UnconfirmedConflictPolicy,
) -> ConflictResolution {
    let mut evict = HashSet::new();

    for out_point in spent_prevouts(wallet, tx) {
        let Some(existing) = wallet
            .store
            .get(&out_point)
            .and_then(|r| r.spending_details.as_ref())
        else {
            continue;
        };
        if existing.transaction_id == txid {
            continue;
        }

        match (confirmation.is_confirmed(), existing.confirmation.is_confirmed()) {
            (true, false) => {
                log::info!(
                    "Wallet '{}': confirmed {} displaces unconfirmed {} on {}",
                    wallet.name,
                    txid,
                    existing.transaction_id,
                    out_point
                );
                evict.insert(existing.transaction_id);
            }
            (true, true) => {
                log::warn!(
                    "Wallet '{}': {} and {} are both confirmed spends of {}; keeping the latest",
                    wallet.name,
                    txid,
                    existing.transaction_id,
                    out_point
                );
                evict.insert(existing.transaction_id);
            }
            (false, true) => {
                log::debug!(
                    "Wallet '{}': ignoring {}, {} is already spent in a block",
                    wallet.name,
                    txid,
                    out_point
                );
                return ConflictResolution::Skip;
            }
            (false, false) => match policy {
                UnconfirmedConflictPolicy::KeepFirstSeen => {
                    log::debug!(
                        "Wallet '{}': ignoring {}, {} is already spent by {}",
                        wallet.name,
                        txid,
                        out_point,
                        existing.transaction_id
                    );
                    return ConflictResolution::Skip;
                }
                UnconfirmedConflictPolicy::ReplaceWithLatest => {
                    evict.insert(existing.transaction_id);
                }
            },
        }
    }

    ConflictResolution::Apply(evict)
}

/// Outputs of a spending transaction that leave the wallet's change branch.
fn build_payments(wallet: &Wallet, tx: &Transaction) -> Vec<PaymentDetails> {
    tx.output
        .iter()
        .enumerate()
        .filter(|(_, output)| {
            !output.script_pubkey.is_empty() && !wallet.is_change_script(&output.script_pubkey)
        })
        .map(|(index, output)| PaymentDetails {
            destination_script_pub_key: output.script_pubkey.clone(),
            destination_address: Address::from_script(&output.script_pubkey, wallet.network)
                .ok()
                .map(|a| a.to_string()),
            amount: output.value,
            output_index: index as u32,
        })
        .collect()
}
