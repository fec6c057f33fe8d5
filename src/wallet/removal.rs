/// Undoing recorded effects: chain rewinds and transaction removal
use bitcoin::{BlockHash, Txid};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use super::ledger::Wallet;
use crate::chain::ChainedHeader;

/// Rewind `wallet` to `fork`.
///
/// Outputs confirmed above the fork are deleted, spends confirmed above it are
/// cleared so the output becomes unspent again. Calling again with the same or
/// a higher fork is a no-op.
pub fn remove_blocks(wallet: &mut Wallet, fork: &ChainedHeader, locator: Vec<BlockHash>) -> usize {
    let mut removed = 0;
    let above_fork = |height: Option<u32>| height.map(|h| h > fork.height).unwrap_or(false);

    let created_above: Vec<_> = wallet
        .store
        .iter()
        .filter(|r| above_fork(r.block_height()))
        .map(|r| r.out_point)
        .collect();
    for out_point in created_above {
        if wallet.store.remove(&out_point).is_some() {
            removed += 1;
        }
    }

    let spent_above: Vec<_> = wallet
        .store
        .iter()
        .filter(|r| {
            above_fork(
                r.spending_details
                    .as_ref()
                    .and_then(|spend| spend.confirmation.height()),
            )
        })
        .map(|r| r.out_point)
        .collect();
    for out_point in &spent_above {
        wallet.store.set_spending_details(out_point, None);
    }

    let rewinds = wallet
        .last_block_synced_height()
        .map(|height| height > fork.height)
        .unwrap_or(true);
    if rewinds {
        wallet.set_last_block_synced(fork, locator);
    }

    if removed > 0 || !spent_above.is_empty() {
        log::info!(
            "Wallet '{}': rewound to height {}, removed {} output(s), unspent {}",
            wallet.name,
            fork.height,
            removed,
            spent_above.len()
        );
    }
    removed
}

/// Remove the given transactions and everything that depends on them.
///
/// The closure starts from the targeted ids the wallet knows about, either as
/// creator of an output or as spender, and grows with unconfirmed spenders of
/// outputs created by removed transactions. Outputs created by the closure are
/// deleted; spends by the closure are cleared. Returns each removed
/// transaction with the time it was first seen.
pub fn remove_transactions(
    wallet: &mut Wallet,
    ids: &HashSet<Txid>,
) -> HashSet<(Txid, DateTime<Utc>)> {
    let closure = removal_closure(wallet, ids);
    if closure.is_empty() {
        return HashSet::new();
    }

    let mut first_seen: HashMap<Txid, DateTime<Utc>> = HashMap::new();
    let mut note = |txid: Txid, time: DateTime<Utc>| {
        first_seen
            .entry(txid)
            .and_modify(|seen| *seen = (*seen).min(time))
            .or_insert(time);
    };

    let created: Vec<_> = wallet
        .store
        .iter()
        .filter(|r| closure.contains(&r.out_point.txid))
        .map(|r| r.out_point)
        .collect();
    for out_point in created {
        if let Some(record) = wallet.store.remove(&out_point) {
            note(record.out_point.txid, record.creation_time);
        }
    }

    let spent: Vec<_> = wallet
        .store
        .iter()
        .filter_map(|r| {
            let spend = r.spending_details.as_ref()?;
            closure
                .contains(&spend.transaction_id)
                .then(|| (r.out_point, spend.transaction_id, spend.creation_time))
        })
        .collect();
    for (out_point, txid, time) in spent {
        wallet.store.set_spending_details(&out_point, None);
        note(txid, time);
    }

    log::info!(
        "Wallet '{}': removed {} transaction(s)",
        wallet.name,
        first_seen.len()
    );
    first_seen.into_iter().collect()
}

/// Remove every transaction recorded by `wallet`.
pub fn remove_all_transactions(wallet: &mut Wallet) -> HashSet<(Txid, DateTime<Utc>)> {
    let ids: HashSet<Txid> = wallet
        .store
        .iter()
        .flat_map(|r| {
            std::iter::once(r.out_point.txid)
                .chain(r.spending_details.as_ref().map(|s| s.transaction_id))
        })
        .collect();
    remove_transactions(wallet, &ids)
}

fn removal_closure(wallet: &Wallet, ids: &HashSet<Txid>) -> HashSet<Txid> {
    let known = |txid: &Txid| {
        wallet.store.iter().any(|r| {
            r.out_point.txid == *txid
                || r.spending_details
                    .as_ref()
                    .map(|s| s.transaction_id == *txid)
                    .unwrap_or(false)
        })
    };

    let mut closure: HashSet<Txid> = ids.iter().copied().filter(|id| known(id)).collect();
    let mut pending: Vec<Txid> = closure.iter().copied().collect();

    while let Some(txid) = pending.pop() {
        for record in wallet.store.get_for_transaction(&txid) {
            let Some(spend) = &record.spending_details else {
                continue;
            };
            if !spend.confirmation.is_confirmed() && closure.insert(spend.transaction_id) {
                pending.push(spend.transaction_id);
            }
        }
    }

    closure
}
