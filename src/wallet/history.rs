/// History queries over a wallet's output store
use bitcoin::{Amount, Txid};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use super::account::HdAccount;
use super::ledger::Wallet;
use super::types::{AccountFilter, Confirmation, HdAddress, PaymentDetails, TransactionOutputData};

/// One output row together with the address that received it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatHistory {
    pub address: HdAddress,
    pub transaction: TransactionOutputData,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountHistory {
    pub account_index: u32,
    pub account_name: String,
    pub hd_path: String,
    pub history: Vec<FlatHistory>,
}

/// One transaction touching an account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSummary {
    pub transaction_id: Txid,
    pub creation_time: DateTime<Utc>,
    pub confirmation: Confirmation,
    /// Sum of account outputs created by the transaction.
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub received: Amount,
    /// Sum of account outputs spent by the transaction.
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub spent: Amount,
    pub payments: Vec<PaymentDetails>,
    pub is_coinstake: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountHistorySlim {
    pub account_index: u32,
    pub account_name: String,
    pub hd_path: String,
    pub transactions: Vec<TransactionSummary>,
}

/// Used addresses and their outputs, per account.
pub fn get_history(wallet: &Wallet, account_name: Option<&str>, filter: AccountFilter) -> Vec<AccountHistory> {
    selected_accounts(wallet, account_name, filter)
        .map(|account| AccountHistory {
            account_index: account.index,
            account_name: account.name.clone(),
            hd_path: account.hd_path.clone(),
            history: account
                .get_transactions(&wallet.store)
                .filter(|(_, output)| filter.includes_cold_stake() || !output.is_cold_coin_stake)
                .map(|(address, output)| FlatHistory {
                    address: address.clone(),
                    transaction: output.clone(),
                })
                .collect(),
        })
        .collect()
}

/// One entry per transaction touching each account, newest first.
pub fn get_history_slim(
    wallet: &Wallet,
    account_name: Option<&str>,
    filter: AccountFilter,
) -> Vec<AccountHistorySlim> {
    selected_accounts(wallet, account_name, filter)
        .map(|account| {
            let mut by_txid: HashMap<Txid, TransactionSummary> = HashMap::new();

            for (_, output) in account.get_transactions(&wallet.store) {
                if !filter.includes_cold_stake() && output.is_cold_coin_stake {
                    continue;
                }

                let entry = by_txid
                    .entry(output.out_point.txid)
                    .or_insert_with(|| TransactionSummary {
                        transaction_id: output.out_point.txid,
                        creation_time: output.creation_time,
                        confirmation: output.confirmation,
                        received: Amount::ZERO,
                        spent: Amount::ZERO,
                        payments: Vec::new(),
                        is_coinstake: output.is_coinstake,
                    });
                entry.received += output.amount;

                if let Some(spend) = &output.spending_details {
                    let entry = by_txid
                        .entry(spend.transaction_id)
                        .or_insert_with(|| TransactionSummary {
                            transaction_id: spend.transaction_id,
                            creation_time: spend.creation_time,
                            confirmation: spend.confirmation,
                            received: Amount::ZERO,
                            spent: Amount::ZERO,
                            payments: Vec::new(),
                            is_coinstake: spend.is_coinstake,
                        });
                    entry.spent += output.amount;
                    if entry.payments.is_empty() {
                        entry.payments = spend.payments.clone();
                    }
                }
            }

            let mut transactions: Vec<_> = by_txid.into_values().collect();
            transactions.sort_by(|a, b| {
                b.creation_time
                    .cmp(&a.creation_time)
                    .then_with(|| a.transaction_id.cmp(&b.transaction_id))
            });

            AccountHistorySlim {
                account_index: account.index,
                account_name: account.name.clone(),
                hd_path: account.hd_path.clone(),
                transactions,
            }
        })
        .collect()
}

fn selected_accounts<'a>(
    wallet: &'a Wallet,
    account_name: Option<&'a str>,
    filter: AccountFilter,
) -> impl Iterator<Item = &'a HdAccount> + 'a {
    wallet
        .get_accounts(filter)
        .filter(move |account| account_name.map(|name| account.name == name).unwrap_or(true))
}
