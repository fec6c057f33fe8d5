//! Records held by a wallet and its output store.

use bitcoin::{Amount, BlockHash, OutPoint, PublicKey, ScriptBuf, Txid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a transaction sits relative to the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Confirmation {
    Unconfirmed,
    Confirmed {
        height: u32,
        hash: Option<BlockHash>,
    },
}

impl Confirmation {
    pub fn at(height: u32, hash: BlockHash) -> Self {
        Confirmation::Confirmed {
            height,
            hash: Some(hash),
        }
    }

    pub fn height(&self) -> Option<u32> {
        match self {
            Confirmation::Unconfirmed => None,
            Confirmation::Confirmed { height, .. } => Some(*height),
        }
    }

    pub fn block_hash(&self) -> Option<BlockHash> {
        match self {
            Confirmation::Unconfirmed => None,
            Confirmation::Confirmed { hash, .. } => *hash,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Confirmation::Confirmed { .. })
    }

    /// Depth below `tip`, counting the containing block. Zero when unconfirmed.
    pub fn depth(&self, tip: u32) -> u32 {
        match self.height() {
            Some(height) => (i64::from(tip) - i64::from(height) + 1).max(0) as u32,
            None => 0,
        }
    }
}

/// One output paid by a transaction that spent wallet funds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    pub destination_script_pub_key: ScriptBuf,
    pub destination_address: Option<String>,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub amount: Amount,
    pub output_index: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendingDetails {
    pub transaction_id: Txid,
    pub confirmation: Confirmation,
    pub creation_time: DateTime<Utc>,
    /// Outputs of the spending transaction that did not return to the
    /// wallet's own change addresses.
    pub payments: Vec<PaymentDetails>,
    pub is_coinstake: bool,
}

/// A wallet-owned transaction output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOutputData {
    pub out_point: OutPoint,
    pub address: String,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub amount: Amount,
    pub script_pub_key: ScriptBuf,
    pub creation_time: DateTime<Utc>,
    pub confirmation: Confirmation,
    pub is_coinbase: bool,
    pub is_coinstake: bool,
    pub is_cold_coin_stake: bool,
    pub is_propagated: bool,
    pub spending_details: Option<SpendingDetails>,
}

impl TransactionOutputData {
    pub fn transaction_id(&self) -> Txid {
        self.out_point.txid
    }

    pub fn block_height(&self) -> Option<u32> {
        self.confirmation.height()
    }

    pub fn is_spent(&self) -> bool {
        self.spending_details.is_some()
    }

    pub fn is_spent_confirmed(&self) -> bool {
        self.spending_details
            .as_ref()
            .map(|spend| spend.confirmation.is_confirmed())
            .unwrap_or(false)
    }
}

/// A derived address and everything needed to recognise or spend its outputs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HdAddress {
    pub index: u32,
    pub hd_path: String,
    pub address: String,
    pub script_pub_key: ScriptBuf,
    pub pubkey: PublicKey,
    /// Set on addresses taking part in a pay-to-script cold staking setup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redeem_script: Option<ScriptBuf>,
}

impl HdAddress {
    /// Whether the address sits on the internal (change) branch.
    pub fn is_change(&self) -> bool {
        self.hd_path
            .rsplit('/')
            .nth(1)
            .map(|branch| branch == "1")
            .unwrap_or(false)
    }

    /// Scripts that pay this address: its own and, when set, the P2WSH
    /// wrapping of its redeem script.
    pub fn scripts(&self) -> Vec<ScriptBuf> {
        let mut scripts = vec![self.script_pub_key.clone()];
        if let Some(redeem) = &self.redeem_script {
            scripts.push(ScriptBuf::new_p2wsh(&redeem.wscript_hash()));
        }
        scripts
    }
}

/// Which accounts a wallet-level query covers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccountFilter {
    /// Ordinary spending accounts; cold staking self-deposits are hidden.
    #[default]
    NormalAccounts,
    /// Every account including the reserved cold staking ones.
    AllAccounts,
}

impl AccountFilter {
    pub fn includes_cold_stake(&self) -> bool {
        matches!(self, AccountFilter::AllAccounts)
    }
}

/// Identifies one account inside one wallet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAccountReference {
    pub wallet_name: String,
    pub account_name: String,
}

impl WalletAccountReference {
    pub fn new(wallet_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            wallet_name: wallet_name.into(),
            account_name: account_name.into(),
        }
    }
}

/// An unspent output together with the account and address that own it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnspentOutputReference {
    pub account_index: u32,
    pub account_name: String,
    pub address: HdAddress,
    pub transaction: TransactionOutputData,
    pub confirmations: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalance {
    pub account_index: u32,
    pub account_name: String,
    pub hd_path: String,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub confirmed: Amount,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub unconfirmed: Amount,
}
