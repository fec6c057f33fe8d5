use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WalletError;
use crate::wallet::crypto::EncryptedSeed;
use crate::wallet::{AccountRoot, AddressManager, HdAccount, HdAddress, OutputStore, Wallet};

/// On-disk form of a wallet (`{name}.wallet.json`).
///
/// Sync height, sync hash, the block locator and the outputs are runtime
/// state. A loaded wallet replays the chain from its creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletFile {
    pub name: String,
    pub network: bitcoin::Network,
    pub is_ext_pub_key_wallet: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_seed: Option<EncryptedSeed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_code: Option<String>,
    pub creation_time: DateTime<Utc>,
    pub account_roots: Vec<AccountRootFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRootFile {
    pub coin_type: u32,
    pub accounts: Vec<AccountFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountFile {
    pub index: u32,
    pub name: String,
    pub hd_path: String,
    pub extended_pub_key: String,
    pub creation_time: DateTime<Utc>,
    pub external_addresses: Vec<HdAddress>,
    pub internal_addresses: Vec<HdAddress>,
}

impl From<&Wallet> for WalletFile {
    fn from(wallet: &Wallet) -> Self {
        Self {
            name: wallet.name.clone(),
            network: wallet.network,
            is_ext_pub_key_wallet: wallet.is_ext_pub_key_wallet,
            encrypted_seed: wallet.encrypted_seed.clone(),
            chain_code: wallet.chain_code.clone(),
            creation_time: wallet.creation_time,
            account_roots: vec![AccountRootFile {
                coin_type: wallet.account_root.coin_type,
                accounts: wallet
                    .account_root
                    .accounts
                    .iter()
                    .map(|account| AccountFile {
                        index: account.index,
                        name: account.name.clone(),
                        hd_path: account.hd_path.clone(),
                        extended_pub_key: account.extended_pub_key.to_string(),
                        creation_time: account.creation_time,
                        external_addresses: account.external_addresses.clone(),
                        internal_addresses: account.internal_addresses.clone(),
                    })
                    .collect(),
            }],
        }
    }
}

impl WalletFile {
    /// Rebuild a runtime wallet. The sync position starts unset.
    pub fn into_wallet(self) -> Result<Wallet, WalletError> {
        let root = self.account_roots.into_iter().next().ok_or_else(|| {
            WalletError::Validation(format!("Wallet file '{}' has no account root.", self.name))
        })?;

        let mut account_root = AccountRoot::new(root.coin_type);
        for file in root.accounts {
            let mut account = HdAccount::new(
                file.index,
                file.name,
                file.hd_path,
                AddressManager::parse_xpub(&file.extended_pub_key)?,
                file.creation_time,
            );
            account.external_addresses = file.external_addresses;
            account.internal_addresses = file.internal_addresses;
            account_root.accounts.push(account);
        }
        account_root.accounts.sort_by_key(|a| a.index);

        Ok(Wallet {
            name: self.name,
            network: self.network,
            encrypted_seed: self.encrypted_seed,
            chain_code: self.chain_code,
            creation_time: self.creation_time,
            is_ext_pub_key_wallet: self.is_ext_pub_key_wallet,
            account_root,
            block_locator: Vec::new(),
            store: OutputStore::new(),
        })
    }
}
