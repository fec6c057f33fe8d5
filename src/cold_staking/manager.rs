/// Cold Staking Manager
///
/// Keeps the two reserved accounts of a wallet and builds the setup and
/// withdrawal transactions on top of the wallet manager's selection and
/// signing machinery.
use bitcoin::{Amount, ScriptBuf, Transaction, TxOut};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use super::script::{parse_address, ColdStakingScript};
use crate::error::WalletError;
use crate::manager::WalletManager;
use crate::policy::{CoinView, MempoolValidator};
use crate::transaction::{InputSigningData, TransactionBuilder, TransactionSigner, UnsignedTransaction};
use crate::wallet::{
    AccountFilter, AddressManager, HdAccount, HdAddress, UnspentOutputReference,
    WalletAccountReference, SPECIAL_PURPOSE_ACCOUNT_INDEX_START,
};

pub const COLD_WALLET_ACCOUNT_INDEX: u32 = SPECIAL_PURPOSE_ACCOUNT_INDEX_START;
pub const HOT_WALLET_ACCOUNT_INDEX: u32 = SPECIAL_PURPOSE_ACCOUNT_INDEX_START + 1;
pub const COLD_WALLET_ACCOUNT_NAME: &str = "coldStakingCold";
pub const HOT_WALLET_ACCOUNT_NAME: &str = "coldStakingHot";

/// Confirmations an output needs before setup or withdrawal may spend it.
pub const MIN_CONFIRMATIONS: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColdStakingInfo {
    pub cold_wallet_account_exists: bool,
    pub hot_wallet_account_exists: bool,
}

#[derive(Clone, Debug)]
pub struct SetupColdStakingParams {
    pub wallet_name: String,
    /// Normal account funding the setup.
    pub account_name: String,
    pub hot_address: String,
    pub cold_address: String,
    pub password: String,
    pub amount: Amount,
    pub fee: Amount,
    /// Lock the amount under the P2WSH of the template instead of the bare script.
    pub pay_to_script: bool,
}

#[derive(Clone, Debug)]
pub struct ColdStakingWithdrawalParams {
    pub wallet_name: String,
    pub receiving_address: String,
    pub password: String,
    pub amount: Amount,
    pub fee: Amount,
}

fn account_slot(is_cold: bool) -> (u32, &'static str) {
    if is_cold {
        (COLD_WALLET_ACCOUNT_INDEX, COLD_WALLET_ACCOUNT_NAME)
    } else {
        (HOT_WALLET_ACCOUNT_INDEX, HOT_WALLET_ACCOUNT_NAME)
    }
}

pub struct ColdStakingManager {
    wallets: Arc<WalletManager>,
    builder: TransactionBuilder,
    signer: TransactionSigner,
}

impl ColdStakingManager {
    pub fn new(wallets: Arc<WalletManager>) -> Self {
        Self {
            wallets,
            builder: TransactionBuilder::new(),
            signer: TransactionSigner::new(),
        }
    }

    pub fn wallet_manager(&self) -> &Arc<WalletManager> {
        &self.wallets
    }

    // ============================================================================
    // Reserved Accounts
    // ============================================================================

    pub fn get_cold_staking_account(
        &self,
        wallet_name: &str,
        is_cold_wallet_account: bool,
    ) -> Result<Option<HdAccount>, WalletError> {
        let (index, _) = account_slot(is_cold_wallet_account);
        self.wallets
            .with_wallet(wallet_name, |wallet| wallet.get_account_by_index(index).cloned())
    }

    /// Return the reserved account, creating it with a full address buffer
    /// on first use.
    pub fn get_or_create_cold_staking_account(
        &self,
        wallet_name: &str,
        is_cold_wallet_account: bool,
        password: &str,
    ) -> Result<HdAccount, WalletError> {
        let (index, name) = account_slot(is_cold_wallet_account);
        let buffer = self.wallets.config.address_buffer;

        let (account, created) = self.wallets.with_wallet_mut(wallet_name, |wallet| {
            if let Some(account) = wallet.get_account_by_index(index) {
                return Ok((account.clone(), false));
            }

            let network = wallet.network;
            wallet.add_new_account_at(password, index, name.to_string(), Utc::now())?;
            let account = wallet
                .get_account_by_index_mut(index)
                .ok_or_else(|| WalletError::Internal(format!("Account {} vanished", name)))?;
            account.create_addresses(network, buffer, false)?;
            account.create_addresses(network, buffer, true)?;
            Ok((account.clone(), true))
        })?;

        if created {
            log::info!("Wallet '{}': created cold staking account '{}'", wallet_name, name);
            let addresses: Vec<HdAddress> = account.all_addresses().cloned().collect();
            self.wallets.index_addresses(wallet_name, &addresses);
            self.wallets.save_wallet(wallet_name)?;
        }
        Ok(account)
    }

    /// First unused receive address of the reserved account, if it exists.
    pub fn get_first_unused_cold_staking_address(
        &self,
        wallet_name: &str,
        is_cold_wallet_address: bool,
    ) -> Result<Option<HdAddress>, WalletError> {
        let (_, name) = account_slot(is_cold_wallet_address);
        if self
            .get_cold_staking_account(wallet_name, is_cold_wallet_address)?
            .is_none()
        {
            return Ok(None);
        }
        self.wallets
            .get_unused_address(&WalletAccountReference::new(wallet_name, name))
            .map(Some)
    }

    pub fn get_cold_staking_address(
        &self,
        wallet_name: &str,
        is_cold_wallet_address: bool,
    ) -> Result<HdAddress, WalletError> {
        self.get_first_unused_cold_staking_address(wallet_name, is_cold_wallet_address)?
            .ok_or_else(|| {
                WalletError::Validation("The cold staking account does not exist.".into())
            })
    }

    pub fn get_cold_staking_info(&self, wallet_name: &str) -> Result<ColdStakingInfo, WalletError> {
        self.wallets.with_wallet(wallet_name, |wallet| ColdStakingInfo {
            cold_wallet_account_exists: wallet.get_account_by_index(COLD_WALLET_ACCOUNT_INDEX).is_some(),
            hot_wallet_account_exists: wallet.get_account_by_index(HOT_WALLET_ACCOUNT_INDEX).is_some(),
        })
    }

    // ============================================================================
    // Scripts
    // ============================================================================

    /// Template for a hot and a cold key hash address.
    pub fn build_script(&self, hot_address: &str, cold_address: &str) -> Result<ScriptBuf, WalletError> {
        let network = self.wallets.config.network;
        let hot = ColdStakingScript::key_hash_from_address(hot_address, network)?;
        let cold = ColdStakingScript::key_hash_from_address(cold_address, network)?;
        Ok(ColdStakingScript::build(&hot, &cold))
    }

    /// Remember `redeem_script` on an owned address and index its P2WSH.
    fn record_redeem_script(
        &self,
        wallet_name: &str,
        account_index: u32,
        address: &str,
        redeem_script: &ScriptBuf,
    ) -> Result<(), WalletError> {
        let updated = self.wallets.with_wallet_mut(wallet_name, |wallet| {
            let hd_address = wallet
                .get_account_by_index_mut(account_index)
                .and_then(|account| account.find_address_mut(address))
                .ok_or_else(|| {
                    WalletError::NotFound(format!(
                        "Address '{}' could not be found in wallet '{}'.",
                        address, wallet_name
                    ))
                })?;
            hd_address.redeem_script = Some(redeem_script.clone());
            Ok(hd_address.clone())
        })?;

        self.wallets.index_addresses(wallet_name, &[updated]);
        self.wallets.save_wallet(wallet_name)
    }

    // ============================================================================
    // Setup & Withdrawal
    // ============================================================================

    /// Build and sign a transaction locking `amount` under the cold staking
    /// template. Outputs: change first, then the cold staking output.
    pub fn setup_cold_staking(&self, params: &SetupColdStakingParams) -> Result<Transaction, WalletError> {
        let wallet_name = params.wallet_name.as_str();
        log::info!(
            "Wallet '{}': setting up cold staking of {} (hot {}, cold {})",
            wallet_name,
            params.amount.display_in(bitcoin::Denomination::Bitcoin).show_denomination(),
            params.hot_address,
            params.cold_address
        );

        let cold_account = self.get_or_create_cold_staking_account(wallet_name, true, &params.password)?;
        let hot_account = self.get_or_create_cold_staking_account(wallet_name, false, &params.password)?;

        let this_is_cold_wallet = cold_account.find_address(&params.cold_address).is_some();
        let this_is_hot_wallet = hot_account.find_address(&params.hot_address).is_some();
        match (this_is_cold_wallet, this_is_hot_wallet) {
            (true, true) => {
                return Err(WalletError::Validation(
                    "You can't use this wallet as both hot wallet and cold wallet.".into(),
                ))
            }
            (false, false) => {
                return Err(WalletError::Validation(
                    "The hot and cold wallet addresses could not be found in the corresponding accounts."
                        .into(),
                ))
            }
            _ => {}
        }

        let source = self
            .wallets
            .with_wallet(wallet_name, |wallet| {
                wallet
                    .get_account(&params.account_name)
                    .filter(|account| account.is_normal_account())
                    .cloned()
            })?
            .ok_or_else(|| {
                WalletError::Validation(format!(
                    "Can't find wallet account '{}'.",
                    params.account_name
                ))
            })?;

        let script = self.build_script(&params.hot_address, &params.cold_address)?;
        let destination = if params.pay_to_script {
            let (account_index, address) = if this_is_cold_wallet {
                (cold_account.index, &params.cold_address)
            } else {
                (hot_account.index, &params.hot_address)
            };
            self.record_redeem_script(wallet_name, account_index, address, &script)?;
            ColdStakingScript::to_p2wsh(&script)
        } else {
            script
        };

        let reference = WalletAccountReference::new(wallet_name, source.name.clone());
        let available = self.wallets.get_spendable_transactions_in_account(
            &reference,
            MIN_CONFIRMATIONS,
            AccountFilter::NormalAccounts,
        )?;
        let change = self.wallets.get_unused_change_address(&reference)?;

        let unsigned = self.builder.build_with_change(
            &available,
            vec![TxOut {
                value: params.amount,
                script_pubkey: destination,
            }],
            params.fee,
            change.script_pub_key,
        )?;

        let tx = self.sign_and_check(wallet_name, &params.password, unsigned)?;
        log::info!("Wallet '{}': cold staking setup {}", wallet_name, tx.compute_txid());
        Ok(tx)
    }

    /// Build and sign a transaction paying `amount` out of the cold account.
    /// Outputs: the remainder under the spent template first, then the payment.
    pub fn withdraw(&self, params: &ColdStakingWithdrawalParams) -> Result<Transaction, WalletError> {
        let wallet_name = params.wallet_name.as_str();
        let network = self.wallets.config.network;

        let cold_account = self
            .get_cold_staking_account(wallet_name, true)?
            .ok_or_else(|| WalletError::Validation("The cold wallet account does not exist.".into()))?;

        if cold_account.find_address(&params.receiving_address).is_some() {
            return Err(WalletError::Validation(
                "You can't send the money to a cold staking cold wallet account.".into(),
            ));
        }
        let destination = parse_address(&params.receiving_address, network)?.script_pubkey();

        let reference = WalletAccountReference::new(wallet_name, COLD_WALLET_ACCOUNT_NAME);
        let available = self.wallets.get_spendable_transactions_in_account(
            &reference,
            MIN_CONFIRMATIONS,
            AccountFilter::AllAccounts,
        )?;
        // Plain payments to a cold address are not part of the staked balance
        let available: Vec<_> = available.into_iter().filter(pays_template).collect();

        let target = params
            .amount
            .checked_add(params.fee)
            .ok_or_else(|| WalletError::Validation("Amount plus fee overflows.".into()))?;
        let selected = self.builder.select_utxos(&available, target)?;
        let change_script = selected
            .first()
            .map(|utxo| utxo.transaction.script_pub_key.clone())
            .ok_or_else(|| WalletError::Validation("There are no cold staking coins to withdraw.".into()))?;

        let unsigned = self.builder.build_with_change(
            &selected,
            vec![TxOut {
                value: params.amount,
                script_pubkey: destination,
            }],
            params.fee,
            change_script,
        )?;

        let tx = self.sign_and_check(wallet_name, &params.password, unsigned)?;
        log::info!("Wallet '{}': cold staking withdrawal {}", wallet_name, tx.compute_txid());
        Ok(tx)
    }

    /// Sign with keys derived from the wallet seed, then run the relay checks.
    fn sign_and_check(
        &self,
        wallet_name: &str,
        password: &str,
        unsigned: UnsignedTransaction,
    ) -> Result<Transaction, WalletError> {
        let master = self
            .wallets
            .with_wallet(wallet_name, |wallet| wallet.decrypt_master_key(password))??;

        let inputs = unsigned
            .inputs
            .iter()
            .map(|utxo| {
                Ok(InputSigningData {
                    prevout: TxOut {
                        value: utxo.transaction.amount,
                        script_pubkey: utxo.transaction.script_pub_key.clone(),
                    },
                    key: AddressManager::derive_private_key(&master, &utxo.address.hd_path)?.to_priv(),
                    witness_script: utxo.address.redeem_script.clone(),
                })
            })
            .collect::<Result<Vec<_>, WalletError>>()?;

        let tx = self.signer.sign_transaction(unsigned.tx, &inputs)?;

        let mut view = CoinView::new();
        for (utxo, data) in unsigned.inputs.iter().zip(&inputs) {
            view.add(utxo.transaction.out_point, data.prevout.clone());
        }
        MempoolValidator::standard()?.accept(&tx, &view)?;
        Ok(tx)
    }
}

/// Whether the output is locked by a cold staking template, bare or wrapped
/// in P2WSH around the address's redeem script.
fn pays_template(utxo: &UnspentOutputReference) -> bool {
    let script = &utxo.transaction.script_pub_key;
    ColdStakingScript::is_cold_staking(script)
        || utxo
            .address
            .redeem_script
            .as_ref()
            .map(|redeem| ColdStakingScript::to_p2wsh(redeem) == *script)
            .unwrap_or(false)
}
