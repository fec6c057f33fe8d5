use axum::{
    extract::{Path, Query, State},
    Json,
};
use bitcoin::consensus::encode::serialize_hex;
use std::sync::Arc;

use super::types::*;
use crate::cold_staking::{ColdStakingInfo, ColdStakingManager, ColdStakingWithdrawalParams, SetupColdStakingParams};
use crate::error::WalletError;
use crate::manager::WalletManager;
use crate::wallet::history::{AccountHistory, AccountHistorySlim};
use crate::wallet::{AccountBalance, AccountFilter, UnspentOutputReference, WalletAccountReference};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub wallets: Arc<WalletManager>,
    pub cold_staking: Arc<ColdStakingManager>,
}

impl AppState {
    pub fn new(wallets: Arc<WalletManager>) -> Self {
        Self {
            cold_staking: Arc::new(ColdStakingManager::new(wallets.clone())),
            wallets,
        }
    }
}

/// Run a manager call off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, WalletError>
where
    F: FnOnce() -> Result<T, WalletError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| WalletError::Internal(format!("Blocking task failed: {}", e)))?
}

fn account_filter(all_accounts: bool) -> AccountFilter {
    if all_accounts {
        AccountFilter::AllAccounts
    } else {
        AccountFilter::NormalAccounts
    }
}

// ============================================================================
// Cold Staking
// ============================================================================

pub async fn get_cold_staking_address_handler(
    State(state): State<AppState>,
    Query(req): Query<GetColdStakingAddressRequest>,
) -> Result<Json<GetColdStakingAddressResponse>, WalletError> {
    let address = blocking(move || {
        state
            .cold_staking
            .get_cold_staking_address(&req.wallet_name, req.is_cold_wallet_address)
    })
    .await?;

    Ok(Json(GetColdStakingAddressResponse {
        address: address.address,
    }))
}

pub async fn get_cold_staking_info_handler(
    State(state): State<AppState>,
    Query(req): Query<GetColdStakingInfoRequest>,
) -> Result<Json<ColdStakingInfo>, WalletError> {
    let info = blocking(move || state.cold_staking.get_cold_staking_info(&req.wallet_name)).await?;
    Ok(Json(info))
}

pub async fn create_cold_staking_account_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateColdStakingAccountRequest>,
) -> Result<Json<CreateColdStakingAccountResponse>, WalletError> {
    let account = blocking(move || {
        state.cold_staking.get_or_create_cold_staking_account(
            &req.wallet_name,
            req.is_cold_wallet_account,
            &req.wallet_password,
        )
    })
    .await?;

    Ok(Json(CreateColdStakingAccountResponse {
        account_name: account.name,
    }))
}

pub async fn setup_cold_staking_handler(
    State(state): State<AppState>,
    Json(req): Json<SetupColdStakingRequest>,
) -> Result<Json<TransactionHexResponse>, WalletError> {
    let params = SetupColdStakingParams {
        amount: parse_amount(&req.amount)?,
        fee: parse_amount(&req.fees)?,
        wallet_name: req.wallet_name,
        account_name: req.wallet_account,
        hot_address: req.hot_wallet_address,
        cold_address: req.cold_wallet_address,
        password: req.wallet_password,
        pay_to_script: req.pay_to_script,
    };

    let tx = blocking(move || state.cold_staking.setup_cold_staking(&params)).await?;
    Ok(Json(TransactionHexResponse {
        transaction_hex: serialize_hex(&tx),
    }))
}

pub async fn cold_staking_withdrawal_handler(
    State(state): State<AppState>,
    Json(req): Json<ColdStakingWithdrawalRequest>,
) -> Result<Json<TransactionHexResponse>, WalletError> {
    let params = ColdStakingWithdrawalParams {
        amount: parse_amount(&req.amount)?,
        fee: parse_amount(&req.fees)?,
        wallet_name: req.wallet_name,
        receiving_address: req.receiving_address,
        password: req.wallet_password,
    };

    let tx = blocking(move || state.cold_staking.withdraw(&params)).await?;
    Ok(Json(TransactionHexResponse {
        transaction_hex: serialize_hex(&tx),
    }))
}

// ============================================================================
// Wallet
// ============================================================================

pub async fn create_wallet_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateWalletRequest>,
) -> Result<Json<CreateWalletResponse>, WalletError> {
    let name = req.name.clone();
    let mnemonic = blocking(move || {
        state.wallets.create_wallet(
            &req.password,
            &req.name,
            &req.passphrase,
            req.mnemonic.as_deref(),
        )
    })
    .await?;

    Ok(Json(CreateWalletResponse {
        name,
        mnemonic: mnemonic.to_string(),
    }))
}

pub async fn load_wallet_handler(
    State(state): State<AppState>,
    Json(req): Json<LoadWalletRequest>,
) -> Result<Json<WalletListResponse>, WalletError> {
    let wallets = state.wallets.clone();
    blocking(move || wallets.load_wallet(&req.password, &req.name)).await?;
    Ok(Json(wallet_list(&state.wallets)))
}

pub async fn list_wallets_handler(State(state): State<AppState>) -> Json<WalletListResponse> {
    Json(wallet_list(&state.wallets))
}

fn wallet_list(wallets: &WalletManager) -> WalletListResponse {
    WalletListResponse {
        wallet_names: wallets.get_wallets_names(),
        file_extension: wallets.get_wallet_file_extension().to_string(),
    }
}

pub async fn get_balance_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<AccountQuery>,
) -> Result<Json<Vec<AccountBalance>>, WalletError> {
    let balances = blocking(move || {
        state
            .wallets
            .get_balances(&name, query.account_name.as_deref())
    })
    .await?;
    Ok(Json(balances))
}

pub async fn get_history_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<AccountQuery>,
) -> Result<Json<Vec<AccountHistory>>, WalletError> {
    let history = blocking(move || {
        state.wallets.get_history(
            &name,
            query.account_name.as_deref(),
            account_filter(query.all_accounts),
        )
    })
    .await?;
    Ok(Json(history))
}

pub async fn get_history_slim_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<AccountQuery>,
) -> Result<Json<Vec<AccountHistorySlim>>, WalletError> {
    let history = blocking(move || {
        state.wallets.get_history_slim(
            &name,
            query.account_name.as_deref(),
            account_filter(query.all_accounts),
        )
    })
    .await?;
    Ok(Json(history))
}

pub async fn get_spendable_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<SpendableQuery>,
) -> Result<Json<Vec<UnspentOutputReference>>, WalletError> {
    let spendable = blocking(move || {
        state
            .wallets
            .get_spendable_transactions_in_wallet(&name, query.confirmations)
    })
    .await?;
    Ok(Json(spendable))
}

pub async fn get_unused_address_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<UnusedAddressQuery>,
) -> Result<Json<UnusedAddressResponse>, WalletError> {
    let address = blocking(move || {
        let reference = WalletAccountReference::new(name, query.account_name);
        if query.is_change {
            state.wallets.get_unused_change_address(&reference)
        } else {
            state.wallets.get_unused_address(&reference)
        }
    })
    .await?;

    Ok(Json(UnusedAddressResponse {
        address: address.address,
        hd_path: address.hd_path,
    }))
}
