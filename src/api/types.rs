use bitcoin::{Amount, Denomination};
use serde::{Deserialize, Serialize};

use crate::error::WalletError;

// ============================================================================
// Cold Staking
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetColdStakingAddressRequest {
    pub wallet_name: String,
    pub is_cold_wallet_address: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetColdStakingAddressResponse {
    pub address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupColdStakingRequest {
    pub hot_wallet_address: String,
    pub cold_wallet_address: String,
    pub wallet_name: String,
    pub wallet_account: String,
    pub wallet_password: String,
    /// Decimal coins, e.g. "100"
    pub amount: String,
    /// Decimal coins, e.g. "0.01"
    pub fees: String,
    #[serde(default)]
    pub pay_to_script: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionHexResponse {
    pub transaction_hex: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColdStakingWithdrawalRequest {
    pub receiving_address: String,
    pub wallet_name: String,
    pub wallet_password: String,
    pub amount: String,
    pub fees: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetColdStakingInfoRequest {
    pub wallet_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateColdStakingAccountRequest {
    pub wallet_name: String,
    pub wallet_password: String,
    pub is_cold_wallet_account: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateColdStakingAccountResponse {
    pub account_name: String,
}

// ============================================================================
// Wallet
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWalletRequest {
    pub name: String,
    pub password: String,
    #[serde(default)]
    pub passphrase: String,
    /// Generated when absent
    pub mnemonic: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWalletResponse {
    pub name: String,
    pub mnemonic: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadWalletRequest {
    pub name: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletListResponse {
    pub wallet_names: Vec<String>,
    pub file_extension: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountQuery {
    pub account_name: Option<String>,
    /// Include the cold staking accounts
    #[serde(default)]
    pub all_accounts: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendableQuery {
    #[serde(default = "default_confirmations")]
    pub confirmations: u32,
}

fn default_confirmations() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnusedAddressQuery {
    pub account_name: String,
    #[serde(default)]
    pub is_change: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnusedAddressResponse {
    pub address: String,
    pub hd_path: String,
}

/// Parse a decimal coin amount such as "0.01".
pub fn parse_amount(value: &str) -> Result<Amount, WalletError> {
    Amount::from_str_in(value.trim(), Denomination::Bitcoin)
        .map_err(|e| WalletError::Validation(format!("Invalid amount '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_are_decimal_coins() {
        assert_eq!(parse_amount("100").unwrap(), Amount::from_sat(10_000_000_000));
        assert_eq!(parse_amount(" 0.01 ").unwrap(), Amount::from_sat(1_000_000));
        assert!(matches!(parse_amount("ten"), Err(WalletError::Validation(_))));
    }

    #[test]
    fn requests_use_camel_case() {
        let req: SetupColdStakingRequest = serde_json::from_str(
            r#"{"hotWalletAddress":"h","coldWalletAddress":"c","walletName":"w",
                "walletAccount":"account 0","walletPassword":"p","amount":"100","fees":"0.01"}"#,
        )
        .unwrap();
        assert_eq!(req.wallet_account, "account 0");
        assert!(!req.pay_to_script);
    }
}
