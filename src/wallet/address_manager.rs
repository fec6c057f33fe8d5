use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv, Xpub};
use bitcoin::key::CompressedPublicKey;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{Address, Network, PublicKey, ScriptBuf};
use std::str::FromStr;

use crate::error::WalletError;

/// BIP44 purpose used for every account.
pub const PURPOSE: u32 = 44;

pub struct AddressManager;

impl AddressManager {
    /// Path of an account root: `m/44'/{coin_type}'/{account_index}'`
    pub fn account_hd_path(coin_type: u32, account_index: u32) -> String {
        format!("m/{}'/{}'/{}'", PURPOSE, coin_type, account_index)
    }

    /// Full path of an address: `m/44'/{coin_type}'/{account_index}'/{0|1}/{address_index}`
    ///
    /// Branch 0 holds receive addresses, branch 1 holds change addresses.
    pub fn hd_path(coin_type: u32, account_index: u32, is_change: bool, address_index: u32) -> String {
        format!(
            "{}/{}/{}",
            Self::account_hd_path(coin_type, account_index),
            u32::from(is_change),
            address_index
        )
    }

    /// Derive the P2WPKH key, script and address at `{0|1}/{index}` below an
    /// account extended public key.
    pub fn derive_address(
        account_xpub: &Xpub,
        is_change: bool,
        index: u32,
        network: Network,
    ) -> Result<(PublicKey, ScriptBuf, Address), WalletError> {
        let secp = Secp256k1::verification_only();

        let branch = ChildNumber::from_normal_idx(u32::from(is_change))
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        let child_number = ChildNumber::from_normal_idx(index)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;

        let derived_key = account_xpub
            .derive_pub(&secp, &[branch, child_number])
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;

        let pubkey = PublicKey::new(derived_key.public_key);
        let compressed = CompressedPublicKey::try_from(pubkey)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        let address = Address::p2wpkh(&compressed, network);

        Ok((pubkey, address.script_pubkey(), address))
    }

    /// Extended public key of account `account_index` below a master key.
    pub fn derive_account_xpub(
        master: &Xpriv,
        coin_type: u32,
        account_index: u32,
    ) -> Result<Xpub, WalletError> {
        let secp = Secp256k1::new();
        let account_key = Self::derive_private_key(master, &Self::account_hd_path(coin_type, account_index))?;
        Ok(Xpub::from_priv(&secp, &account_key))
    }

    /// Derive the private key at an absolute path below a master key.
    pub fn derive_private_key(master: &Xpriv, hd_path: &str) -> Result<Xpriv, WalletError> {
        let secp = Secp256k1::new();
        let path = DerivationPath::from_str(hd_path)
            .map_err(|e| WalletError::KeyDerivation(format!("Invalid path '{}': {}", hd_path, e)))?;
        master
            .derive_priv(&secp, &path)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))
    }

    /// Parse an xpub/tpub string.
    pub fn parse_xpub(encoded: &str) -> Result<Xpub, WalletError> {
        Xpub::from_str(encoded.trim())
            .map_err(|e| WalletError::KeyDerivation(format!("Invalid extended public key: {}", e)))
    }

    /// Account index encoded in an account or address path.
    pub fn account_index_from_path(hd_path: &str) -> Option<u32> {
        let segment = hd_path.split('/').nth(3)?;
        segment.trim_end_matches('\'').parse().ok()
    }
}
