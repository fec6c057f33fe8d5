use std::fs;
use std::path::{Path, PathBuf};

use super::models::WalletFile;
use crate::error::StorageError;

/// Suffix of wallet files in the wallet directory.
pub const WALLET_FILE_EXTENSION: &str = "wallet.json";

#[derive(Clone, Debug)]
pub struct Storage {
    base_path: PathBuf,
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage {
    /// Create a new storage instance with the default base directory ("./wallets")
    pub fn new() -> Self {
        Self {
            base_path: PathBuf::from("./wallets"),
        }
    }

    /// Create storage with custom base directory (for testing)
    pub fn new_with_base_dir(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    /// Get the base directory path for wallet storage
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_path
    }

    /// Path of the file holding wallet `name`
    pub fn wallet_path(&self, name: &str) -> PathBuf {
        self.base_path.join(format!("{}.{}", name, WALLET_FILE_EXTENSION))
    }

    /// Check if a wallet with the given name exists
    pub fn wallet_exists(&self, name: &str) -> bool {
        self.wallet_path(name).exists()
    }

    /// Save a wallet, replacing any previous file atomically
    pub fn save_wallet(&self, wallet: &WalletFile) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(wallet)?;
        write_file_atomic(&self.wallet_path(&wallet.name), &json)
    }

    /// Load a wallet file from disk
    pub fn load_wallet(&self, name: &str) -> Result<WalletFile, StorageError> {
        let path = self.wallet_path(name);
        if !path.exists() {
            return Err(StorageError::FileNotFound(path.display().to_string()));
        }
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// List all wallet names in the storage directory
    pub fn list_wallets(&self) -> Result<Vec<String>, StorageError> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }
        if !self.base_path.is_dir() {
            return Err(StorageError::DirectoryNotFound(
                self.base_path.display().to_string(),
            ));
        }

        let suffix = format!(".{}", WALLET_FILE_EXTENSION);
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry
                .file_name()
                .to_str()
                .and_then(|file| file.strip_suffix(&suffix))
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete a wallet file
    pub fn delete_wallet(&self, name: &str) -> Result<(), StorageError> {
        let path = self.wallet_path(name);
        if !path.exists() {
            return Err(StorageError::FileNotFound(path.display().to_string()));
        }
        fs::remove_file(path)?;
        Ok(())
    }
}

fn write_file_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    if fs::rename(&tmp, path).is_err() {
        let _ = fs::remove_file(path);
        fs::rename(&tmp, path)?;
    }
    Ok(())
}
