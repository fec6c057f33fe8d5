//! Storage and persistence layer
//!
//! - File system operations
//! - On-disk wallet model

mod file_system;
mod models;

pub use file_system::{Storage, WALLET_FILE_EXTENSION};
pub use models::{AccountFile, AccountRootFile, WalletFile};
