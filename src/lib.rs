//! Staking Wallet: HD wallet ledger engine with cold staking
//!
//! Tracks the outputs owned by a set of BIP44 wallets as blocks and
//! transactions arrive, and splits staking authority from custody with a
//! conditional cold staking script.
//!
//! # Architecture
//!
//! - **Wallet Manager**: Owns the wallets, the script → owner index and the chain cursor
//! - **Wallet Core**: Accounts, address sequences, the output store and history
//! - **Cold Staking**: Script template, verifier and the reserved hot/cold accounts
//! - **Acceptance Oracle**: Ordered relay rules for signed transactions
//!
//! # Example
//!
//! ```ignore
//! use staking_wallet::{ChainIndexer, Storage, WalletConfig, WalletManager};
//!
//! let config = WalletConfig::from_env();
//! let chain = Arc::new(ChainIndexer::new(config.network));
//! let storage = Storage::new_with_base_dir(config.wallet_dir.clone());
//! let manager = WalletManager::new(config, storage, chain);
//! manager.start()?;
//!
//! let mnemonic = manager.create_wallet("password", "main", "", None)?;
//! ```

// Public modules
pub mod api;
pub mod chain;
pub mod cold_staking;
pub mod config;
pub mod error;
pub mod manager;
pub mod policy;
pub mod storage;
pub mod transaction;
pub mod wallet;

// Re-exports for convenience
pub use chain::{ChainIndexer, ChainedHeader};
pub use cold_staking::{ColdStakingManager, ColdStakingScript};
pub use config::{UnconfirmedConflictPolicy, WalletConfig};
pub use error::{StorageError, WalletError};
pub use manager::{ScriptOwner, WalletManager};
pub use policy::{CoinView, MempoolValidator};
pub use storage::Storage;
pub use wallet::processing::BlockContext;
pub use wallet::Wallet;
