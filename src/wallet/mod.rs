/// Wallet Core Module
///
/// Ledger engine pieces, leaves first:
///
/// - `address_manager.rs` - BIP44 path and address derivation
/// - `output_store.rs` - Owned outputs indexed by outpoint and address
/// - `account.rs` - Accounts and their address sequences
/// - `ledger.rs` - A named wallet with its seed, accounts and store
/// - `processing.rs` - Transaction ingestion and conflict resolution
/// - `removal.rs` - Rewinds and transaction removal
/// - `history.rs` - History queries
pub mod account;
pub mod address_manager;
pub mod crypto;
pub mod history;
pub mod ledger;
pub mod output_store;
pub mod processing;
pub mod removal;
pub mod script_reader;
pub mod types;

pub use account::{HdAccount, SPECIAL_PURPOSE_ACCOUNT_INDEX_START};
pub use address_manager::AddressManager;
pub use ledger::{AccountRoot, Wallet};
pub use output_store::OutputStore;
pub use types::*;
