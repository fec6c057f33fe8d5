//! Transaction construction and signing
//!
//! - `builder.rs` - Largest-first coin selection with a fixed fee
//! - `signer.rs` - P2WPKH and cold staking input signing

pub mod builder;
pub mod signer;

pub use builder::{TransactionBuilder, UnsignedTransaction, DUST_LIMIT};
pub use signer::{InputSigningData, TransactionSigner};
