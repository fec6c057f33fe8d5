//! Common test utilities for the wallet integration tests
//!
//! This module provides shared test infrastructure:
//! - A wallet manager over a temporary directory and a regtest header chain
//! - Cheap seed encryption so wallet creation stays fast
//! - Block and transaction builders for feeding the ledger
#![allow(dead_code)]

use bitcoin::block::{Header, Version as BlockVersion};
use bitcoin::hashes::Hash;
use bitcoin::{
    absolute, transaction, Amount, Block, CompactTarget, OutPoint, ScriptBuf, Sequence,
    Transaction, TxIn, TxMerkleNode, TxOut, Txid, WPubkeyHash, Witness,
};
use chrono::Utc;
use std::sync::Arc;
use tempfile::TempDir;

use staking_wallet::config::KdfConfig;
use staking_wallet::wallet::{HdAddress, WalletAccountReference};
use staking_wallet::{ChainIndexer, ChainedHeader, Storage, WalletConfig, WalletManager};

pub const PASSWORD: &str = "password";
pub const FIRST_ACCOUNT: &str = "account 0";

pub fn init_logging() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init()
        .ok();
}

/// Regtest configuration writing to `dir` with a minimal KDF cost.
pub fn test_config(dir: &std::path::Path) -> WalletConfig {
    WalletConfig {
        wallet_dir: dir.to_path_buf(),
        kdf: KdfConfig {
            mem_kib: 64,
            iterations: 1,
            parallelism: 1,
        },
        ..WalletConfig::default()
    }
}

/// Test environment with automatic cleanup
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub chain: Arc<ChainIndexer>,
    pub manager: Arc<WalletManager>,
    nonce: std::sync::atomic::AtomicU32,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(customize: impl FnOnce(&mut WalletConfig)) -> Self {
        init_logging();
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = test_config(temp_dir.path());
        customize(&mut config);

        let chain = Arc::new(ChainIndexer::new(config.network));
        let storage = Storage::new_with_base_dir(temp_dir.path().to_path_buf());
        let manager = Arc::new(WalletManager::new(config, storage, chain.clone()));
        manager.start().expect("Failed to start wallet manager");

        Self {
            temp_dir,
            chain,
            manager,
            nonce: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn create_wallet(&self, name: &str) {
        self.manager
            .create_wallet(PASSWORD, name, "", None)
            .expect("Failed to create wallet");
    }

    pub fn receive_address(&self, wallet: &str) -> HdAddress {
        self.manager
            .get_unused_address(&WalletAccountReference::new(wallet, FIRST_ACCOUNT))
            .expect("Failed to get unused address")
    }

    pub fn change_address(&self, wallet: &str) -> HdAddress {
        self.manager
            .get_unused_change_address(&WalletAccountReference::new(wallet, FIRST_ACCOUNT))
            .expect("Failed to get unused change address")
    }

    /// Build a block on the chain tip, append it and feed it to the manager.
    pub fn mine(&self, txdata: Vec<Transaction>) -> ChainedHeader {
        self.mine_block(txdata).1
    }

    /// Like `mine`, keeping the block for a later replay.
    pub fn mine_block(&self, txdata: Vec<Transaction>) -> (Block, ChainedHeader) {
        let tip = self.chain.tip();
        let block = self.block_on(&tip, txdata);
        let header = self.chain.set_tip(block.header).expect("Failed to extend chain");
        self.manager
            .process_block(&block, &header)
            .expect("Failed to process block");
        (block, header)
    }

    /// A second manager over the same directory and chain, already started.
    pub fn restart(&self) -> Arc<WalletManager> {
        let storage = Storage::new_with_base_dir(self.temp_dir.path().to_path_buf());
        let manager = Arc::new(WalletManager::new(
            self.manager.config.clone(),
            storage,
            self.chain.clone(),
        ));
        manager.start().expect("Failed to restart wallet manager");
        manager
    }

    pub fn mine_empty(&self, count: u32) -> ChainedHeader {
        let mut header = self.chain.tip();
        for _ in 0..count {
            header = self.mine(Vec::new());
        }
        header
    }

    /// A block whose parent is `parent`; not added to the chain.
    ///
    /// Timestamps follow the wall clock so blocks mined after a wallet was
    /// created fall after its creation time.
    pub fn block_on(&self, parent: &ChainedHeader, txdata: Vec<Transaction>) -> Block {
        let nonce = self.nonce.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut block = Block {
            header: Header {
                version: BlockVersion::ONE,
                prev_blockhash: parent.hash,
                merkle_root: TxMerkleNode::all_zeros(),
                time: (parent.header.time + 1).max(Utc::now().timestamp() as u32 + 1),
                bits: CompactTarget::from_consensus(0x207fffff),
                nonce,
            },
            txdata,
        };
        if let Some(root) = block.compute_merkle_root() {
            block.header.merkle_root = root;
        }
        block
    }
}

/// A transaction paying `amount` to `script` out of a foreign outpoint.
pub fn funding_tx(script: &ScriptBuf, amount: Amount, seed: u8) -> Transaction {
    spend_tx(
        &[OutPoint::new(Txid::from_byte_array([seed; 32]), 0)],
        vec![TxOut {
            value: amount,
            script_pubkey: script.clone(),
        }],
    )
}

pub fn spend_tx(inputs: &[OutPoint], outputs: Vec<TxOut>) -> Transaction {
    Transaction {
        version: transaction::Version::TWO,
        lock_time: absolute::LockTime::ZERO,
        input: inputs
            .iter()
            .map(|previous_output| TxIn {
                previous_output: *previous_output,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect(),
        output: outputs,
    }
}

/// A P2WPKH script no test wallet owns.
pub fn external_script(seed: u8) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([seed; 20]))
}

pub fn btc(value: f64) -> Amount {
    Amount::from_btc(value).expect("valid amount")
}
