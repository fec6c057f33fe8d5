//! Height-ordered header chain consumed by the wallet.
//!
//! Consensus validation happens elsewhere; this index only records which
//! headers form the active chain so the wallet can check its tip and build
//! locators.

use bitcoin::block::Header;
use bitcoin::blockdata::constants::genesis_block;
use bitcoin::{BlockHash, Network};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::error::WalletError;

/// A block header together with its position in the chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainedHeader {
    pub header: Header,
    pub height: u32,
    pub hash: BlockHash,
}

impl ChainedHeader {
    pub fn new(header: Header, height: u32) -> Self {
        Self {
            hash: header.block_hash(),
            header,
            height,
        }
    }

    pub fn previous_hash(&self) -> BlockHash {
        self.header.prev_blockhash
    }

    /// Block time as a UTC timestamp.
    pub fn time(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp(i64::from(self.header.time), 0).unwrap_or_default()
    }
}

#[derive(Default)]
struct ChainState {
    headers: Vec<ChainedHeader>,
    heights: HashMap<BlockHash, u32>,
}

pub struct ChainIndexer {
    network: Network,
    state: RwLock<ChainState>,
}

impl ChainIndexer {
    /// Create an index holding only the network's genesis header.
    pub fn new(network: Network) -> Self {
        let genesis = ChainedHeader::new(genesis_block(network).header, 0);
        let mut state = ChainState::default();
        state.heights.insert(genesis.hash, 0);
        state.headers.push(genesis);

        Self {
            network,
            state: RwLock::new(state),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn genesis(&self) -> ChainedHeader {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.headers[0].clone()
    }

    pub fn tip(&self) -> ChainedHeader {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.headers[state.headers.len() - 1].clone()
    }

    pub fn height(&self) -> u32 {
        self.tip().height
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.heights.contains_key(hash)
    }

    pub fn get_header(&self, hash: &BlockHash) -> Option<ChainedHeader> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let height = *state.heights.get(hash)?;
        state.headers.get(height as usize).cloned()
    }

    pub fn get_header_by_height(&self, height: u32) -> Option<ChainedHeader> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.headers.get(height as usize).cloned()
    }

    /// Append `header` to the chain, or switch to it when it forks off an
    /// earlier block. Headers above the fork point are dropped.
    pub fn set_tip(&self, header: Header) -> Result<ChainedHeader, WalletError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let parent_height = *state.heights.get(&header.prev_blockhash).ok_or_else(|| {
            WalletError::ChainSync(format!(
                "Previous block {} is not part of the chain",
                header.prev_blockhash
            ))
        })?;

        let keep = parent_height as usize + 1;
        if keep < state.headers.len() {
            let dropped: Vec<BlockHash> = state.headers[keep..].iter().map(|h| h.hash).collect();
            log::info!(
                "Chain reorganised at height {}, dropping {} header(s)",
                parent_height,
                dropped.len()
            );
            for hash in dropped {
                state.heights.remove(&hash);
            }
            state.headers.truncate(keep);
        }

        let chained = ChainedHeader::new(header, parent_height + 1);
        state.heights.insert(chained.hash, chained.height);
        state.headers.push(chained.clone());
        Ok(chained)
    }

    /// Block locator for `header`: the ten most recent hashes, then
    /// exponentially spaced ancestors, ending with genesis.
    pub fn get_locator(&self, header: &ChainedHeader) -> Vec<BlockHash> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);

        let mut locator = Vec::new();
        let on_chain = state.heights.get(&header.hash) == Some(&header.height);
        let mut height = if on_chain {
            header.height as i64
        } else {
            // Detached header: list it, then continue from its parent.
            locator.push(header.hash);
            match state.heights.get(&header.previous_hash()) {
                Some(parent) => *parent as i64,
                None => return locator,
            }
        };

        let mut step = 1i64;
        while height > 0 {
            locator.push(state.headers[height as usize].hash);
            if locator.len() >= 10 {
                step *= 2;
            }
            height -= step;
        }
        locator.push(state.headers[0].hash);
        locator
    }
}
