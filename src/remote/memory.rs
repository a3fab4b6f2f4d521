//! In-process authoritative ledger.
//!
//! Behaves like the real remote: it owns the canonical chain, accepts only
//! uploads that extend its head, and can be rewritten wholesale to model a
//! remote that discarded history.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::core::errors::{FslError, Result};
use crate::ledger::{Block, Chain, validate_segment};
use crate::remote::{BlockUploader, RemoteChainReader};

const ENDPOINT: &str = "memory://ledger";

/// Validating in-memory ledger.
#[derive(Debug)]
pub struct MemoryLedger {
    chain: Mutex<Chain>,
    uploads: AtomicU64,
    offline: AtomicBool,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    /// Ledger holding only genesis.
    #[must_use]
    pub fn new() -> Self {
        Self::from_chain(Chain::new())
    }

    #[must_use]
    pub fn from_chain(chain: Chain) -> Self {
        Self {
            chain: Mutex::new(chain),
            uploads: AtomicU64::new(0),
            offline: AtomicBool::new(false),
        }
    }

    /// Copy of the current canonical chain.
    #[must_use]
    pub fn chain(&self) -> Chain {
        self.chain.lock().clone()
    }

    /// Replace history wholesale.
    pub fn replace(&self, chain: Chain) {
        *self.chain.lock() = chain;
    }

    /// Drop everything but genesis.
    pub fn reset(&self) {
        self.replace(Chain::new());
    }

    /// Number of accepted uploads since construction.
    #[must_use]
    pub fn uploads(&self) -> u64 {
        self.uploads.load(Ordering::Relaxed)
    }

    /// While offline every call fails with a transient `Remote` error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(FslError::Remote {
                endpoint: ENDPOINT.to_string(),
                details: "ledger unreachable".to_string(),
            });
        }
        Ok(())
    }
}

impl RemoteChainReader for MemoryLedger {
    fn length(&self) -> Result<u64> {
        self.check_online()?;
        Ok(self.chain.lock().len())
    }

    fn block(&self, index: u64) -> Result<Block> {
        self.check_online()?;
        let chain = self.chain.lock();
        chain.get(index).cloned().ok_or_else(|| FslError::Remote {
            endpoint: ENDPOINT.to_string(),
            details: format!("no block at index {index} (length {})", chain.len()),
        })
    }
}

impl BlockUploader for MemoryLedger {
    fn upload_block(&self, block: &Block) -> Result<()> {
        self.check_online()?;
        let mut chain = self.chain.lock();
        let head = chain.head().clone();
        validate_segment(&[head, block.clone()]).map_err(|err| FslError::RemoteRejected {
            index: block.index,
            details: err.to_string(),
        })?;
        *chain = chain.with_block(block.clone())?;
        self.uploads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
