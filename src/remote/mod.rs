//! Access to the authoritative remote ledger.
//!
//! Consumers depend on the narrowest capability they need: the chain tracker
//! only reads, workers only upload.

#[cfg(feature = "http")]
pub mod http;
pub mod memory;

use std::sync::Arc;

use crate::core::errors::Result;
use crate::ledger::Block;

#[cfg(feature = "http")]
pub use http::{Credentials, HttpLedger};
pub use memory::MemoryLedger;

/// Read side of the remote ledger.
pub trait RemoteChainReader: Send + Sync {
    /// Number of blocks on the remote, genesis included.
    fn length(&self) -> Result<u64>;

    /// Block at `index`.
    fn block(&self, index: u64) -> Result<Block>;
}

/// Write side of the remote ledger.
pub trait BlockUploader: Send + Sync {
    /// Submit a block that extends the remote head.
    fn upload_block(&self, block: &Block) -> Result<()>;
}

/// Both halves, for wiring code that owns a single accessor.
pub trait RemoteLedger: RemoteChainReader + BlockUploader {}

impl<T: RemoteChainReader + BlockUploader> RemoteLedger for T {}

impl<T: RemoteChainReader + ?Sized> RemoteChainReader for Arc<T> {
    fn length(&self) -> Result<u64> {
        (**self).length()
    }

    fn block(&self, index: u64) -> Result<Block> {
        (**self).block(index)
    }
}

impl<T: BlockUploader + ?Sized> BlockUploader for Arc<T> {
    fn upload_block(&self, block: &Block) -> Result<()> {
        (**self).upload_block(block)
    }
}
