//! Filesystem fingerprinting: parallel walker and blockmap generator.

pub mod blockmap;
pub mod walker;

pub use blockmap::{Blockmap, BlockmapGenerator, FileError, FingerprintProducer};
