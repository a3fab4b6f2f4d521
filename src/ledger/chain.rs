//! Chain value type, validation, Greatest Common Index, and merge.
//!
//! A [`Chain`] is never empty and never mutated in place. Extending or
//! replacing it produces a new value; readers that hold an older `Chain`
//! keep a consistent view.

use crate::core::errors::{FslError, Result};
use crate::ledger::block::Block;

/// Validated, contiguous sequence of blocks starting at genesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    blocks: Vec<Block>,
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain {
    /// Genesis-only chain (the initialized-empty state).
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocks: vec![Block::genesis()],
        }
    }

    /// Validated construction from raw blocks.
    pub fn from_blocks(blocks: Vec<Block>) -> Result<Self> {
        validate(&blocks)?;
        Ok(Self { blocks })
    }

    /// Build the next block on top of the head. The chain itself is untouched.
    #[must_use]
    pub fn append(&self, payload: Vec<u8>) -> Block {
        Block::next(self.head(), payload)
    }

    /// New chain with `block` appended, after checking that it extends the head.
    pub fn with_block(&self, block: Block) -> Result<Self> {
        validate_segment(&[self.head().clone(), block.clone()])?;
        let mut blocks = self.blocks.clone();
        blocks.push(block);
        Ok(Self { blocks })
    }

    #[must_use]
    pub fn head(&self) -> &Block {
        // Construction guarantees at least the genesis block.
        &self.blocks[self.blocks.len() - 1]
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.blocks.len() as u64
    }

    /// Always false; present for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    #[must_use]
    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }

    #[must_use]
    pub fn get(&self, index: u64) -> Option<&Block> {
        usize::try_from(index)
            .ok()
            .and_then(|index| self.blocks.get(index))
    }

    #[must_use]
    pub fn find_by_hash(&self, hash: &[u8]) -> Option<&Block> {
        self.blocks.iter().find(|block| block.block_hash == hash)
    }

    /// The child of the block whose hash is `parent_hash`.
    #[must_use]
    pub fn find_by_parent_hash(&self, parent_hash: &[u8]) -> Option<&Block> {
        self.blocks
            .iter()
            .find(|block| !block.is_genesis() && block.parent_hash == parent_hash)
    }

    /// First block stamped with exactly `timestamp`.
    #[must_use]
    pub fn find_by_timestamp(&self, timestamp: i64) -> Option<&Block> {
        self.blocks.iter().find(|block| block.timestamp == timestamp)
    }
}

/// Check a full chain: first block must be genesis (index 0, empty parent),
/// then every block must satisfy [`validate_segment`] rules.
pub fn validate(blocks: &[Block]) -> Result<()> {
    let Some(first) = blocks.first() else {
        return Err(FslError::InvalidChain {
            index: 0,
            reason: "chain is empty".to_string(),
        });
    };
    if first.index != 0 {
        return Err(FslError::InvalidChain {
            index: first.index,
            reason: "first block is not index 0".to_string(),
        });
    }
    if !first.parent_hash.is_empty() {
        return Err(FslError::InvalidChain {
            index: 0,
            reason: "genesis parent hash must be empty".to_string(),
        });
    }
    validate_segment(blocks)
}

/// Check a contiguous run of blocks that may start at any index.
///
/// Each block must carry its own correct hash, and every block after the
/// first must have `index = prev.index + 1` and `parent_hash = prev.block_hash`.
pub fn validate_segment(blocks: &[Block]) -> Result<()> {
    if blocks.is_empty() {
        return Err(FslError::InvalidChain {
            index: 0,
            reason: "segment is empty".to_string(),
        });
    }
    for (position, block) in blocks.iter().enumerate() {
        if !block.has_valid_hash() {
            return Err(FslError::InvalidChain {
                index: block.index,
                reason: "block hash does not match contents".to_string(),
            });
        }
        if position == 0 {
            continue;
        }
        let prev = &blocks[position - 1];
        if block.index != prev.index + 1 {
            return Err(FslError::InvalidChain {
                index: block.index,
                reason: format!("expected index {}", prev.index + 1),
            });
        }
        if block.parent_hash != prev.block_hash {
            return Err(FslError::InvalidChain {
                index: block.index,
                reason: format!("parent hash does not match block {}", prev.index),
            });
        }
    }
    Ok(())
}

/// Greatest Common Index: the highest index at which both sequences hold a
/// block with the same hash. The scan stops at the first disagreement.
///
/// `None` means the sequences disagree at index 0 or one of them is empty.
#[must_use]
pub fn gci(a: &[Block], b: &[Block]) -> Option<u64> {
    a.iter()
        .zip(b)
        .take_while(|(left, right)| left.block_hash == right.block_hash)
        .last()
        .map(|(left, _)| left.index)
}

/// Reconcile the local replica with the authoritative remote.
///
/// A longer remote sharing some history replaces local wholesale. A remote
/// that shares no history at all is an error. Otherwise local is kept.
pub fn merge(local: &Chain, remote: &Chain) -> Result<Chain> {
    if gci(local.blocks(), remote.blocks()).is_none() {
        return Err(FslError::DivergentChain {
            local_len: local.len(),
            remote_len: remote.len(),
        });
    }
    if remote.len() > local.len() {
        return Ok(remote.clone());
    }
    Ok(local.clone())
}
