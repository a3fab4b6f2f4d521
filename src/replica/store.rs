//! File-per-block chain directory.
//!
//! Block `i` lives in `<dir>/<i>.json`. Each write goes to a hidden staging
//! file first and is renamed into place, so a crash leaves at worst a stray
//! dotfile that listing ignores.

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::errors::{FslError, Result};
use crate::core::paths::write_atomic;
use crate::ledger::{Block, Chain};

const BLOCK_EXT: &str = ".json";

/// On-disk chain replica rooted at one directory.
#[derive(Debug, Clone)]
pub struct ChainStore {
    dir: PathBuf,
}

impl ChainStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn block_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("{index}{BLOCK_EXT}"))
    }

    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| FslError::io(&self.dir, e))
    }

    /// Persist `block` under its own index. Rewriting an index is idempotent.
    pub fn write_block(&self, block: &Block) -> Result<()> {
        let bytes = serde_json::to_vec(block)?;
        write_atomic(&self.block_path(block.index), &bytes)
    }

    pub fn read_block(&self, index: u64) -> Result<Block> {
        let path = self.block_path(index);
        let raw = fs::read(&path).map_err(|e| FslError::io(&path, e))?;
        let block: Block = serde_json::from_slice(&raw)?;
        if block.index != index {
            return Err(FslError::ChainDesync {
                details: format!("{} holds block {}", path.display(), block.index),
            });
        }
        Ok(block)
    }

    /// Remove every entry in the directory, block files or not.
    pub fn clear(&self) -> Result<()> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return self.ensure_dir(),
            Err(e) => return Err(FslError::io(&self.dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| FslError::io(&self.dir, e))?;
            let path = entry.path();
            let is_dir = entry.file_type().is_ok_and(|kind| kind.is_dir());
            let removed = if is_dir {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.map_err(|e| FslError::io(&path, e))?;
        }
        Ok(())
    }

    /// Names of the `.json` entries, numeric stems first in numeric order.
    ///
    /// Hidden files (staging files included) and other extensions are skipped.
    /// Non-numeric `.json` names are kept, sorted last, so
    /// [`contiguous_length`](Self::contiguous_length) can flag them.
    pub fn listing(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(FslError::io(&self.dir, e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| FslError::io(&self.dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !name.ends_with(BLOCK_EXT) {
                continue;
            }
            names.push(name);
        }
        names.sort_by_key(|name| (stem_index(name).unwrap_or(u64::MAX), name.clone()));
        Ok(names)
    }

    /// Number of block files, provided they are exactly `0.json ..= (n-1).json`.
    ///
    /// Any gap, stray name, or unparsable stem is reported as `ChainDesync`.
    pub fn contiguous_length(&self) -> Result<u64> {
        let names = self.listing()?;
        for (position, name) in (0_u64..).zip(&names) {
            if stem_index(name) != Some(position) {
                return Err(FslError::ChainDesync {
                    details: format!(
                        "expected {position}{BLOCK_EXT} in {}, found {name}",
                        self.dir.display()
                    ),
                });
            }
        }
        Ok(names.len() as u64)
    }

    /// Highest-indexed block on disk.
    pub fn read_head(&self) -> Result<Block> {
        match self.contiguous_length()? {
            0 => Err(FslError::MissingLocalHead {
                dir: self.dir.clone(),
            }),
            len => self.read_block(len - 1),
        }
    }

    /// Read and validate every block on disk.
    pub fn load_chain(&self) -> Result<Chain> {
        let len = self.contiguous_length()?;
        if len == 0 {
            return Err(FslError::MissingLocalHead {
                dir: self.dir.clone(),
            });
        }
        let blocks = (0..len)
            .map(|index| self.read_block(index))
            .collect::<Result<Vec<_>>>()?;
        Chain::from_blocks(blocks)
    }
}

fn stem_index(name: &str) -> Option<u64> {
    name.strip_suffix(BLOCK_EXT)?.parse().ok()
}
