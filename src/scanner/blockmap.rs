//! Fingerprint manifests ("blockmaps") of directory trees.
//!
//! A blockmap maps every regular file under a root to the SHA-512 of its
//! contents. It is the payload committed into each ledger block.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel as channel;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::core::config::ScannerConfig;
use crate::core::errors::{FslError, Result};
use crate::core::paths::resolve_root_path;
use crate::scanner::walker::{DirectoryWalker, WalkItem, WalkerConfig};

/// Produces the fingerprint of a root path.
pub trait FingerprintProducer: Send + Sync {
    fn fingerprint(&self, root: &Path, ignore_paths: &[PathBuf]) -> Result<Blockmap>;
}

/// A file that could not be fingerprinted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    pub path: String,
    pub message: String,
}

/// Fingerprint manifest of one directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blockmap {
    pub root_path: String,
    /// RFC 3339 UTC.
    pub generated_at: String,
    /// Root-relative path (forward slashes) → SHA-512 hex of contents.
    pub entries: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FileError>,
}

impl Blockmap {
    /// JSON encoding used as a block payload.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Files whose fingerprints differ between `self` and `newer`, plus files
    /// present in only one of them. Sorted.
    #[must_use]
    pub fn changed_paths(&self, newer: &Self) -> Vec<String> {
        let mut changed: Vec<String> = newer
            .entries
            .iter()
            .filter(|(path, digest)| self.entries.get(*path) != Some(*digest))
            .map(|(path, _)| path.clone())
            .collect();
        changed.extend(
            self.entries
                .keys()
                .filter(|path| !newer.entries.contains_key(*path))
                .cloned(),
        );
        changed.sort();
        changed
    }
}

/// Default producer: parallel walk plus parallel SHA-512 hashing.
#[derive(Debug, Clone)]
pub struct BlockmapGenerator {
    parallelism: usize,
    auto_ignore: bool,
    follow_symlinks: bool,
}

impl Default for BlockmapGenerator {
    fn default() -> Self {
        Self::from_config(&ScannerConfig::default())
    }
}

impl BlockmapGenerator {
    pub fn from_config(config: &ScannerConfig) -> Self {
        Self {
            parallelism: config.parallelism.max(1),
            auto_ignore: config.auto_ignore,
            follow_symlinks: config.follow_symlinks,
        }
    }

    /// Fingerprint `root`. Per-file failures land in `errors`; only an
    /// unusable root fails the whole call.
    pub fn generate(&self, root: &Path, ignore_paths: &[PathBuf]) -> Result<Blockmap> {
        let root = resolve_root_path(root);
        if !root.is_dir() {
            return Err(FslError::BadRootPath { path: root });
        }
        let ignored = ignore_paths
            .iter()
            .map(|p| {
                if p.is_absolute() {
                    resolve_root_path(p)
                } else {
                    resolve_root_path(&root.join(p))
                }
            })
            .collect();

        let walker = DirectoryWalker::new(WalkerConfig {
            root: root.clone(),
            parallelism: self.parallelism,
            follow_symlinks: self.follow_symlinks,
            auto_ignore: self.auto_ignore,
            ignored,
        });
        let items = walker.stream()?;

        let (done_tx, done_rx) = channel::unbounded::<(String, std::result::Result<String, String>)>();
        thread::scope(|scope| {
            for _ in 0..self.parallelism {
                let items = items.clone();
                let done_tx = done_tx.clone();
                let root = root.as_path();
                scope.spawn(move || {
                    for item in items {
                        let outcome = match item {
                            WalkItem::File(path) => {
                                (relative_key(root, &path), hash_file(&path).map_err(|e| e.to_string()))
                            }
                            WalkItem::Error { path, message } => (relative_key(root, &path), Err(message)),
                        };
                        let _ = done_tx.send(outcome);
                    }
                });
            }
        });
        drop(done_tx);

        let mut entries = BTreeMap::new();
        let mut errors = Vec::new();
        for (path, outcome) in done_rx {
            match outcome {
                Ok(digest) => {
                    entries.insert(path, digest);
                }
                Err(message) => errors.push(FileError { path, message }),
            }
        }
        errors.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(Blockmap {
            root_path: root.display().to_string(),
            generated_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            entries,
            errors,
        })
    }
}

impl FingerprintProducer for BlockmapGenerator {
    fn fingerprint(&self, root: &Path, ignore_paths: &[PathBuf]) -> Result<Blockmap> {
        self.generate(root, ignore_paths)
    }
}

/// Streaming SHA-512 of a file's contents, lowercase hex.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::with_capacity(64 * 1024, File::open(path)?);
    let mut hasher = Sha512::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

fn relative_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
