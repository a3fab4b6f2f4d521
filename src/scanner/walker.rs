//! Parallel directory walker feeding the fingerprint generator.
//!
//! Worker threads share one unbounded queue of directories. Each thread lists
//! a directory, emits its regular files, and queues its subdirectories. An
//! in-flight counter tells the threads when the tree is exhausted.
//!
//! Nothing is skipped silently: a directory that cannot be listed or an entry
//! whose type cannot be read is emitted as [`WalkItem::Error`] so the caller
//! can record it in the manifest.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel as channel;

use crate::core::errors::{FslError, Result};
use crate::core::paths::is_ignored;

/// OS-generated metadata names skipped when `auto_ignore` is set.
pub const AUTO_IGNORED_NAMES: &[&str] = &[
    ".DS_Store",
    ".AppleDouble",
    ".Spotlight-V100",
    ".Trashes",
    ".fseventsd",
    "Thumbs.db",
    "ehthumbs.db",
    "desktop.ini",
];

#[derive(Debug, Clone)]
pub struct WalkerConfig {
    pub root: PathBuf,
    pub parallelism: usize,
    pub follow_symlinks: bool,
    pub auto_ignore: bool,
    /// Absolute paths whose subtrees are skipped.
    pub ignored: Vec<PathBuf>,
}

/// One discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkItem {
    File(PathBuf),
    Error { path: PathBuf, message: String },
}

/// Parallel walker over a single root.
pub struct DirectoryWalker {
    config: Arc<WalkerConfig>,
}

impl DirectoryWalker {
    pub fn new(config: WalkerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Collect every item. Order is unspecified.
    pub fn walk(&self) -> Result<Vec<WalkItem>> {
        Ok(self.stream()?.into_iter().collect())
    }

    /// Start the walk in background threads and return the item stream.
    ///
    /// Fails only when the root itself cannot be listed.
    pub fn stream(&self) -> Result<channel::Receiver<WalkItem>> {
        let root = &self.config.root;
        fs::read_dir(root).map_err(|e| FslError::io(root, e))?;

        let (work_tx, work_rx) = channel::unbounded::<PathBuf>();
        let (item_tx, item_rx) = channel::unbounded::<WalkItem>();
        let in_flight = Arc::new(AtomicUsize::new(1));
        let _ = work_tx.send(root.clone());

        for n in 0..self.config.parallelism.max(1) {
            let work_rx = work_rx.clone();
            let work_tx = work_tx.clone();
            let item_tx = item_tx.clone();
            let in_flight = Arc::clone(&in_flight);
            let config = Arc::clone(&self.config);
            let spawned = thread::Builder::new()
                .name(format!("fsl-walk-{n}"))
                .spawn(move || walker_thread(&work_rx, &work_tx, &item_tx, &in_flight, &config));
            if let Err(e) = spawned {
                if n == 0 {
                    return Err(FslError::Runtime {
                        details: format!("failed to spawn walker thread: {e}"),
                    });
                }
                eprintln!("[FSL-SCAN] walker running with {n} thread(s): {e}");
                break;
            }
        }

        Ok(item_rx)
    }
}

fn walker_thread(
    work_rx: &channel::Receiver<PathBuf>,
    work_tx: &channel::Sender<PathBuf>,
    item_tx: &channel::Sender<WalkItem>,
    in_flight: &AtomicUsize,
    config: &WalkerConfig,
) {
    loop {
        match work_rx.recv_timeout(Duration::from_millis(20)) {
            Ok(dir) => {
                process_directory(&dir, work_tx, item_tx, in_flight, config);
                in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            Err(channel::RecvTimeoutError::Timeout) => {
                if in_flight.load(Ordering::Acquire) == 0 {
                    return;
                }
            }
            Err(channel::RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn process_directory(
    dir: &Path,
    work_tx: &channel::Sender<PathBuf>,
    item_tx: &channel::Sender<WalkItem>,
    in_flight: &AtomicUsize,
    config: &WalkerConfig,
) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            let _ = item_tx.send(WalkItem::Error {
                path: dir.to_path_buf(),
                message: e.to_string(),
            });
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let _ = item_tx.send(WalkItem::Error {
                    path: dir.to_path_buf(),
                    message: e.to_string(),
                });
                continue;
            }
        };
        let path = entry.path();

        if config.auto_ignore
            && AUTO_IGNORED_NAMES
                .iter()
                .any(|name| entry.file_name() == *name)
        {
            continue;
        }
        if is_ignored(&path, &config.ignored) {
            continue;
        }

        let file_type = match entry.file_type() {
            Ok(kind) => kind,
            Err(e) => {
                let _ = item_tx.send(WalkItem::Error {
                    path,
                    message: e.to_string(),
                });
                continue;
            }
        };

        let (is_dir, is_file) = if file_type.is_symlink() {
            if !config.follow_symlinks {
                continue;
            }
            match fs::metadata(&path) {
                Ok(meta) => (meta.is_dir(), meta.is_file()),
                Err(e) => {
                    let _ = item_tx.send(WalkItem::Error {
                        path,
                        message: format!("dangling symlink: {e}"),
                    });
                    continue;
                }
            }
        } else {
            (file_type.is_dir(), file_type.is_file())
        };

        if is_dir {
            in_flight.fetch_add(1, Ordering::AcqRel);
            if work_tx.send(path).is_err() {
                in_flight.fetch_sub(1, Ordering::AcqRel);
            }
        } else if is_file {
            let _ = item_tx.send(WalkItem::File(path));
        }
    }
}
