//! Per-worker text log.
//!
//! Every message is tagged `[FSL-WORKER]` on stderr and appended as one
//! timestamped line to `<dir>/<worker id>.log`. The file is opened per line,
//! so deleting or rotating it from outside needs no coordination.

#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};

/// Cloneable sink shared by every worker of a service.
#[derive(Debug, Clone, Default)]
pub struct WorkerLog {
    dir: Option<PathBuf>,
}

impl WorkerLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    /// Stderr only.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn path_for(&self, worker_id: &str) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        let stem: String = worker_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        Some(dir.join(format!("{stem}.log")))
    }

    pub fn line(&self, worker_id: &str, message: &str) {
        eprintln!("[FSL-WORKER] {worker_id}: {message}");
        let Some(path) = self.path_for(worker_id) else {
            return;
        };
        if let Err(e) = append_line(&path, message) {
            eprintln!(
                "[FSL-WORKER] {worker_id}: cannot write {}: {e}",
                path.display()
            );
        }
    }
}

fn append_line(path: &Path, message: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    file.write_all(format!("{ts} {message}\n").as_bytes())
}
