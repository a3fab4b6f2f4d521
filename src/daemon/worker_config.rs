//! Persistent worker list (`workers.json`).

#![allow(missing_docs)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{FslError, Result};
use crate::core::paths::write_atomic;
use crate::daemon::worker::{WorkerRecord, generate_worker_id};

/// On-disk document: `{"workers": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub workers: Vec<WorkerRecord>,
}

impl WorkerConfig {
    /// Give every record without an id a fresh one. Returns whether any
    /// record changed.
    pub fn assign_missing_ids(&mut self) -> bool {
        let mut changed = false;
        for record in &mut self.workers {
            if record.id.trim().is_empty() {
                record.id = generate_worker_id();
                changed = true;
            }
        }
        changed
    }
}

/// Where the worker list lives.
pub trait WorkerConfigStore: Send + Sync {
    fn read_config(&self) -> Result<WorkerConfig>;
    fn write_config(&self, config: &WorkerConfig) -> Result<()>;
}

/// `workers.json` on the local filesystem.
#[derive(Debug, Clone)]
pub struct JsonWorkerConfigStore {
    path: PathBuf,
}

impl JsonWorkerConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WorkerConfigStore for JsonWorkerConfigStore {
    /// A missing file is an empty list. Ids assigned to legacy records are
    /// written back so they survive restarts.
    fn read_config(&self) -> Result<WorkerConfig> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(WorkerConfig::default()),
            Err(e) => return Err(FslError::io(&self.path, e)),
        };
        if raw.trim().is_empty() {
            return Ok(WorkerConfig::default());
        }
        let mut config: WorkerConfig =
            serde_json::from_str(&raw).map_err(|e| FslError::ConfigParse {
                context: "workers.json",
                details: e.to_string(),
            })?;
        if config.assign_missing_ids() {
            self.write_config(&config)?;
        }
        Ok(config)
    }

    fn write_config(&self, config: &WorkerConfig) -> Result<()> {
        let mut body = serde_json::to_vec_pretty(config)?;
        body.push(b'\n');
        write_atomic(&self.path, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonWorkerConfigStore::new(dir.path().join("workers.json"));
        assert!(store.read_config().unwrap().workers.is_empty());
    }

    #[test]
    fn write_then_read_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonWorkerConfigStore::new(dir.path().join("nested/workers.json"));
        let config = WorkerConfig {
            workers: vec![
                WorkerRecord::new(PathBuf::from("/srv/a"), 1000, vec![PathBuf::from("tmp")]),
                WorkerRecord::new(PathBuf::from("/srv/b"), 5000, Vec::new()),
            ],
        };
        store.write_config(&config).unwrap();
        assert_eq!(store.read_config().unwrap(), config);
    }

    #[test]
    fn legacy_document_gets_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workers.json");
        fs::write(
            &path,
            r#"{"workers":[{"root_path":"/srv/a","generation_period":3000}]}"#,
        )
        .unwrap();
        let store = JsonWorkerConfigStore::new(&path);
        let config = store.read_config().unwrap();
        assert_eq!(config.workers.len(), 1);
        assert!(!config.workers[0].id.is_empty());
        assert!(config.workers[0].ignore_paths.is_empty());

        assert_eq!(store.read_config().unwrap(), config);
        let on_disk: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["workers"][0]["id"], config.workers[0].id.as_str());
    }

    #[test]
    fn malformed_document_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workers.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            JsonWorkerConfigStore::new(&path).read_config(),
            Err(FslError::ConfigParse { .. })
        ));
    }
}
