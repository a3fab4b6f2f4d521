//! Configuration system: TOML file + env var overrides + defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{FslError, Result};
use crate::core::paths::{CHAIN_DIR_NAME, default_home_dir};

/// Full fsledger configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub daemon: DaemonConfig,
    pub remote: RemoteConfig,
    pub scanner: ScannerConfig,
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
}

/// Loop timing and concurrency limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Interval between periodic chain tracker passes.
    pub tracking_period_ms: u64,
    /// Maximum number of generation tasks executing at once.
    pub concurrent_task_limit: usize,
    /// Block startup on one force-sync pass before starting workers.
    pub initial_sync: bool,
    /// How often the main loop polls signal flags.
    pub signal_poll_ms: u64,
}

/// Remote ledger endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    pub chain_length_endpoint: String,
    pub chain_block_endpoint: String,
    pub request_timeout_ms: u64,
}

/// Fingerprint walker settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScannerConfig {
    pub parallelism: usize,
    /// Skip OS-generated metadata files (`.DS_Store`, `Thumbs.db`, ...).
    pub auto_ignore: bool,
    pub follow_symlinks: bool,
}

/// Filesystem paths used by fsledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub home_dir: PathBuf,
    pub config_file: PathBuf,
    pub chain_dir: PathBuf,
    pub workers_file: PathBuf,
    pub credentials_file: PathBuf,
    pub jsonl_log: PathBuf,
    /// One `<worker id>.log` per worker.
    pub worker_log_dir: PathBuf,
}

/// Activity log rotation and durability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
    pub fsync_interval_secs: u64,
    pub channel_capacity: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            tracking_period_ms: 30_000,
            concurrent_task_limit: 3,
            initial_sync: true,
            signal_poll_ms: 250,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            chain_length_endpoint: "https://govice.org/chain/length".to_string(),
            chain_block_endpoint: "https://govice.org/chain/block".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            parallelism: std::thread::available_parallelism()
                .map_or(2, |n| n.get().saturating_div(2).max(1)),
            auto_ignore: true,
            follow_symlinks: false,
        }
    }
}

impl PathsConfig {
    /// Layout rooted at an explicit home directory.
    #[must_use]
    pub fn rooted_at(home: &Path) -> Self {
        Self {
            home_dir: home.to_path_buf(),
            config_file: home.join("config.toml"),
            chain_dir: home.join(CHAIN_DIR_NAME),
            workers_file: home.join("workers.json"),
            credentials_file: home.join("credentials.json"),
            jsonl_log: home.join("activity.jsonl"),
            worker_log_dir: home.join("logs"),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self::rooted_at(&default_home_dir())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 50 * 1024 * 1024,
            max_rotated_files: 5,
            fsync_interval_secs: 30,
            channel_capacity: 1024,
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| FslError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(FslError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form so the value is stable across
    /// processes and toolchains.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // daemon
        set_u64(
            &mut lookup,
            "FSL_DAEMON_TRACKING_PERIOD_MS",
            &mut self.daemon.tracking_period_ms,
        )?;
        set_usize(
            &mut lookup,
            "FSL_DAEMON_CONCURRENT_TASK_LIMIT",
            &mut self.daemon.concurrent_task_limit,
        )?;
        set_bool(
            &mut lookup,
            "FSL_DAEMON_INITIAL_SYNC",
            &mut self.daemon.initial_sync,
        )?;

        // remote
        if let Some(raw) = lookup("FSL_REMOTE_CHAIN_LENGTH_ENDPOINT") {
            self.remote.chain_length_endpoint = raw;
        }
        if let Some(raw) = lookup("FSL_REMOTE_CHAIN_BLOCK_ENDPOINT") {
            self.remote.chain_block_endpoint = raw;
        }
        set_u64(
            &mut lookup,
            "FSL_REMOTE_REQUEST_TIMEOUT_MS",
            &mut self.remote.request_timeout_ms,
        )?;

        // scanner
        set_usize(
            &mut lookup,
            "FSL_SCANNER_PARALLELISM",
            &mut self.scanner.parallelism,
        )?;
        set_bool(
            &mut lookup,
            "FSL_SCANNER_AUTO_IGNORE",
            &mut self.scanner.auto_ignore,
        )?;

        // paths: moving the home dir re-roots every derived path that was
        // still at its default location.
        if let Some(raw) = lookup("FSL_HOME") {
            let config_file = self.paths.config_file.clone();
            self.paths = PathsConfig::rooted_at(Path::new(&raw));
            self.paths.config_file = config_file;
        }

        Ok(())
    }

    fn normalize_paths(&mut self) {
        for endpoint in [
            &mut self.remote.chain_length_endpoint,
            &mut self.remote.chain_block_endpoint,
        ] {
            let trimmed = endpoint.trim().trim_end_matches('/').to_string();
            *endpoint = trimmed;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.daemon.tracking_period_ms == 0 {
            return Err(FslError::InvalidConfig {
                details: "daemon.tracking_period_ms must be > 0".to_string(),
            });
        }
        if self.daemon.concurrent_task_limit == 0 {
            return Err(FslError::InvalidConfig {
                details: "daemon.concurrent_task_limit must be >= 1".to_string(),
            });
        }
        if self.daemon.signal_poll_ms == 0 {
            return Err(FslError::InvalidConfig {
                details: "daemon.signal_poll_ms must be > 0".to_string(),
            });
        }
        if self.scanner.parallelism == 0 {
            return Err(FslError::InvalidConfig {
                details: "scanner.parallelism must be >= 1".to_string(),
            });
        }
        if self.remote.request_timeout_ms == 0 {
            return Err(FslError::InvalidConfig {
                details: "remote.request_timeout_ms must be > 0".to_string(),
            });
        }
        for (name, endpoint) in [
            ("chain_length_endpoint", &self.remote.chain_length_endpoint),
            ("chain_block_endpoint", &self.remote.chain_block_endpoint),
        ] {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(FslError::InvalidConfig {
                    details: format!("remote.{name} must be an http(s) URL, got {endpoint:?}"),
                });
            }
        }
        if self.logging.max_rotated_files == 0 || self.logging.channel_capacity == 0 {
            return Err(FslError::InvalidConfig {
                details: "logging.max_rotated_files and logging.channel_capacity must be > 0"
                    .to_string(),
            });
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| FslError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn set_u64<F>(lookup: &mut F, name: &str, slot: &mut u64) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_env(name, &raw)?;
    }
    Ok(())
}

fn set_usize<F>(lookup: &mut F, name: &str, slot: &mut usize) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_env(name, &raw)?;
    }
    Ok(())
}

fn set_bool<F>(lookup: &mut F, name: &str, slot: &mut bool) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_env(name, &raw)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Config, FslError};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn defaults_match_daemon_conventions() {
        let cfg = Config::default();
        assert_eq!(cfg.daemon.tracking_period_ms, 30_000);
        assert_eq!(cfg.daemon.concurrent_task_limit, 3);
        assert!(cfg.paths.chain_dir.ends_with("chain"));
        assert!(cfg.paths.workers_file.ends_with("workers.json"));
    }

    #[test]
    fn zero_task_limit_rejected() {
        let mut cfg = Config::default();
        cfg.daemon.concurrent_task_limit = 0;
        let err = cfg.validate().expect_err("expected invalid limit");
        match err {
            FslError::InvalidConfig { details } => {
                assert!(details.contains("concurrent_task_limit"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_http_endpoint_rejected() {
        let mut cfg = Config::default();
        cfg.remote.chain_block_endpoint = "ftp://ledger/block".to_string();
        let err = cfg.validate().expect_err("expected endpoint error");
        assert!(err.to_string().contains("chain_block_endpoint"));
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = Config::default();
        let before = cfg.stable_hash().expect("hash should compute");
        let mut modified = Config::default();
        modified.daemon.tracking_period_ms += 1;
        let after = modified.stable_hash().expect("hash should compute");
        assert_ne!(before, after);
        assert_eq!(before, Config::default().stable_hash().unwrap());
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        let overrides = vars(&[
            ("FSL_DAEMON_TRACKING_PERIOD_MS", "500"),
            ("FSL_DAEMON_CONCURRENT_TASK_LIMIT", "7"),
            ("FSL_DAEMON_INITIAL_SYNC", "false"),
            ("FSL_REMOTE_CHAIN_LENGTH_ENDPOINT", "http://127.0.0.1:8080/length"),
        ]);
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("overrides should parse");
        assert_eq!(cfg.daemon.tracking_period_ms, 500);
        assert_eq!(cfg.daemon.concurrent_task_limit, 7);
        assert!(!cfg.daemon.initial_sync);
        assert_eq!(
            cfg.remote.chain_length_endpoint,
            "http://127.0.0.1:8080/length"
        );
    }

    #[test]
    fn env_override_parse_error_names_variable() {
        let mut cfg = Config::default();
        let overrides = vars(&[("FSL_DAEMON_TRACKING_PERIOD_MS", "soon")]);
        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("expected parse failure");
        assert!(err.to_string().contains("FSL_DAEMON_TRACKING_PERIOD_MS"));
    }

    #[test]
    fn home_override_reroots_paths_but_keeps_config_file() {
        let mut cfg = Config::default();
        cfg.paths.config_file = PathBuf::from("/etc/fsledger.toml");
        let overrides = vars(&[("FSL_HOME", "/srv/fsl")]);
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .unwrap();
        assert_eq!(cfg.paths.chain_dir, Path::new("/srv/fsl/chain"));
        assert_eq!(cfg.paths.workers_file, Path::new("/srv/fsl/workers.json"));
        assert_eq!(cfg.paths.worker_log_dir, Path::new("/srv/fsl/logs"));
        assert_eq!(cfg.paths.config_file, Path::new("/etc/fsledger.toml"));
    }

    #[test]
    fn load_reads_toml_and_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[daemon]\ntracking_period_ms = 1500\n\n[remote]\nchain_block_endpoint = \"http://ledger.local/block/\"\n",
        )
        .unwrap();
        let cfg = Config::load(Some(&path)).expect("config should load");
        assert_eq!(cfg.daemon.tracking_period_ms, 1500);
        assert_eq!(cfg.daemon.concurrent_task_limit, 3);
        assert_eq!(cfg.remote.chain_block_endpoint, "http://ledger.local/block");
        assert_eq!(cfg.paths.config_file, path);
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let err = Config::load(Some(Path::new("/fsledger-no-such-dir/config.toml")))
            .expect_err("expected missing config");
        assert_eq!(err.code(), "FSL-3002");
    }
}
