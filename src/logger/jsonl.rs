//! Append-only JSONL activity log.
//!
//! One self-contained JSON object per line, written with a single
//! `write_all` so a concurrent `tail -f` never sees half a record.
//!
//! When the primary file cannot be written the writer degrades step by step:
//! primary path, then the optional fallback path, then stderr (tagged
//! `[FSL-JSONL]`), then silent discard. Logging never takes the daemon down.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::core::config::LoggingConfig;
use crate::core::errors::{FslError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Activity event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DaemonStart,
    DaemonStop,
    SyncCompleted,
    DesyncDetected,
    Resync,
    BlockUploaded,
    GenerationFailed,
    TaskFailed,
    WorkerAdded,
    WorkerRemoved,
    Error,
}

/// One line of the activity log. Only `ts`, `event`, and `severity` are
/// always present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp, millisecond precision.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    /// Worker root or chain directory involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Block index involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    /// `FSL-xxxx` code of the failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Entry stamped with the current UTC time and no optional fields.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            event,
            severity,
            worker_id: None,
            path: None,
            index: None,
            local_length: None,
            remote_length: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }

    /// Attach an error's code and message.
    #[must_use]
    pub fn with_error(mut self, err: &FslError) -> Self {
        self.ok = Some(false);
        self.error_code = Some(err.code().to_string());
        self.error_message = Some(err.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sink {
    Primary,
    Fallback,
    Stderr,
    Discard,
}

impl Sink {
    const fn label(self) -> &'static str {
        match self {
            Self::Primary => "normal",
            Self::Fallback => "fallback",
            Self::Stderr => "stderr",
            Self::Discard => "discard",
        }
    }
}

/// Writer settings.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    /// Rotate once the current file would exceed this size.
    pub max_size_bytes: u64,
    /// Rotated generations kept (`.1` newest ..= `.N` oldest).
    pub max_rotated_files: u32,
    pub fsync_interval_secs: u64,
}

impl JsonlConfig {
    /// Settings for `path` using the configured rotation policy. The fallback
    /// lives in the system temp dir so it is on a different mount most of
    /// the time.
    pub fn from_logging(path: PathBuf, logging: &LoggingConfig) -> Self {
        Self {
            path,
            fallback_path: Some(std::env::temp_dir().join("fsledger-activity.jsonl")),
            max_size_bytes: logging.max_size_bytes,
            max_rotated_files: logging.max_rotated_files,
            fsync_interval_secs: logging.fsync_interval_secs,
        }
    }
}

/// Append-only JSONL writer with size-based rotation and degradation.
pub struct JsonlWriter {
    config: JsonlConfig,
    file: Option<BufWriter<File>>,
    sink: Sink,
    current_size: u64,
    last_sync: Instant,
}

impl JsonlWriter {
    /// Open the primary path, degrading immediately if that fails.
    pub fn open(config: JsonlConfig) -> Self {
        let mut writer = Self {
            config,
            file: None,
            sink: Sink::Primary,
            current_size: 0,
            last_sync: Instant::now(),
        };
        if !writer.attach(Sink::Primary) {
            writer.fall_back();
        }
        writer
    }

    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(mut line) => {
                line.push('\n');
                self.write_line(&line);
            }
            Err(e) => {
                let _ = writeln!(io::stderr(), "[FSL-JSONL] cannot serialize entry: {e}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
    }

    /// Flush and `fdatasync` the current file.
    pub fn fsync(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
            let _ = file.get_ref().sync_data();
        }
        self.last_sync = Instant::now();
    }

    /// `"normal"`, `"fallback"`, `"stderr"`, or `"discard"`.
    pub fn state(&self) -> &'static str {
        self.sink.label()
    }

    pub fn bytes_written(&self) -> u64 {
        self.current_size
    }

    /// Try to return to the primary path after a degradation.
    pub fn try_recover(&mut self) {
        if self.sink == Sink::Primary {
            return;
        }
        self.flush();
        if self.attach(Sink::Primary) {
            let _ = writeln!(
                io::stderr(),
                "[FSL-JSONL] recovered primary log {}",
                self.config.path.display()
            );
        }
    }

    fn sink_path(&self, sink: Sink) -> Option<&Path> {
        match sink {
            Sink::Primary => Some(&self.config.path),
            Sink::Fallback => self.config.fallback_path.as_deref(),
            Sink::Stderr | Sink::Discard => None,
        }
    }

    /// Point the writer at a file-backed sink. `false` if it cannot be opened.
    fn attach(&mut self, sink: Sink) -> bool {
        let Some(path) = self.sink_path(sink) else {
            return false;
        };
        match open_append(path) {
            Ok((file, size)) => {
                self.file = Some(BufWriter::with_capacity(64 * 1024, file));
                self.sink = sink;
                self.current_size = size;
                true
            }
            Err(_) => false,
        }
    }

    /// Move one step down the degradation ladder.
    fn fall_back(&mut self) {
        self.file = None;
        match self.sink {
            Sink::Primary => {
                if self.attach(Sink::Fallback) {
                    let _ = writeln!(
                        io::stderr(),
                        "[FSL-JSONL] primary log unavailable, writing to fallback {}",
                        self.config
                            .fallback_path
                            .as_deref()
                            .map_or_else(String::new, |p| p.display().to_string())
                    );
                    return;
                }
                let _ = writeln!(io::stderr(), "[FSL-JSONL] log files unavailable, using stderr");
                self.sink = Sink::Stderr;
            }
            Sink::Fallback => {
                let _ = writeln!(io::stderr(), "[FSL-JSONL] fallback log failed, using stderr");
                self.sink = Sink::Stderr;
            }
            Sink::Stderr | Sink::Discard => self.sink = Sink::Discard,
        }
    }

    fn write_line(&mut self, line: &str) {
        let len = line.len() as u64;
        if self.file.is_some() && self.current_size + len > self.config.max_size_bytes {
            self.rotate();
        }

        match self.sink {
            Sink::Primary | Sink::Fallback => {
                let written = self
                    .file
                    .as_mut()
                    .is_some_and(|file| file.write_all(line.as_bytes()).is_ok());
                if !written {
                    self.fall_back();
                    self.write_line(line);
                    return;
                }
                self.current_size += len;
                if self.last_sync.elapsed().as_secs() >= self.config.fsync_interval_secs {
                    self.fsync();
                }
            }
            Sink::Stderr => {
                if write!(io::stderr(), "[FSL-JSONL] {line}").is_err() {
                    self.sink = Sink::Discard;
                }
            }
            Sink::Discard => {}
        }
    }

    /// `activity.jsonl` → `.1`, `.1` → `.2`, ..., dropping the oldest.
    fn rotate(&mut self) {
        self.flush();
        self.file = None;
        let sink = self.sink;
        let Some(base) = self.sink_path(sink).map(Path::to_path_buf) else {
            return;
        };

        let keep = self.config.max_rotated_files;
        let _ = fs::remove_file(rotated_name(&base, keep));
        for generation in (1..keep).rev() {
            let _ = fs::rename(
                rotated_name(&base, generation),
                rotated_name(&base, generation + 1),
            );
        }
        let _ = fs::rename(&base, rotated_name(&base, 1));

        if self.attach(sink) {
            self.current_size = 0;
        } else {
            self.fall_back();
        }
    }
}

fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| FslError::io(parent, e))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| FslError::io(path, e))?;
    let size = file.metadata().map_or(0, |m| m.len());
    Ok((file, size))
}

fn rotated_name(base: &Path, generation: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{generation}"));
    PathBuf::from(name)
}
