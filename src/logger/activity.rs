//! Activity logger thread.
//!
//! One thread owns the [`JsonlWriter`]. Every other thread holds a cloneable
//! [`ActivityLoggerHandle`] and pushes [`ActivityEvent`]s through a bounded
//! channel with `try_send`, so a slow disk never stalls a worker or the
//! tracker. Events that do not fit are counted and reported later.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{FslError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

/// Things worth recording in the activity log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityEvent {
    DaemonStarted {
        version: String,
        config_hash: String,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
    },
    SyncCompleted {
        local_length: u64,
        remote_length: u64,
        pulled: u64,
        duration_ms: u64,
    },
    DesyncDetected {
        chain_dir: String,
        details: String,
    },
    Resynced {
        chain_dir: String,
    },
    BlockUploaded {
        worker_id: String,
        root_path: String,
        index: u64,
        files: usize,
        duration_ms: u64,
    },
    GenerationFailed {
        worker_id: String,
        root_path: String,
        code: String,
        message: String,
    },
    TaskFailed {
        task_id: String,
        code: String,
        message: String,
    },
    WorkerAdded {
        worker_id: String,
        root_path: String,
    },
    WorkerRemoved {
        worker_id: String,
        root_path: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Stops the logger thread after everything queued before it is written.
    Shutdown,
}

impl ActivityEvent {
    /// `Error` event built from a typed error.
    pub fn from_error(err: &FslError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Non-blocking sender side of the activity logger.
#[derive(Debug, Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Handle with no logger behind it. Every event is discarded.
    pub fn disabled() -> Self {
        let (tx, _rx) = bounded(1);
        Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue an event. Never blocks; a full channel drops and counts it.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Events dropped since the logger last reported them.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Waits for queue space.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

/// Logger thread settings.
#[derive(Debug, Clone)]
pub struct ActivityLoggerConfig {
    pub jsonl: JsonlConfig,
    pub channel_capacity: usize,
}

/// Start the logger thread.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: Arc::clone(&dropped),
    };

    let jsonl = config.jsonl;
    let join = thread::Builder::new()
        .name("fsl-logger".to_string())
        .spawn(move || run_logger(&rx, jsonl, &dropped))
        .map_err(|e| FslError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn run_logger(rx: &Receiver<ActivityEvent>, config: JsonlConfig, dropped: &AtomicU64) {
    let mut writer = JsonlWriter::open(config);

    while let Ok(event) = rx.recv() {
        let lost = dropped.swap(0, Ordering::Relaxed);
        if lost > 0 {
            let mut warning = LogEntry::new(EventType::Error, Severity::Warning);
            warning.details = Some(format!("{lost} activity events dropped under back-pressure"));
            writer.write_entry(&warning);
        }

        if event == ActivityEvent::Shutdown {
            break;
        }
        writer.write_entry(&to_entry(event));
        if rx.is_empty() {
            writer.flush();
            writer.try_recover();
        }
    }

    writer.fsync();
}

fn to_entry(event: ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::DaemonStarted {
            version,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStart, Severity::Info);
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::DaemonStopped {
            reason,
            uptime_secs,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStop, Severity::Info);
            e.details = Some(format!("reason={reason} uptime={uptime_secs}s"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::SyncCompleted {
            local_length,
            remote_length,
            pulled,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::SyncCompleted, Severity::Info);
            e.local_length = Some(local_length);
            e.remote_length = Some(remote_length);
            e.duration_ms = Some(duration_ms);
            e.details = Some(format!("pulled={pulled}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::DesyncDetected { chain_dir, details } => {
            let mut e = LogEntry::new(EventType::DesyncDetected, Severity::Warning);
            e.path = Some(chain_dir);
            e.details = Some(details);
            e
        }
        ActivityEvent::Resynced { chain_dir } => {
            let mut e = LogEntry::new(EventType::Resync, Severity::Warning);
            e.path = Some(chain_dir);
            e.ok = Some(true);
            e
        }
        ActivityEvent::BlockUploaded {
            worker_id,
            root_path,
            index,
            files,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::BlockUploaded, Severity::Info);
            e.worker_id = Some(worker_id);
            e.path = Some(root_path);
            e.index = Some(index);
            e.duration_ms = Some(duration_ms);
            e.details = Some(format!("files={files}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::GenerationFailed {
            worker_id,
            root_path,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::GenerationFailed, Severity::Warning);
            e.worker_id = Some(worker_id);
            e.path = Some(root_path);
            e.ok = Some(false);
            e.error_code = Some(code);
            e.error_message = Some(message);
            e
        }
        ActivityEvent::TaskFailed {
            task_id,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::TaskFailed, Severity::Warning);
            e.details = Some(format!("task={task_id}"));
            e.ok = Some(false);
            e.error_code = Some(code);
            e.error_message = Some(message);
            e
        }
        ActivityEvent::WorkerAdded {
            worker_id,
            root_path,
        } => {
            let mut e = LogEntry::new(EventType::WorkerAdded, Severity::Info);
            e.worker_id = Some(worker_id);
            e.path = Some(root_path);
            e
        }
        ActivityEvent::WorkerRemoved {
            worker_id,
            root_path,
        } => {
            let mut e = LogEntry::new(EventType::WorkerRemoved, Severity::Info);
            e.worker_id = Some(worker_id);
            e.path = Some(root_path);
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.ok = Some(false);
            e.error_code = Some(code);
            e.error_message = Some(message);
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::DaemonStop, Severity::Info),
    }
}
