//! Per-root-path worker: periodically fingerprints a tree and commits the
//! result as the next ledger block.
//!
//! The worker never runs a generation itself. It submits a task keyed by its
//! id to the scheduler; while that task is pending or running the timer is
//! stopped, and the task restarts it when it finishes. A worker therefore has
//! at most one generation in flight and the period is measured from the end
//! of the previous attempt.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, after, never, select, unbounded};
use serde::{Deserialize, Serialize};

use crate::core::errors::{FslError, Result};
use crate::daemon::cancel::CancelToken;
use crate::daemon::scheduler::{Scheduler, Task};
use crate::ledger::{Block, validate_segment};
use crate::logger::{ActivityEvent, ActivityLoggerHandle, WorkerLog};
use crate::remote::BlockUploader;
use crate::replica::{ChainTracker, SyncInfo};
use crate::scanner::FingerprintProducer;

/// Persisted description of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    #[serde(default)]
    pub id: String,
    pub root_path: PathBuf,
    #[serde(alias = "generation_period")]
    pub generation_period_ms: u64,
    #[serde(default)]
    pub ignore_paths: Vec<PathBuf>,
}

impl WorkerRecord {
    /// New record with a freshly generated id.
    pub fn new(root_path: PathBuf, generation_period_ms: u64, ignore_paths: Vec<PathBuf>) -> Self {
        Self {
            id: generate_worker_id(),
            root_path,
            generation_period_ms,
            ignore_paths,
        }
    }

    #[must_use]
    pub fn generation_period(&self) -> Duration {
        Duration::from_millis(self.generation_period_ms.max(1))
    }
}

/// Sortable unique id: 10 hex digits of unix millis, 10 random hex digits.
pub fn generate_worker_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis().max(0);
    let noise: [u8; 5] = rand::random();
    format!("{millis:010x}{}", hex::encode(noise))
}

/// Accepts deduplicated tasks and runs them until cancelled.
pub trait TaskScheduler: Send + Sync {
    fn schedule(&self, task: Task) -> Result<()>;
    fn run(&self, cancel: &CancelToken);
}

impl TaskScheduler for Scheduler {
    fn schedule(&self, task: Task) -> Result<()> {
        Scheduler::schedule(self, task)
    }

    fn run(&self, cancel: &CancelToken) {
        Scheduler::run(self, cancel);
    }
}

/// Brings the local replica up to date and exposes its head.
pub trait SyncBarrier: Send + Sync {
    fn force_sync(&self) -> Result<SyncInfo>;
    fn local_head(&self) -> Result<Block>;
}

impl SyncBarrier for ChainTracker {
    fn force_sync(&self) -> Result<SyncInfo> {
        ChainTracker::force_sync(self)
    }

    fn local_head(&self) -> Result<Block> {
        ChainTracker::local_head(self)
    }
}

/// Capabilities a worker needs, shared by every worker of a service.
#[derive(Clone)]
pub struct WorkerDeps {
    pub scheduler: Arc<dyn TaskScheduler>,
    pub sync: Arc<dyn SyncBarrier>,
    pub uploader: Arc<dyn BlockUploader>,
    pub producer: Arc<dyn FingerprintProducer>,
    pub logger: ActivityLoggerHandle,
    pub worker_log: WorkerLog,
}

/// Live worker bound to one record.
pub struct Worker {
    record: WorkerRecord,
    deps: WorkerDeps,
}

impl Worker {
    pub fn new(record: WorkerRecord, deps: WorkerDeps) -> Self {
        Self { record, deps }
    }

    #[must_use]
    pub fn record(&self) -> &WorkerRecord {
        &self.record
    }

    /// Worker loop. Schedules a generation right away and then once per
    /// period until `cancel` fires.
    pub fn run(&self, cancel: &CancelToken) -> Result<()> {
        let root = &self.record.root_path;
        if !root.is_dir() {
            self.note(&format!("root {} is not a directory", root.display()));
            return Err(FslError::BadRootPath { path: root.clone() });
        }

        let period = self.record.generation_period();
        self.note(&format!(
            "starting worker: {} every {}ms",
            root.display(),
            period.as_millis()
        ));

        let (reset_tx, reset_rx): (Sender<()>, Receiver<()>) = unbounded();
        let mut timer = after(Duration::ZERO);
        loop {
            let wake = select! {
                recv(cancel.done()) -> _ => Wake::Cancelled,
                recv(timer) -> _ => Wake::Timer,
                recv(reset_rx) -> _ => Wake::Reset,
            };
            timer = match wake {
                Wake::Cancelled => break,
                Wake::Reset => after(period),
                Wake::Timer => {
                    let task = self.generation_task(cancel.clone(), reset_tx.clone());
                    match self.deps.scheduler.schedule(task) {
                        Ok(()) => never(),
                        Err(FslError::TaskAlreadyScheduled { .. }) => after(period),
                        Err(err) => {
                            self.note(&format!("cannot schedule: {err}"));
                            after(period)
                        }
                    }
                }
            };
        }

        self.note("stopped");
        Ok(())
    }

    fn note(&self, message: &str) {
        self.deps.worker_log.line(&self.record.id, message);
    }

    /// Run one generation inline: fingerprint, sync, stage, validate, upload.
    pub fn generate(&self) -> Result<Block> {
        generate(&self.record, &self.deps)
    }

    fn generation_task(&self, cancel: CancelToken, reset_tx: Sender<()>) -> Task {
        let record = self.record.clone();
        let deps = self.deps.clone();
        // Dropped with the closure, whether it ran or was discarded.
        let reset = ResetTimer(reset_tx);
        Task::new(record.id.clone(), move || {
            let _reset = reset;
            if cancel.is_cancelled() {
                return Ok(());
            }
            generate(&record, &deps).map(|_| ())
        })
    }
}

fn generate(record: &WorkerRecord, deps: &WorkerDeps) -> Result<Block> {
    let started = Instant::now();
    let outcome = stage_and_upload(record, deps);
    match &outcome {
        Ok((block, files)) => {
            deps.worker_log.line(
                &record.id,
                &format!(
                    "uploaded block {} ({} files, hash {})",
                    block.index,
                    files,
                    block.short_hash()
                ),
            );
            deps.logger.send(ActivityEvent::BlockUploaded {
                worker_id: record.id.clone(),
                root_path: record.root_path.display().to_string(),
                index: block.index,
                files: *files,
                duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            });
        }
        Err(err) => {
            deps.worker_log
                .line(&record.id, &format!("generation failed: {err}"));
            deps.logger.send(ActivityEvent::GenerationFailed {
                worker_id: record.id.clone(),
                root_path: record.root_path.display().to_string(),
                code: err.code().to_string(),
                message: err.to_string(),
            });
        }
    }
    outcome.map(|(block, _)| block)
}

fn stage_and_upload(record: &WorkerRecord, deps: &WorkerDeps) -> Result<(Block, usize)> {
    let blockmap = deps
        .producer
        .fingerprint(&record.root_path, &record.ignore_paths)?;
    if !blockmap.errors.is_empty() {
        deps.worker_log.line(
            &record.id,
            &format!(
                "{} file(s) could not be fingerprinted",
                blockmap.errors.len()
            ),
        );
    }
    let files = blockmap.entries.len();
    let payload = blockmap.to_payload()?;

    deps.sync.force_sync()?;
    let head = deps.sync.local_head()?;
    let staged = Block::next(&head, payload);
    validate_segment(&[head, staged.clone()])?;
    deps.uploader.upload_block(&staged)?;
    Ok((staged, files))
}

enum Wake {
    Cancelled,
    Timer,
    Reset,
}

struct ResetTimer(Sender<()>);

impl Drop for ResetTimer {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}
