//! Owner of the worker set.
//!
//! The service keeps the in-memory worker list and `workers.json` in step:
//! every mutation is persisted before it takes effect, under one mutex. While
//! the service is running each worker has its own thread and a child token of
//! the service token; removing a worker cancels and joins just that thread.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::core::errors::{FslError, Result};
use crate::core::paths::resolve_root_path;
use crate::daemon::cancel::CancelToken;
use crate::daemon::scheduler::{Task, Work};
use crate::daemon::worker::{Worker, WorkerDeps, WorkerRecord};
use crate::daemon::worker_config::{WorkerConfig, WorkerConfigStore};
use crate::logger::ActivityEvent;

struct Slot {
    record: WorkerRecord,
    cancel: Option<CancelToken>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct ServiceState {
    slots: Vec<Slot>,
    /// Present while `run` is active; parent of every worker token.
    running: Option<CancelToken>,
}

pub struct WorkerService {
    deps: WorkerDeps,
    store: Arc<dyn WorkerConfigStore>,
    state: Mutex<ServiceState>,
}

impl WorkerService {
    /// Load the persisted worker list. Workers start with [`Self::run`].
    pub fn new(deps: WorkerDeps, store: Arc<dyn WorkerConfigStore>) -> Result<Self> {
        let config = store.read_config()?;
        let slots = config
            .workers
            .into_iter()
            .map(|record| Slot {
                record,
                cancel: None,
                handle: None,
            })
            .collect();
        Ok(Self {
            deps,
            store,
            state: Mutex::new(ServiceState {
                slots,
                running: None,
            }),
        })
    }

    /// Run the scheduler and every worker until `cancel` fires. Workers are
    /// stopped and joined first, then the scheduler drains.
    pub fn run(&self, cancel: &CancelToken) -> Result<()> {
        let service_token = {
            let mut state = self.state.lock();
            if state.running.is_some() {
                return Err(FslError::Runtime {
                    details: "worker service is already running".to_string(),
                });
            }
            let token = cancel.child();
            for slot in &mut state.slots {
                self.start_slot(slot, &token);
            }
            state.running = Some(token.clone());
            token
        };

        let scheduler_token = CancelToken::new();
        let scheduler = {
            let scheduler = Arc::clone(&self.deps.scheduler);
            let token = scheduler_token.clone();
            thread::Builder::new()
                .name("fsl-scheduler".to_string())
                .spawn(move || scheduler.run(&token))
                .map_err(|e| FslError::Runtime {
                    details: format!("failed to spawn scheduler thread: {e}"),
                })
        };
        let scheduler = match scheduler {
            Ok(handle) => handle,
            Err(err) => {
                service_token.cancel();
                self.stop_all();
                return Err(err);
            }
        };

        eprintln!("[FSL-WORKER] service running {} worker(s)", self.len());
        let _ = service_token.done().recv();

        self.stop_all();
        scheduler_token.cancel();
        if scheduler.join().is_err() {
            eprintln!("[FSL-WORKER] scheduler thread panicked");
        }
        eprintln!("[FSL-WORKER] service stopped");
        Ok(())
    }

    /// Register and persist a worker; starts it at once if the service runs.
    pub fn add_worker(
        &self,
        root_path: PathBuf,
        generation_period_ms: u64,
        ignore_paths: Vec<PathBuf>,
    ) -> Result<WorkerRecord> {
        if generation_period_ms == 0 {
            return Err(FslError::InvalidConfig {
                details: "generation period must be greater than zero".to_string(),
            });
        }
        let record = WorkerRecord::new(
            resolve_root_path(&root_path),
            generation_period_ms,
            ignore_paths,
        );

        let mut state = self.state.lock();
        let mut config = snapshot_config(&state);
        config.workers.push(record.clone());
        self.store.write_config(&config)?;

        let mut slot = Slot {
            record: record.clone(),
            cancel: None,
            handle: None,
        };
        if let Some(parent) = state.running.clone() {
            self.start_slot(&mut slot, &parent);
        }
        state.slots.push(slot);
        drop(state);

        self.deps.logger.send(ActivityEvent::WorkerAdded {
            worker_id: record.id.clone(),
            root_path: record.root_path.display().to_string(),
        });
        Ok(record)
    }

    /// Stop, unregister, and persist the removal of the worker at `index`.
    pub fn delete_worker_by_index(&self, index: usize) -> Result<WorkerRecord> {
        let mut state = self.state.lock();
        let len = state.slots.len();
        if index >= len {
            return Err(FslError::IndexOutOfBounds { index, len });
        }
        let mut config = snapshot_config(&state);
        config.workers.remove(index);
        self.store.write_config(&config)?;

        let mut slot = state.slots.remove(index);
        drop(state);

        if let Some(cancel) = slot.cancel.take() {
            cancel.cancel();
        }
        join_worker(&slot.record, slot.handle.take());

        self.deps.logger.send(ActivityEvent::WorkerRemoved {
            worker_id: slot.record.id.clone(),
            root_path: slot.record.root_path.display().to_string(),
        });
        Ok(slot.record)
    }

    pub fn get_worker_by_index(&self, index: usize) -> Result<WorkerRecord> {
        let state = self.state.lock();
        state
            .slots
            .get(index)
            .map(|slot| slot.record.clone())
            .ok_or(FslError::IndexOutOfBounds {
                index,
                len: state.slots.len(),
            })
    }

    #[must_use]
    pub fn list_workers(&self) -> Vec<WorkerRecord> {
        self.state
            .lock()
            .slots
            .iter()
            .map(|slot| slot.record.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.lock().running.is_some()
    }

    /// Hand arbitrary work to the shared scheduler under `id`.
    pub fn schedule_work(&self, id: impl Into<String>, work: Work) -> Result<()> {
        self.deps.scheduler.schedule(Task::new(id, work))
    }

    fn start_slot(&self, slot: &mut Slot, parent: &CancelToken) {
        let token = parent.child();
        let worker = Worker::new(slot.record.clone(), self.deps.clone());
        let logger = self.deps.logger.clone();
        let thread_token = token.clone();
        let spawned = thread::Builder::new()
            .name(format!("fsl-worker-{}", slot.record.id))
            .spawn(move || {
                if let Err(err) = worker.run(&thread_token) {
                    logger.send(ActivityEvent::from_error(&err));
                }
            });
        match spawned {
            Ok(handle) => {
                slot.cancel = Some(token);
                slot.handle = Some(handle);
            }
            Err(e) => {
                eprintln!(
                    "[FSL-WORKER] failed to spawn worker {}: {e}",
                    slot.record.id
                );
            }
        }
    }

    fn stop_all(&self) {
        let handles: Vec<(WorkerRecord, Option<JoinHandle<()>>)> = {
            let mut state = self.state.lock();
            state.running = None;
            state
                .slots
                .iter_mut()
                .map(|slot| {
                    if let Some(cancel) = slot.cancel.take() {
                        cancel.cancel();
                    }
                    (slot.record.clone(), slot.handle.take())
                })
                .collect()
        };
        for (record, handle) in handles {
            join_worker(&record, handle);
        }
    }
}

fn snapshot_config(state: &ServiceState) -> WorkerConfig {
    WorkerConfig {
        workers: state.slots.iter().map(|slot| slot.record.clone()).collect(),
    }
}

fn join_worker(record: &WorkerRecord, handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle {
        if handle.join().is_err() {
            eprintln!("[FSL-WORKER] worker {} panicked", record.id);
        }
    }
}
