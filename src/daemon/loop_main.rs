//! Daemon wiring and lifecycle.
//!
//! Threads: the main thread polls signal flags; the chain tracker, the worker
//! service (which owns the scheduler and one thread per worker) and the
//! activity logger each run on their own threads. Shutdown runs in reverse
//! dependency order: workers and in-flight tasks first, then the tracker they
//! sync against, then the logger.

#![allow(missing_docs)]

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::core::config::Config;
use crate::core::errors::{FslError, Result};
use crate::daemon::cancel::CancelToken;
use crate::daemon::scheduler::Scheduler;
use crate::daemon::signals::SignalHandler;
use crate::daemon::worker::WorkerDeps;
use crate::daemon::worker_config::JsonWorkerConfigStore;
use crate::daemon::worker_service::WorkerService;
use crate::logger::jsonl::JsonlConfig;
use crate::logger::{
    ActivityEvent, ActivityLoggerConfig, ActivityLoggerHandle, WorkerLog, spawn_logger,
};
use crate::remote::{BlockUploader, RemoteChainReader};
use crate::replica::{ChainStore, ChainTracker};
use crate::scanner::BlockmapGenerator;

/// The fsledger daemon.
pub struct Daemon {
    config: Config,
    logger_handle: ActivityLoggerHandle,
    logger_join: Option<thread::JoinHandle<()>>,
    signal_handler: SignalHandler,
    tracker: Arc<ChainTracker>,
    service: Arc<WorkerService>,
    start_time: Instant,
}

impl Daemon {
    /// Build the daemon against the configured HTTP ledger.
    #[cfg(feature = "http")]
    pub fn init(config: Config) -> Result<Self> {
        use crate::remote::http::{Credentials, HttpLedger};

        let credentials = Credentials::load(&config.paths.credentials_file)?;
        let remote = Arc::new(HttpLedger::new(&config.remote, &credentials)?);
        Self::init_with(config, remote, SignalHandler::new())
    }

    #[cfg(not(feature = "http"))]
    pub fn init(_config: Config) -> Result<Self> {
        Err(FslError::InvalidConfig {
            details: "built without the `http` feature; no remote ledger available".to_string(),
        })
    }

    /// Build the daemon against any remote ledger. Creating the home
    /// directory is the only fatal filesystem step.
    pub fn init_with<R>(config: Config, remote: Arc<R>, signal_handler: SignalHandler) -> Result<Self>
    where
        R: RemoteChainReader + BlockUploader + 'static,
    {
        let start_time = Instant::now();
        let home = &config.paths.home_dir;
        fs::create_dir_all(home).map_err(|e| FslError::io(home, e))?;

        // 1. Logger.
        let (logger_handle, logger_join) = spawn_logger(ActivityLoggerConfig {
            jsonl: JsonlConfig::from_logging(config.paths.jsonl_log.clone(), &config.logging),
            channel_capacity: config.logging.channel_capacity,
        })?;

        // 2. Chain tracker.
        let reader: Arc<dyn RemoteChainReader> = remote.clone();
        let tracker = Arc::new(ChainTracker::new(
            ChainStore::new(config.paths.chain_dir.clone()),
            reader,
            Duration::from_millis(config.daemon.tracking_period_ms),
            logger_handle.clone(),
        ));

        // 3. Scheduler, producer, worker service.
        let scheduler = Scheduler::new(config.daemon.concurrent_task_limit)
            .with_logger(logger_handle.clone());
        let deps = WorkerDeps {
            scheduler: Arc::new(scheduler),
            sync: tracker.clone(),
            uploader: remote,
            producer: Arc::new(BlockmapGenerator::from_config(&config.scanner)),
            logger: logger_handle.clone(),
            worker_log: WorkerLog::new(config.paths.worker_log_dir.clone()),
        };
        let store = Arc::new(JsonWorkerConfigStore::new(config.paths.workers_file.clone()));
        let service = Arc::new(WorkerService::new(deps, store)?);

        Ok(Self {
            config,
            logger_handle,
            logger_join: Some(logger_join),
            signal_handler,
            tracker,
            service,
            start_time,
        })
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<ChainTracker> {
        &self.tracker
    }

    #[must_use]
    pub fn service(&self) -> &Arc<WorkerService> {
        &self.service
    }

    #[must_use]
    pub fn signal_handler(&self) -> &SignalHandler {
        &self.signal_handler
    }

    /// Run until a shutdown signal (or a dead tracker) stops the daemon.
    pub fn run(&mut self) -> Result<()> {
        let config_hash = self.config.stable_hash().unwrap_or_default();
        self.logger_handle.send(ActivityEvent::DaemonStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash,
        });
        eprintln!(
            "[FSL-DAEMON] starting: chain={} workers={}",
            self.config.paths.chain_dir.display(),
            self.service.len()
        );

        let tracker_token = CancelToken::new();
        let service_token = CancelToken::new();

        let tracker_join = {
            let tracker = Arc::clone(&self.tracker);
            let token = tracker_token.clone();
            thread::Builder::new()
                .name("fsl-tracker".to_string())
                .spawn(move || tracker.run(&token))
                .map_err(|e| FslError::Runtime {
                    details: format!("failed to spawn tracker thread: {e}"),
                })?
        };

        if self.config.daemon.initial_sync {
            self.sync_now("initial");
        }

        let service_join = {
            let service = Arc::clone(&self.service);
            let token = service_token.clone();
            thread::Builder::new()
                .name("fsl-service".to_string())
                .spawn(move || service.run(&token))
        };
        let service_join = match service_join {
            Ok(handle) => handle,
            Err(e) => {
                tracker_token.cancel();
                let _ = tracker_join.join();
                self.finish("worker service failed to start");
                return Err(FslError::Runtime {
                    details: format!("failed to spawn worker service thread: {e}"),
                });
            }
        };

        let poll = Duration::from_millis(self.config.daemon.signal_poll_ms.max(1));
        let reason = loop {
            if self.signal_handler.should_shutdown() {
                eprintln!("[FSL-DAEMON] shutdown requested");
                break "signal";
            }
            if self.signal_handler.should_sync() {
                self.sync_now("forced (SIGUSR1)");
            }
            if tracker_join.is_finished() {
                eprintln!("[FSL-DAEMON] chain tracker exited unexpectedly");
                break "chain tracker exited";
            }
            thread::sleep(poll);
        };

        service_token.cancel();
        match service_join.join() {
            Ok(Err(err)) => eprintln!("[FSL-DAEMON] worker service: {err}"),
            Err(_) => eprintln!("[FSL-DAEMON] worker service panicked"),
            Ok(Ok(())) => {}
        }
        tracker_token.cancel();
        match tracker_join.join() {
            Ok(Err(err)) => {
                eprintln!("[FSL-DAEMON] chain tracker: {err}");
                self.logger_handle.send(ActivityEvent::from_error(&err));
            }
            Err(_) => eprintln!("[FSL-DAEMON] chain tracker panicked"),
            Ok(Ok(())) => {}
        }

        self.finish(reason);
        Ok(())
    }

    fn sync_now(&self, why: &str) {
        match self.tracker.force_sync() {
            Ok(info) => eprintln!(
                "[FSL-DAEMON] {why} sync: local={} remote={}",
                info.local_length, info.remote_length
            ),
            Err(err) => {
                eprintln!("[FSL-DAEMON] {why} sync failed: {err}");
                self.logger_handle.send(ActivityEvent::from_error(&err));
            }
        }
    }

    fn finish(&mut self, reason: &str) {
        let uptime_secs = self.start_time.elapsed().as_secs();
        self.logger_handle.send(ActivityEvent::DaemonStopped {
            reason: reason.to_string(),
            uptime_secs,
        });
        self.logger_handle.shutdown();
        if let Some(join) = self.logger_join.take() {
            let _ = join.join();
        }
        eprintln!("[FSL-DAEMON] shutdown complete (uptime={uptime_secs}s)");
    }
}
