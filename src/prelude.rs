//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use fsledger::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{ErrorClass, FslError, Result};

// Ledger
pub use crate::ledger::{Block, Chain, gci, merge, validate, validate_segment};

// Remote
pub use crate::remote::{BlockUploader, MemoryLedger, RemoteChainReader, RemoteLedger};

// Replica
pub use crate::replica::{ChainStore, ChainTracker, SyncInfo};

// Daemon
pub use crate::daemon::cancel::CancelToken;
pub use crate::daemon::scheduler::{Scheduler, Task};
pub use crate::daemon::worker::{SyncBarrier, TaskScheduler, Worker, WorkerDeps, WorkerRecord};
pub use crate::daemon::worker_config::{JsonWorkerConfigStore, WorkerConfig, WorkerConfigStore};
pub use crate::daemon::worker_service::WorkerService;

// Scanner
pub use crate::scanner::{Blockmap, BlockmapGenerator, FingerprintProducer};
