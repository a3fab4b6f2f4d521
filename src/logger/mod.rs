//! Activity logging: JSONL append-only log fed by a dedicated logger thread,
//! plus a plain-text log per worker.

pub mod activity;
pub mod jsonl;
pub mod worker_log;

pub use activity::{ActivityEvent, ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger};
pub use worker_log::WorkerLog;
