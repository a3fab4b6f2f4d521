//! Daemon subsystem: cancellation, task scheduling, workers, signal handling,
//! and the top-level lifecycle.

pub mod cancel;
#[cfg(feature = "daemon")]
pub mod loop_main;
pub mod scheduler;
#[cfg(feature = "daemon")]
pub mod signals;
pub mod worker;
pub mod worker_config;
pub mod worker_service;
