#![forbid(unsafe_code)]

//! fsledger: a filesystem-integrity daemon.
//!
//! Each registered root path is fingerprinted periodically; every fingerprint
//! is committed as a block of an append-only, SHA-512 hash-chained ledger whose
//! authoritative copy lives on a remote server. The daemon keeps a local
//! file-per-block replica of that ledger in sync and extends it only through
//! the remote.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use fsledger::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use fsledger::ledger::{Chain, validate};
//! use fsledger::replica::{ChainStore, ChainTracker};
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod ledger;
pub mod logger;
pub mod remote;
pub mod replica;
pub mod scanner;
