//! Local replica of the authoritative ledger.
//!
//! [`store::ChainStore`] owns the on-disk layout; [`tracker::ChainTracker`]
//! keeps it in step with the remote and serves force-sync requests.

pub mod store;
pub mod tracker;

pub use store::ChainStore;
pub use tracker::{ChainTracker, SyncInfo, TrackerState};
