//! Chain tracker: keeps the on-disk replica in step with the remote ledger.
//!
//! Passes run on a fixed ticker and on demand. A force-sync caller hands the
//! tracker a one-shot completion channel and blocks on it; every caller
//! queued by the time a pass finishes receives that pass's outcome.
//!
//! ```text
//! Idle → Checking → InSync
//!                 → Synchronizing → InSync
//!                 → Desynced → Recovering → Checking
//! ```

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, bounded, select, tick, unbounded};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::core::errors::{FslError, Result};
use crate::daemon::cancel::CancelToken;
use crate::ledger::{Block, Chain, merge, validate, validate_segment};
use crate::logger::{ActivityEvent, ActivityLoggerHandle};
use crate::remote::RemoteChainReader;
use crate::replica::store::ChainStore;

/// Result of comparing the replica with the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncInfo {
    pub local_length: u64,
    pub remote_length: u64,
    pub needs_sync: bool,
}

impl SyncInfo {
    #[must_use]
    pub fn new(local_length: u64, remote_length: u64) -> Self {
        Self {
            local_length,
            remote_length,
            needs_sync: remote_length > local_length,
        }
    }
}

/// Where the tracker currently is in its pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerState {
    Idle,
    Checking,
    Synchronizing,
    InSync,
    Desynced,
    Recovering,
}

/// Completed pass, kept for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LastSync {
    pub at: DateTime<Utc>,
    pub info: SyncInfo,
}

type PassOutcome = std::result::Result<SyncInfo, String>;

/// Owner of the local replica directory.
pub struct ChainTracker {
    store: ChainStore,
    remote: Arc<dyn RemoteChainReader>,
    period: Duration,
    force_tx: Sender<Sender<PassOutcome>>,
    force_rx: Receiver<Sender<PassOutcome>>,
    halted: CancelToken,
    pass_lock: Mutex<()>,
    snapshot: RwLock<Option<Arc<Chain>>>,
    state: Mutex<TrackerState>,
    last_sync: Mutex<Option<LastSync>>,
    logger: ActivityLoggerHandle,
}

impl ChainTracker {
    pub fn new(
        store: ChainStore,
        remote: Arc<dyn RemoteChainReader>,
        period: Duration,
        logger: ActivityLoggerHandle,
    ) -> Self {
        let (force_tx, force_rx) = unbounded();
        Self {
            store,
            remote,
            period,
            force_tx,
            force_rx,
            halted: CancelToken::new(),
            pass_lock: Mutex::new(()),
            snapshot: RwLock::new(None),
            state: Mutex::new(TrackerState::Idle),
            last_sync: Mutex::new(None),
            logger,
        }
    }

    #[must_use]
    pub fn store(&self) -> &ChainStore {
        &self.store
    }

    #[must_use]
    pub fn state(&self) -> TrackerState {
        *self.state.lock()
    }

    #[must_use]
    pub fn last_sync(&self) -> Option<LastSync> {
        *self.last_sync.lock()
    }

    /// Last chain loaded by a successful pass. Replaced wholesale, never edited.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<Chain>> {
        self.snapshot.read().clone()
    }

    /// Highest local block, from the snapshot when one is loaded.
    pub fn local_head(&self) -> Result<Block> {
        if let Some(chain) = self.snapshot() {
            return Ok(chain.head().clone());
        }
        self.store.read_head()
    }

    /// Tracker loop. Returns when `cancel` fires; force-sync callers still
    /// waiting at that point are released with an error.
    pub fn run(&self, cancel: &CancelToken) -> Result<()> {
        let _halt = HaltOnDrop(&self.halted);
        self.store.ensure_dir()?;
        eprintln!(
            "[FSL-TRACKER] tracking {} every {}ms",
            self.store.dir().display(),
            self.period.as_millis()
        );

        let ticker = tick(self.period);
        loop {
            select! {
                recv(cancel.done()) -> _ => break,
                recv(ticker) -> _ => self.pass(Vec::new()),
                recv(self.force_rx) -> waiter => {
                    if let Ok(waiter) = waiter {
                        self.pass(vec![waiter]);
                    }
                }
            }
        }

        self.halted.cancel();
        for waiter in self.force_rx.try_iter() {
            let _ = waiter.send(Err("chain tracker stopped".to_string()));
        }
        eprintln!("[FSL-TRACKER] stopped");
        Ok(())
    }

    /// Ask the running loop for a pass and wait for its outcome.
    pub fn force_sync(&self) -> Result<SyncInfo> {
        if self.halted.is_cancelled() {
            return Err(FslError::SyncFailed {
                details: "chain tracker is not running".to_string(),
            });
        }
        let (done_tx, done_rx) = bounded(1);
        self.force_tx
            .send(done_tx)
            .map_err(|_| FslError::ChannelClosed {
                component: "chain tracker",
            })?;

        select! {
            recv(done_rx) -> outcome => match outcome {
                Ok(Ok(info)) => Ok(info),
                Ok(Err(details)) => Err(FslError::SyncFailed { details }),
                Err(_) => Err(FslError::SyncFailed {
                    details: "chain tracker dropped the request".to_string(),
                }),
            },
            recv(self.halted.done()) -> _ => Err(FslError::SyncFailed {
                details: "chain tracker stopped".to_string(),
            }),
        }
    }

    fn pass(&self, mut waiters: Vec<Sender<PassOutcome>>) {
        let outcome = self.check_and_sync();
        if let Err(err) = &outcome {
            eprintln!("[FSL-TRACKER] sync pass failed: {err}");
            self.logger.send(ActivityEvent::from_error(err));
        }

        waiters.extend(self.force_rx.try_iter());
        let shared: PassOutcome = outcome.map_err(|err| err.to_string());
        for waiter in waiters {
            let _ = waiter.send(shared.clone());
        }
    }

    /// One full pass: detect desync, rebuild if needed, pull missing blocks,
    /// refresh the snapshot.
    pub fn check_and_sync(&self) -> Result<SyncInfo> {
        let _pass = self.pass_lock.lock();
        let started = Instant::now();
        let result = self.sync_locked();
        match &result {
            Ok((info, pulled)) => {
                self.set_state(TrackerState::InSync);
                *self.last_sync.lock() = Some(LastSync {
                    at: Utc::now(),
                    info: *info,
                });
                if *pulled > 0 {
                    eprintln!(
                        "[FSL-TRACKER] pulled {pulled} block(s), local length now {}",
                        info.local_length
                    );
                }
                self.logger.send(ActivityEvent::SyncCompleted {
                    local_length: info.local_length,
                    remote_length: info.remote_length,
                    pulled: *pulled,
                    duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                });
            }
            Err(_) => self.set_state(TrackerState::Idle),
        }
        result.map(|(info, _)| info)
    }

    fn sync_locked(&self) -> Result<(SyncInfo, u64)> {
        match self.sync_pass() {
            Err(FslError::ChainDesync { details }) => {
                self.recover(&details)?;
                self.sync_pass()
            }
            other => other,
        }
    }

    fn sync_pass(&self) -> Result<(SyncInfo, u64)> {
        self.set_state(TrackerState::Checking);
        let info = self.sync_info()?;

        let mut pulled = 0;
        if info.needs_sync {
            self.set_state(TrackerState::Synchronizing);
            pulled = self.synchronize(&info)?;
        }
        // Local blocks below the head can only be checked by loading them.
        self.refresh_snapshot().map_err(|err| match err {
            FslError::InvalidChain { index, reason } => FslError::ChainDesync {
                details: format!("local block {index} is corrupt: {reason}"),
            },
            FslError::Serialization { details, .. } => FslError::ChainDesync {
                details: format!("unreadable local block: {details}"),
            },
            other => other,
        })?;
        Ok((SyncInfo::new(info.remote_length, info.remote_length), pulled))
    }

    /// Compare lengths and heads. Any disagreement is reported as desync.
    fn sync_info(&self) -> Result<SyncInfo> {
        let remote_length = self.remote.length()?;
        let local_length = self.store.contiguous_length()?;

        if local_length > remote_length {
            return Err(FslError::ChainDesync {
                details: format!(
                    "local length {local_length} exceeds remote length {remote_length}"
                ),
            });
        }

        if local_length > 0 {
            let head = self.store.read_head().map_err(|err| match err {
                FslError::Serialization { details, .. } => FslError::ChainDesync {
                    details: format!("unreadable local head: {details}"),
                },
                other => other,
            })?;
            if !head.has_valid_hash() {
                return Err(FslError::ChainDesync {
                    details: format!("local head {} does not match its hash", head.index),
                });
            }
            let remote_block = self.remote.block(head.index)?;
            if !same_contents(&head, &remote_block) {
                return Err(FslError::ChainDesync {
                    details: format!("local head {} differs from remote", head.index),
                });
            }
        }

        Ok(SyncInfo::new(local_length, remote_length))
    }

    fn recover(&self, details: &str) -> Result<()> {
        let chain_dir = self.store.dir().display().to_string();
        self.set_state(TrackerState::Desynced);
        eprintln!("[FSL-TRACKER] desync detected in {chain_dir}: {details}; rebuilding");
        self.logger.send(ActivityEvent::DesyncDetected {
            chain_dir: chain_dir.clone(),
            details: details.to_string(),
        });

        self.set_state(TrackerState::Recovering);
        *self.snapshot.write() = None;
        self.store.clear()?;
        self.logger.send(ActivityEvent::Resynced { chain_dir });
        Ok(())
    }

    /// Pull `[local_length, remote_length)` one block at a time, checking each
    /// against its predecessor before it touches disk.
    fn synchronize(&self, info: &SyncInfo) -> Result<u64> {
        let mut prev = if info.local_length > 0 {
            Some(self.store.read_head()?)
        } else {
            None
        };

        for index in info.local_length..info.remote_length {
            let block = self.remote.block(index)?;
            if block.index != index {
                return Err(FslError::InvalidChain {
                    index,
                    reason: format!("remote returned block {}", block.index),
                });
            }
            match &prev {
                Some(parent) => validate_segment(&[parent.clone(), block.clone()])?,
                None => validate(std::slice::from_ref(&block))?,
            }
            self.store.write_block(&block)?;
            prev = Some(block);
        }

        Ok(info.remote_length - info.local_length)
    }

    fn refresh_snapshot(&self) -> Result<()> {
        let Some(current) = self.snapshot() else {
            return match self.store.load_chain() {
                Ok(chain) => {
                    *self.snapshot.write() = Some(Arc::new(chain));
                    Ok(())
                }
                Err(FslError::MissingLocalHead { .. }) => Ok(()),
                Err(err) => Err(err),
            };
        };

        let local_length = self.store.contiguous_length()?;
        if local_length <= current.len() {
            return Ok(());
        }
        let mut candidate = (*current).clone();
        for index in current.len()..local_length {
            candidate = candidate.with_block(self.store.read_block(index)?)?;
        }
        let merged = merge(&current, &candidate)?;
        *self.snapshot.write() = Some(Arc::new(merged));
        Ok(())
    }

    fn set_state(&self, next: TrackerState) {
        *self.state.lock() = next;
    }
}

/// Block equality without the timestamp, which the digest does not cover.
fn same_contents(local: &Block, remote: &Block) -> bool {
    local.index == remote.index
        && local.block_hash == remote.block_hash
        && local.parent_hash == remote.parent_hash
        && local.payload == remote.payload
}

struct HaltOnDrop<'a>(&'a CancelToken);

impl Drop for HaltOnDrop<'_> {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{BlockUploader, MemoryLedger};

    fn ledger_with(len: u64) -> Arc<MemoryLedger> {
        let mut chain = Chain::new();
        while chain.len() < len {
            let staged = chain.append(format!("remote-{}", chain.len()).into_bytes());
            chain = chain.with_block(staged).unwrap();
        }
        Arc::new(MemoryLedger::from_chain(chain))
    }

    fn tracker_for(
        remote: &Arc<MemoryLedger>,
        dir: &std::path::Path,
    ) -> (ChainTracker, ChainStore) {
        let store = ChainStore::new(dir.join("chain"));
        let tracker = ChainTracker::new(
            store.clone(),
            Arc::clone(remote) as Arc<dyn RemoteChainReader>,
            Duration::from_secs(3600),
            ActivityLoggerHandle::disabled(),
        );
        (tracker, store)
    }

    #[test]
    fn empty_replica_pulls_everything() {
        let dir = tempfile::tempdir().unwrap();
        let remote = ledger_with(4);
        let (tracker, store) = tracker_for(&remote, dir.path());
        store.ensure_dir().unwrap();

        let info = tracker.check_and_sync().unwrap();
        assert_eq!(info, SyncInfo::new(4, 4));
        assert_eq!(store.load_chain().unwrap(), remote.chain());
        assert_eq!(tracker.state(), TrackerState::InSync);
        assert_eq!(tracker.snapshot().unwrap().len(), 4);
        assert!(tracker.last_sync().is_some());
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let remote = ledger_with(3);
        let (tracker, _store) = tracker_for(&remote, dir.path());
        tracker.check_and_sync().unwrap();
        let info = tracker.check_and_sync().unwrap();
        assert!(!info.needs_sync);
        assert_eq!(tracker.local_head().unwrap(), *remote.chain().head());
    }

    #[test]
    fn snapshot_follows_remote_growth() {
        let dir = tempfile::tempdir().unwrap();
        let remote = ledger_with(2);
        let (tracker, _store) = tracker_for(&remote, dir.path());
        tracker.check_and_sync().unwrap();
        let before = tracker.snapshot().unwrap();

        let staged = remote.chain().append(b"new".to_vec());
        remote.upload_block(&staged).unwrap();
        tracker.check_and_sync().unwrap();

        assert_eq!(before.len(), 2);
        assert_eq!(tracker.snapshot().unwrap().len(), 3);
        assert_eq!(tracker.local_head().unwrap(), staged);
    }

    #[test]
    fn local_longer_than_remote_rebuilds() {
        let dir = tempfile::tempdir().unwrap();
        let remote = ledger_with(5);
        let (tracker, store) = tracker_for(&remote, dir.path());
        tracker.check_and_sync().unwrap();

        remote.replace(ledger_with(2).chain());
        let info = tracker.check_and_sync().unwrap();
        assert_eq!(info.local_length, 2);
        assert_eq!(store.contiguous_length().unwrap(), 2);
    }

    #[test]
    fn failed_clear_still_drops_the_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let remote = ledger_with(3);
        let (tracker, store) = tracker_for(&remote, dir.path());
        tracker.check_and_sync().unwrap();
        assert!(tracker.snapshot().is_some());

        std::fs::remove_dir_all(store.dir()).unwrap();
        std::fs::write(store.dir(), b"not a directory").unwrap();
        assert!(tracker.recover("test").is_err());
        assert!(tracker.snapshot().is_none());
        assert!(tracker.local_head().is_err());
    }

    #[test]
    fn remote_outage_is_reported_and_state_returns_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let remote = ledger_with(2);
        let (tracker, _store) = tracker_for(&remote, dir.path());
        remote.set_offline(true);
        let err = tracker.check_and_sync().unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(tracker.state(), TrackerState::Idle);
    }

    #[test]
    fn force_sync_without_running_loop_fails_after_halt() {
        let dir = tempfile::tempdir().unwrap();
        let remote = ledger_with(1);
        let (tracker, _store) = tracker_for(&remote, dir.path());
        let cancel = CancelToken::new();
        cancel.cancel();
        tracker.run(&cancel).unwrap();
        assert!(matches!(
            tracker.force_sync(),
            Err(FslError::SyncFailed { .. })
        ));
    }
}
