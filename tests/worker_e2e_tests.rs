//! Worker pipeline end to end: real scheduler, tracker, generator, and an
//! in-process remote ledger.

mod common;

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fsledger::core::errors::FslError;
use fsledger::daemon::cancel::CancelToken;
use fsledger::daemon::scheduler::Scheduler;
use fsledger::daemon::worker::WorkerDeps;
use fsledger::daemon::worker_config::{JsonWorkerConfigStore, WorkerConfigStore};
use fsledger::daemon::worker_service::WorkerService;
use fsledger::ledger::{Block, validate};
use fsledger::logger::{ActivityLoggerHandle, WorkerLog};
use fsledger::remote::MemoryLedger;
use fsledger::replica::ChainTracker;
use fsledger::scanner::{Blockmap, BlockmapGenerator};

const TRACKER_PERIOD: Duration = Duration::from_secs(3600);

struct Harness {
    home: tempfile::TempDir,
    remote: Arc<MemoryLedger>,
    tracker: Arc<ChainTracker>,
    tracker_cancel: CancelToken,
    tracker_join: Option<thread::JoinHandle<()>>,
    service: Arc<WorkerService>,
}

impl Harness {
    fn new() -> Self {
        let home = tempfile::tempdir().unwrap();
        let remote = Arc::new(MemoryLedger::new());
        let tracker = common::tracker_for(&home.path().join("chain"), &remote, TRACKER_PERIOD);
        let (tracker_cancel, tracker_join) = common::spawn_tracker(&tracker);
        let deps = WorkerDeps {
            scheduler: Arc::new(Scheduler::new(3)),
            sync: tracker.clone(),
            uploader: remote.clone(),
            producer: Arc::new(BlockmapGenerator::default()),
            logger: ActivityLoggerHandle::disabled(),
            worker_log: WorkerLog::new(home.path().join("logs")),
        };
        let store = Arc::new(JsonWorkerConfigStore::new(home.path().join("workers.json")));
        let service = Arc::new(WorkerService::new(deps, store).unwrap());
        Self {
            home,
            remote,
            tracker,
            tracker_cancel,
            tracker_join: Some(tracker_join),
            service,
        }
    }

    fn start_service(&self) -> (CancelToken, thread::JoinHandle<()>) {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let service = Arc::clone(&self.service);
        let handle = thread::spawn(move || service.run(&token).unwrap());
        assert!(common::wait_until(Duration::from_secs(5), || self.service.is_running()));
        (cancel, handle)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.tracker_cancel.cancel();
        if let Some(join) = self.tracker_join.take() {
            let _ = join.join();
        }
    }
}

#[test]
fn empty_root_produces_one_block_per_period() {
    let harness = Harness::new();
    let root = tempfile::tempdir().unwrap();
    let genesis = harness.remote.chain().head().clone();

    let (cancel, handle) = harness.start_service();
    let record = harness
        .service
        .add_worker(root.path().to_path_buf(), 100, Vec::new())
        .unwrap();

    assert!(common::wait_until(Duration::from_secs(5), || {
        harness.remote.uploads() >= 1
    }));
    thread::sleep(Duration::from_millis(40));
    assert_eq!(harness.remote.uploads(), 1);

    let uploaded: Block = harness.remote.chain().blocks()[1].clone();
    assert_eq!(uploaded.index, genesis.index + 1);
    assert_eq!(uploaded.parent_hash, genesis.block_hash);
    let manifest = Blockmap::from_payload(&uploaded.payload).unwrap();
    assert!(manifest.entries.is_empty());

    assert!(common::wait_until(Duration::from_secs(5), || {
        harness.remote.uploads() >= 3
    }));
    cancel.cancel();
    handle.join().unwrap();

    let chain = harness.remote.chain();
    assert!(validate(chain.blocks()).is_ok());
    assert_eq!(chain.len(), harness.remote.uploads() + 1);

    let worker_log = harness
        .home
        .path()
        .join("logs")
        .join(format!("{}.log", record.id));
    let text = fs::read_to_string(worker_log).unwrap();
    assert!(text.lines().next().unwrap().contains("starting worker"));
    assert_eq!(
        text.lines().filter(|l| l.contains("uploaded block")).count() as u64,
        harness.remote.uploads()
    );
}

#[test]
fn manifests_track_file_changes() {
    let harness = Harness::new();
    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("a.txt"), b"first").unwrap();
    fs::create_dir(root.path().join("skip")).unwrap();
    fs::write(root.path().join("skip/noise"), b"n").unwrap();

    let (cancel, handle) = harness.start_service();
    harness
        .service
        .add_worker(root.path().to_path_buf(), 50, vec!["skip".into()])
        .unwrap();
    assert!(common::wait_until(Duration::from_secs(5), || {
        harness.remote.uploads() >= 1
    }));

    fs::write(root.path().join("a.txt"), b"second").unwrap();
    let before = harness.remote.uploads();
    assert!(common::wait_until(Duration::from_secs(5), || {
        harness.remote.uploads() >= before + 2
    }));
    cancel.cancel();
    handle.join().unwrap();

    let chain = harness.remote.chain();
    let first = Blockmap::from_payload(&chain.blocks()[1].payload).unwrap();
    let last = Blockmap::from_payload(&chain.head().payload).unwrap();
    assert_eq!(first.entries.keys().collect::<Vec<_>>(), vec!["a.txt"]);
    assert_eq!(first.changed_paths(&last), vec!["a.txt".to_string()]);
}

#[test]
fn several_workers_share_one_chain() {
    let harness = Harness::new();
    let roots: Vec<_> = (0..3).map(|_| tempfile::tempdir().unwrap()).collect();
    let (cancel, handle) = harness.start_service();
    for root in &roots {
        harness
            .service
            .add_worker(root.path().to_path_buf(), 50, Vec::new())
            .unwrap();
    }

    // Workers racing for the same head lose to the remote and retry next period.
    assert!(common::wait_until(Duration::from_secs(10), || {
        harness.remote.uploads() >= 6
    }));
    cancel.cancel();
    handle.join().unwrap();

    let chain = harness.remote.chain();
    assert!(validate(chain.blocks()).is_ok());
    assert!(chain.len() >= 2);
}

#[test]
fn service_persists_and_reloads_workers() {
    let harness = Harness::new();
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();

    let first = harness
        .service
        .add_worker(a.path().to_path_buf(), 1_000, Vec::new())
        .unwrap();
    let second = harness
        .service
        .add_worker(b.path().to_path_buf(), 2_000, vec!["cache".into()])
        .unwrap();
    assert_ne!(first.id, second.id);

    let store = JsonWorkerConfigStore::new(harness.home.path().join("workers.json"));
    assert_eq!(store.read_config().unwrap().workers, vec![first.clone(), second.clone()]);

    assert_eq!(harness.service.delete_worker_by_index(0).unwrap(), first);
    assert_eq!(harness.service.get_worker_by_index(0).unwrap(), second);
    assert!(matches!(
        harness.service.get_worker_by_index(1),
        Err(FslError::IndexOutOfBounds { index: 1, len: 1 })
    ));
    assert_eq!(store.read_config().unwrap().workers, vec![second]);
}

#[test]
fn removing_a_running_worker_stops_its_uploads() {
    let harness = Harness::new();
    let root = tempfile::tempdir().unwrap();
    let (cancel, handle) = harness.start_service();
    harness
        .service
        .add_worker(root.path().to_path_buf(), 30, Vec::new())
        .unwrap();
    assert!(common::wait_until(Duration::from_secs(5), || {
        harness.remote.uploads() >= 1
    }));

    harness.service.delete_worker_by_index(0).unwrap();
    // A generation already handed to the scheduler may still land.
    thread::sleep(Duration::from_millis(100));
    let settled = harness.remote.uploads();
    thread::sleep(Duration::from_millis(150));
    assert_eq!(harness.remote.uploads(), settled);

    cancel.cancel();
    handle.join().unwrap();
}

#[test]
fn missing_root_does_not_take_down_the_service() {
    let harness = Harness::new();
    let good = tempfile::tempdir().unwrap();
    let (cancel, handle) = harness.start_service();
    harness
        .service
        .add_worker(good.path().join("not-there"), 50, Vec::new())
        .unwrap();
    harness
        .service
        .add_worker(good.path().to_path_buf(), 50, Vec::new())
        .unwrap();

    assert!(common::wait_until(Duration::from_secs(5), || {
        harness.remote.uploads() >= 1
    }));
    assert!(harness.service.is_running());
    cancel.cancel();
    handle.join().unwrap();
}

#[test]
fn generation_fails_closed_when_the_tracker_is_down() {
    let harness = Harness::new();
    harness.tracker_cancel.cancel();
    assert!(common::wait_until(Duration::from_secs(5), || {
        harness.tracker.force_sync().is_err()
    }));

    let root = tempfile::tempdir().unwrap();
    let (cancel, handle) = harness.start_service();
    harness
        .service
        .add_worker(root.path().to_path_buf(), 20, Vec::new())
        .unwrap();
    thread::sleep(Duration::from_millis(200));
    assert_eq!(harness.remote.uploads(), 0);

    cancel.cancel();
    handle.join().unwrap();
}
