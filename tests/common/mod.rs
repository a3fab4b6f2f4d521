#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use fsledger::daemon::cancel::CancelToken;
use fsledger::ledger::Chain;
use fsledger::logger::ActivityLoggerHandle;
use fsledger::remote::{MemoryLedger, RemoteChainReader};
use fsledger::replica::{ChainStore, ChainTracker};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_fsledger") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) {
        "fsledger.exe"
    } else {
        "fsledger"
    };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve fsledger binary path for integration test"),
    }
}

/// Run the binary with `home` as both `$HOME` and the fsledger home, so
/// nothing outside the scratch directory is read or written.
pub fn run_cli_case(case_name: &str, home: &Path, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("fsledger-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("HOME", home)
        .env("FSL_HOME", home)
        .env_remove("FSL_OUTPUT_FORMAT")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute fsledger command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// Genesis plus `len - 1` appended blocks with distinct payloads.
pub fn chain_of(len: u64) -> Chain {
    extend(Chain::new(), len, "block")
}

/// Append blocks tagged with `tag` until `chain` has `len` blocks.
pub fn extend(mut chain: Chain, len: u64, tag: &str) -> Chain {
    while chain.len() < len {
        let block = chain.append(format!("{tag}-{}", chain.len()).into_bytes());
        chain = chain.with_block(block).expect("append keeps the chain valid");
    }
    chain
}

/// Write the first `count` blocks of `chain` into `store`.
pub fn seed_store(store: &ChainStore, chain: &Chain, count: u64) {
    store.ensure_dir().expect("create chain dir");
    for block in chain.blocks().iter().take(count as usize) {
        store.write_block(block).expect("write block");
    }
}

pub fn tracker_for(dir: &Path, remote: &Arc<MemoryLedger>, period: Duration) -> Arc<ChainTracker> {
    let reader: Arc<dyn RemoteChainReader> = remote.clone();
    Arc::new(ChainTracker::new(
        ChainStore::new(dir),
        reader,
        period,
        ActivityLoggerHandle::disabled(),
    ))
}

/// Run `tracker` on a background thread until the returned token is cancelled.
pub fn spawn_tracker(tracker: &Arc<ChainTracker>) -> (CancelToken, thread::JoinHandle<()>) {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    let tracker = Arc::clone(tracker);
    let handle = thread::spawn(move || {
        tracker.run(&token).expect("tracker loop");
    });
    (cancel, handle)
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
