//! Bounded-concurrency task runner with per-id deduplication.
//!
//! Tasks wait in a FIFO queue. The dispatch loop hands each one to its own
//! thread as soon as a permit is free, never running more than `ceiling`
//! bodies at once. An id stays reserved from `schedule` until its body
//! returns, so the same worker can never have two generations in flight.

#![allow(missing_docs)]

use std::collections::{HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use parking_lot::{Condvar, Mutex};

use crate::core::errors::{FslError, Result};
use crate::daemon::cancel::CancelToken;
use crate::logger::{ActivityEvent, ActivityLoggerHandle};

/// Deferred unit of work.
pub type Work = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// A unit of work keyed by a deduplication id.
pub struct Task {
    id: String,
    work: Work,
}

impl Task {
    pub fn new<F>(id: impl Into<String>, work: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self {
            id: id.into(),
            work: Box::new(work),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("id", &self.id).finish_non_exhaustive()
    }
}

#[derive(Default)]
struct State {
    queue: VecDeque<Task>,
    /// Ids that are queued or executing.
    reserved: HashSet<String>,
    running: usize,
}

/// FIFO scheduler with a fixed concurrency ceiling.
pub struct Scheduler {
    ceiling: usize,
    state: Mutex<State>,
    wake: Condvar,
    logger: ActivityLoggerHandle,
}

impl Scheduler {
    /// A ceiling of 0 is treated as 1.
    #[must_use]
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling: ceiling.max(1),
            state: Mutex::new(State::default()),
            wake: Condvar::new(),
            logger: ActivityLoggerHandle::disabled(),
        }
    }

    #[must_use]
    pub fn with_logger(mut self, logger: ActivityLoggerHandle) -> Self {
        self.logger = logger;
        self
    }

    #[must_use]
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    #[must_use]
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    #[must_use]
    pub fn running(&self) -> usize {
        self.state.lock().running
    }

    /// Enqueue `task`. Fails if a task with the same id is queued or running.
    pub fn schedule(&self, task: Task) -> Result<()> {
        let mut state = self.state.lock();
        if !state.reserved.insert(task.id.clone()) {
            return Err(FslError::TaskAlreadyScheduled { id: task.id });
        }
        state.queue.push_back(task);
        drop(state);
        self.wake.notify_one();
        Ok(())
    }

    /// Dispatch loop. On cancellation stops dequeuing, waits for running
    /// bodies to return, discards whatever is still queued, then returns.
    pub fn run(&self, cancel: &CancelToken) {
        eprintln!("[FSL-SCHED] dispatching with ceiling {}", self.ceiling);
        thread::scope(|scope| {
            scope.spawn(|| {
                let _ = cancel.done().recv();
                // Taking the lock orders this wakeup after any in-progress check.
                let _state = self.state.lock();
                self.wake.notify_all();
            });
            while let Some(task) = self.next_task(cancel) {
                let id = task.id.clone();
                let spawned = thread::Builder::new()
                    .name(format!("fsl-task-{id}"))
                    .spawn_scoped(scope, move || self.execute(task));
                if let Err(e) = spawned {
                    eprintln!("[FSL-SCHED] failed to spawn task {id}: {e}");
                    self.release(&id);
                }
            }
        });

        let mut state = self.state.lock();
        let discarded = state.queue.len();
        while let Some(task) = state.queue.pop_front() {
            state.reserved.remove(&task.id);
        }
        drop(state);
        if discarded > 0 {
            eprintln!("[FSL-SCHED] discarded {discarded} queued task(s) on shutdown");
        }
        eprintln!("[FSL-SCHED] stopped");
    }

    /// Block until a task may start, taking its permit. `None` once cancelled.
    fn next_task(&self, cancel: &CancelToken) -> Option<Task> {
        let mut state = self.state.lock();
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if state.running < self.ceiling {
                if let Some(task) = state.queue.pop_front() {
                    state.running += 1;
                    return Some(task);
                }
            }
            self.wake.wait(&mut state);
        }
    }

    fn execute(&self, task: Task) {
        let Task { id, work } = task;
        let _permit = Permit {
            scheduler: self,
            id: &id,
        };

        let failure = match panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some((err.code().to_string(), err.to_string())),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Some(("FSL-4900".to_string(), format!("task panicked: {message}")))
            }
        };

        if let Some((code, message)) = failure {
            eprintln!("[FSL-SCHED] task {id} failed: {message}");
            self.logger.send(ActivityEvent::TaskFailed {
                task_id: id.clone(),
                code,
                message,
            });
        }
    }

    fn release(&self, id: &str) {
        let mut state = self.state.lock();
        state.running = state.running.saturating_sub(1);
        state.reserved.remove(id);
        drop(state);
        self.wake.notify_all();
    }
}

/// Returns the permit and frees the id however the body exits.
struct Permit<'a> {
    scheduler: &'a Scheduler,
    id: &'a str,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.scheduler.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn spawn_run(scheduler: &Arc<Scheduler>) -> (CancelToken, thread::JoinHandle<()>) {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let sched = Arc::clone(scheduler);
        let handle = thread::spawn(move || sched.run(&token));
        (cancel, handle)
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn duplicate_queued_id_is_rejected() {
        let scheduler = Scheduler::new(1);
        scheduler.schedule(Task::new("w1", || Ok(()))).unwrap();
        match scheduler.schedule(Task::new("w1", || Ok(()))) {
            Err(FslError::TaskAlreadyScheduled { id }) => assert_eq!(id, "w1"),
            other => panic!("unexpected: {other:?}"),
        }
        scheduler.schedule(Task::new("w2", || Ok(()))).unwrap();
        assert_eq!(scheduler.queued(), 2);
    }

    #[test]
    fn running_id_is_rejected_until_done() {
        let scheduler = Arc::new(Scheduler::new(2));
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
        scheduler
            .schedule(Task::new("w1", move || {
                let _ = release_rx.recv();
                Ok(())
            }))
            .unwrap();

        let (cancel, handle) = spawn_run(&scheduler);
        assert!(wait_until(Duration::from_secs(2), || scheduler.running() == 1));
        assert!(scheduler.schedule(Task::new("w1", || Ok(()))).is_err());

        release_tx.send(()).unwrap();
        assert!(wait_until(Duration::from_secs(2), || scheduler.running() == 0));
        assert!(scheduler.schedule(Task::new("w1", || Ok(()))).is_ok());

        cancel.cancel();
        handle.join().unwrap();
    }

    #[test]
    fn never_exceeds_ceiling() {
        let scheduler = Arc::new(Scheduler::new(2));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for i in 0..8 {
            let (active, peak, done) = (active.clone(), peak.clone(), done.clone());
            scheduler
                .schedule(Task::new(format!("t{i}"), move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    active.fetch_sub(1, Ordering::SeqCst);
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }))
                .unwrap();
        }

        let (cancel, handle) = spawn_run(&scheduler);
        assert!(wait_until(Duration::from_secs(5), || {
            done.load(Ordering::SeqCst) == 8
        }));
        cancel.cancel();
        handle.join().unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failing_and_panicking_tasks_do_not_stop_dispatch() {
        let scheduler = Arc::new(Scheduler::new(1));
        let ran = Arc::new(AtomicUsize::new(0));
        scheduler
            .schedule(Task::new("err", || {
                Err(FslError::Runtime {
                    details: "boom".to_string(),
                })
            }))
            .unwrap();
        scheduler
            .schedule(Task::new("panic", || panic!("kaboom")))
            .unwrap();
        let counter = ran.clone();
        scheduler
            .schedule(Task::new("ok", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();

        let (cancel, handle) = spawn_run(&scheduler);
        assert!(wait_until(Duration::from_secs(2), || {
            ran.load(Ordering::SeqCst) == 1
        }));
        cancel.cancel();
        handle.join().unwrap();
        assert!(scheduler.schedule(Task::new("panic", || Ok(()))).is_ok());
    }

    #[test]
    fn cancellation_drains_running_tasks() {
        let scheduler = Arc::new(Scheduler::new(2));
        let finished = Arc::new(AtomicUsize::new(0));
        for i in 0..2 {
            let finished = finished.clone();
            scheduler
                .schedule(Task::new(format!("slow{i}"), move || {
                    thread::sleep(Duration::from_millis(100));
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }))
                .unwrap();
        }

        let (cancel, handle) = spawn_run(&scheduler);
        assert!(wait_until(Duration::from_secs(2), || scheduler.running() == 2));
        cancel.cancel();
        handle.join().unwrap();

        assert_eq!(finished.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.running(), 0);
    }

    #[test]
    fn cancel_wakes_an_idle_dispatcher() {
        let scheduler = Arc::new(Scheduler::new(1));
        let (cancel, handle) = spawn_run(&scheduler);
        thread::sleep(Duration::from_millis(30));
        assert!(!handle.is_finished());

        cancel.cancel();
        assert!(wait_until(Duration::from_secs(2), || handle.is_finished()));
        handle.join().unwrap();
    }

    #[test]
    fn zero_ceiling_is_clamped() {
        assert_eq!(Scheduler::new(0).ceiling(), 1);
    }
}
