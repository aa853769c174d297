//! Worker threads that execute queued jobs
//!
//! Workers pull jobs from one shared injector. An idle worker spins
//! briefly with exponential backoff, then parks on a condvar until new
//! work is submitted or the idle timeout elapses.

use crate::error::RuntimeError;
use cadence_core::{Job, TaskError};
use crossbeam::utils::Backoff;
use crossbeam_deque::{Injector, Steal};
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// State shared by every worker and the timer thread
pub(crate) struct Shared {
    injector: Injector<Job>,
    /// Number of parked workers
    sleeping: Mutex<usize>,
    wake: Condvar,
    shutdown: AtomicBool,
    executed: AtomicU64,
    panicked: AtomicU64,
}

impl Shared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            injector: Injector::new(),
            sleeping: Mutex::new(0),
            wake: Condvar::new(),
            shutdown: AtomicBool::new(false),
            executed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
        })
    }

    /// Queue a job for the workers. Returns `false` once shut down.
    pub(crate) fn submit(&self, job: Job) -> bool {
        if self.is_shutdown() {
            tracing::warn!("job submitted after shutdown, dropping it");
            return false;
        }
        self.injector.push(job);

        // Notify under the lock so a worker between its emptiness check
        // and its wait cannot miss the wakeup
        let sleeping = self.sleeping.lock();
        if *sleeping > 0 {
            self.wake.notify_one();
        }
        true
    }

    pub(crate) fn take(&self) -> Option<Job> {
        loop {
            match self.injector.steal() {
                Steal::Success(job) => return Some(job),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    pub(crate) fn begin_shutdown(&self) -> bool {
        let first = !self.shutdown.swap(true, Ordering::AcqRel);
        let _sleeping = self.sleeping.lock();
        self.wake.notify_all();
        first
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Drop jobs that never got to run. Returns how many.
    pub(crate) fn discard_pending(&self) -> usize {
        let mut dropped = 0;
        while self.take().is_some() {
            dropped += 1;
        }
        dropped
    }

    pub(crate) fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    pub(crate) fn panicked(&self) -> u64 {
        self.panicked.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.injector.len()
    }
}

/// Worker thread that executes jobs
pub(crate) struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn a worker thread
    pub(crate) fn spawn(
        id: usize,
        name: String,
        shared: Arc<Shared>,
        idle_timeout: Duration,
    ) -> Result<Self, RuntimeError> {
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || Worker::run_loop(id, &shared, idle_timeout))?;

        Ok(Self {
            id,
            handle: Some(handle),
        })
    }

    /// Wait for the thread to exit, up to `timeout`
    pub(crate) fn join(&mut self, timeout: Duration) {
        if let Some(handle) = self.handle.take() {
            if !join_bounded(handle, timeout) {
                tracing::warn!(worker = self.id, "worker did not stop in time, detaching");
            }
        }
    }

    /// Worker thread main loop
    fn run_loop(id: usize, shared: &Shared, idle_timeout: Duration) {
        tracing::trace!(worker = id, "worker started");
        let backoff = Backoff::new();

        loop {
            if shared.is_shutdown() {
                break;
            }

            if let Some(job) = shared.take() {
                backoff.reset();
                Self::execute(id, shared, job);
                continue;
            }

            if !backoff.is_completed() {
                backoff.snooze();
                continue;
            }

            let mut sleeping = shared.sleeping.lock();
            if shared.injector.is_empty() && !shared.is_shutdown() {
                *sleeping += 1;
                shared.wake.wait_for(&mut sleeping, idle_timeout);
                *sleeping -= 1;
            }
            drop(sleeping);
            backoff.reset();
        }

        tracing::trace!(worker = id, "worker shutting down");
    }

    fn execute(id: usize, shared: &Shared, job: Job) {
        match catch_unwind(AssertUnwindSafe(job)) {
            Ok(()) => {
                shared.executed.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                shared.panicked.fetch_add(1, Ordering::Relaxed);
                let err = TaskError::<String>::from_panic(payload);
                tracing::error!(worker = id, error = %err, "job panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.join(Duration::from_secs(2));
    }
}

/// Join a thread, giving up after `timeout`. Returns whether it exited.
///
/// A thread never waits for itself; that happens when the last handle to
/// a queue is dropped from inside one of its own jobs.
pub(crate) fn join_bounded(handle: JoinHandle<()>, timeout: Duration) -> bool {
    if handle.thread().id() == thread::current().id() {
        return false;
    }

    let start = Instant::now();
    loop {
        if handle.is_finished() {
            let _ = handle.join();
            return true;
        }
        if start.elapsed() > timeout {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
}
