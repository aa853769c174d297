//! Timer thread for delayed and repeating jobs
//!
//! Registrations sit in a min-heap ordered by wake time. The thread waits
//! on a condvar until the earliest entry is due (or a new registration
//! arrives), then hands due jobs to the workers.

use crate::error::RuntimeError;
use crate::worker::{join_bounded, Shared};
use cadence_core::{CancelToken, Job, RepeatingJob};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Heap size below which cancelled entries are left to expire naturally
const PURGE_THRESHOLD: usize = 64;

/// Smallest repeat interval honoured
const MIN_REPEAT_INTERVAL: Duration = Duration::from_micros(100);

pub(crate) enum TimerKind {
    Once(Job),
    Every {
        interval: Duration,
        job: RepeatingJob,
    },
}

/// Entry in the timer heap
struct TimerEntry {
    /// When the entry is due
    wake_at: Instant,
    /// How early the entry may fire to share a pass with other due entries
    tolerance: Duration,
    /// Registration order, breaks ties
    seq: u64,
    token: CancelToken,
    kind: TimerKind,
}

// Reverse ordering for min-heap (earliest wake time first)
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .wake_at
            .cmp(&self.wake_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.wake_at == other.wake_at && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

/// Timer thread state
struct TimerState {
    entries: BinaryHeap<TimerEntry>,
    next_seq: u64,
    /// Heap size that triggers dropping cancelled entries
    purge_at: usize,
}

/// Timer thread feeding due jobs to the worker pool
pub(crate) struct TimerThread {
    state: Mutex<TimerState>,
    /// Wakes the timer thread on registration or shutdown
    notify: Condvar,
    shutdown: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerThread {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TimerState {
                entries: BinaryHeap::new(),
                next_seq: 0,
                purge_at: PURGE_THRESHOLD,
            }),
            notify: Condvar::new(),
            shutdown: AtomicBool::new(false),
            handle: Mutex::new(None),
        })
    }

    /// Start the timer thread
    pub(crate) fn start(
        self: &Arc<Self>,
        name: String,
        shared: Arc<Shared>,
    ) -> Result<(), RuntimeError> {
        let timer = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || timer.run_loop(&shared))?;

        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Stop the timer thread, waiting at most `timeout` for it to exit
    pub(crate) fn stop(&self, timeout: Duration) {
        {
            let _state = self.state.lock();
            self.shutdown.store(true, AtomicOrdering::Release);
            self.notify.notify_one();
        }

        if let Some(handle) = self.handle.lock().take() {
            if !join_bounded(handle, timeout) {
                tracing::warn!("timer thread did not stop in time, detaching");
            }
        }

        let mut state = self.state.lock();
        let dropped = state.entries.len();
        state.entries.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "timer registrations dropped at shutdown");
        }
    }

    /// Register a job due at `wake_at`
    pub(crate) fn register(
        &self,
        wake_at: Instant,
        tolerance: Duration,
        kind: TimerKind,
    ) -> CancelToken {
        let token = CancelToken::new();
        if self.shutdown.load(AtomicOrdering::Acquire) {
            tracing::warn!("timer registered after shutdown, dropping it");
            token.cancel();
            return token;
        }

        let kind = match kind {
            TimerKind::Every { interval, job } => TimerKind::Every {
                interval: interval.max(MIN_REPEAT_INTERVAL),
                job,
            },
            once => once,
        };

        let mut state = self.state.lock();
        if state.entries.len() >= state.purge_at {
            state.entries.retain(|entry| !entry.token.is_cancelled());
            state.purge_at = (state.entries.len() * 2).max(PURGE_THRESHOLD);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push(TimerEntry {
            wake_at,
            tolerance,
            seq,
            token: token.clone(),
            kind,
        });
        // The new entry may be due before the one being waited on
        self.notify.notify_one();
        token
    }

    /// Number of registrations that are still armed
    pub(crate) fn pending(&self) -> usize {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|entry| !entry.token.is_cancelled())
            .count()
    }

    /// Timer thread main loop
    fn run_loop(&self, shared: &Shared) {
        tracing::trace!("timer thread started");
        let mut state = self.state.lock();

        loop {
            // Checked under the lock: stop() flips the flag while holding
            // it, so the notification cannot slip in before the wait
            if self.shutdown.load(AtomicOrdering::Acquire) {
                break;
            }

            let now = Instant::now();
            while let Some(entry) = state.entries.peek() {
                if entry.token.is_cancelled() {
                    state.entries.pop();
                    continue;
                }
                if entry.wake_at > now + entry.tolerance {
                    break;
                }
                let Some(entry) = state.entries.pop() else {
                    break;
                };
                self.dispatch(&mut state, entry, now, shared);
            }

            match state.entries.peek().map(|entry| entry.wake_at) {
                Some(wake_at) if wake_at > now => {
                    self.notify.wait_until(&mut state, wake_at);
                }
                Some(_) => {}
                None => self.notify.wait(&mut state),
            }
        }

        tracing::trace!("timer thread shutting down");
    }

    /// Hand a due entry to the workers, re-arming it if it repeats
    fn dispatch(&self, state: &mut TimerState, entry: TimerEntry, now: Instant, shared: &Shared) {
        let token = entry.token;
        match entry.kind {
            TimerKind::Once(job) => {
                let guard = token.clone();
                shared.submit(Box::new(move || {
                    if !guard.is_cancelled() {
                        job();
                    }
                }));
            }
            TimerKind::Every { interval, job } => {
                let tick = Arc::clone(&job);
                let guard = token.clone();
                shared.submit(Box::new(move || {
                    if !guard.is_cancelled() {
                        tick();
                    }
                }));

                // Missed ticks are skipped rather than replayed
                let mut wake_at = entry.wake_at + interval;
                if wake_at <= now {
                    wake_at = now + interval;
                }
                let seq = state.next_seq;
                state.next_seq += 1;
                state.entries.push(TimerEntry {
                    wake_at,
                    tolerance: entry.tolerance,
                    seq,
                    token,
                    kind: TimerKind::Every { interval, job },
                });
            }
        }
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        if !self.shutdown.load(AtomicOrdering::Acquire) {
            self.stop(Duration::from_secs(2));
        }
    }
}
