//! Deterministic, manually advanced work queue
//!
//! Time only moves when the owner calls [`ManualQueue::advance`] or
//! [`ManualQueue::advance_to`]. Timers fire in due order and the clock is
//! moved to each timer's due time before it runs, so callbacks observe the
//! instant they were scheduled for.

use super::{CancelToken, Job, RepeatingJob, WorkQueue};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Smallest repeat interval honoured, so a zero interval cannot spin forever
const MIN_REPEAT_INTERVAL: Duration = Duration::from_micros(1);

enum TimerKind {
    Once(Job),
    Every {
        interval: Duration,
        job: RepeatingJob,
    },
}

/// Entry in the timer heap
struct TimerEntry {
    /// When the entry is due
    due: Instant,
    /// How early the entry may fire to coalesce with other work
    leeway: Duration,
    /// Registration order, breaks ties between equal due times
    seq: u64,
    token: CancelToken,
    kind: TimerKind,
}

// Reverse ordering for min-heap (earliest due first, then FIFO)
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
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
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

struct ManualState {
    now: Instant,
    ready: VecDeque<Job>,
    timers: BinaryHeap<TimerEntry>,
    next_seq: u64,
    registered: usize,
}

impl ManualState {
    fn push_timer(&mut self, due: Instant, leeway: Duration, token: CancelToken, kind: TimerKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.timers.push(TimerEntry {
            due,
            leeway,
            seq,
            token,
            kind,
        });
    }

    /// Pop the next live timer due at or before `target`, re-arming
    /// repeating entries. Returns the job to run.
    fn take_due(&mut self, target: Instant) -> Option<Job> {
        loop {
            match self.timers.peek() {
                Some(entry) if entry.due <= target + entry.leeway => {}
                _ => return None,
            }
            let entry = self.timers.pop()?;
            if entry.token.is_cancelled() {
                continue;
            }
            if entry.due > self.now {
                self.now = entry.due.min(target.max(self.now));
            }
            return Some(match entry.kind {
                TimerKind::Once(job) => job,
                TimerKind::Every { interval, job } => {
                    let tick = job.clone();
                    self.push_timer(
                        entry.due + interval,
                        entry.leeway,
                        entry.token,
                        TimerKind::Every { interval, job },
                    );
                    Box::new(move || tick())
                }
            });
        }
    }
}

/// Work queue driven by an explicit virtual clock
pub struct ManualQueue {
    state: Mutex<ManualState>,
}

impl ManualQueue {
    /// Create a queue whose clock starts at the current instant
    pub fn new() -> Arc<Self> {
        Self::starting_at(Instant::now())
    }

    /// Create a queue whose clock starts at `start`
    pub fn starting_at(start: Instant) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ManualState {
                now: start,
                ready: VecDeque::new(),
                timers: BinaryHeap::new(),
                next_seq: 0,
                registered: 0,
            }),
        })
    }

    /// Run queued immediate jobs (including jobs they enqueue) until none
    /// are left. Returns how many ran. The clock does not move.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            let job = self.state.lock().ready.pop_front();
            match job {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Move the clock forward by `by`, firing everything that falls due
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.state.lock().now + by;
        self.advance_to(target)
    }

    /// Move the clock to `target`, firing timers in due order and draining
    /// immediate work between them. Returns how many jobs ran.
    pub fn advance_to(&self, target: Instant) -> usize {
        let mut ran = self.run_until_idle();
        loop {
            let job = self.state.lock().take_due(target);
            match job {
                Some(job) => {
                    job();
                    ran += 1 + self.run_until_idle();
                }
                None => break,
            }
        }
        {
            let mut state = self.state.lock();
            if target > state.now {
                state.now = target;
            }
        }
        ran + self.run_until_idle()
    }

    /// Number of timed registrations made so far (including cancelled ones)
    pub fn timers_registered(&self) -> usize {
        self.state.lock().registered
    }

    /// Number of timers that are still armed
    pub fn pending_timers(&self) -> usize {
        self.state
            .lock()
            .timers
            .iter()
            .filter(|entry| !entry.token.is_cancelled())
            .count()
    }

    /// Number of immediate jobs waiting to run
    pub fn pending_jobs(&self) -> usize {
        self.state.lock().ready.len()
    }

    /// Due time of the earliest armed timer
    pub fn next_due(&self) -> Option<Instant> {
        self.state
            .lock()
            .timers
            .iter()
            .filter(|entry| !entry.token.is_cancelled())
            .map(|entry| entry.due)
            .min()
    }
}

impl WorkQueue for ManualQueue {
    fn now(&self) -> Instant {
        self.state.lock().now
    }

    fn run_now(&self, job: Job) {
        self.state.lock().ready.push_back(job);
    }

    fn run_after(&self, delay: Duration, job: Job) -> CancelToken {
        let token = CancelToken::new();
        let mut state = self.state.lock();
        let due = state.now + delay;
        state.registered += 1;
        state.push_timer(due, Duration::ZERO, token.clone(), TimerKind::Once(job));
        token
    }

    fn run_repeating(
        &self,
        interval: Duration,
        tolerance: Duration,
        job: RepeatingJob,
    ) -> CancelToken {
        let token = CancelToken::new();
        let interval = interval.max(MIN_REPEAT_INTERVAL);
        let mut state = self.state.lock();
        let due = state.now + interval;
        state.registered += 1;
        state.push_timer(due, tolerance, token.clone(), TimerKind::Every { interval, job });
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Job) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let make = move |name: &'static str| -> Job {
            let sink = sink.clone();
            Box::new(move || sink.lock().push(name))
        };
        (log, make)
    }

    #[test]
    fn test_run_now_waits_for_drain() {
        let queue = ManualQueue::new();
        let (log, job) = recorder();

        queue.run_now(job("a"));
        queue.run_now(job("b"));
        assert!(log.lock().is_empty());
        assert_eq!(queue.pending_jobs(), 2);

        assert_eq!(queue.run_until_idle(), 2);
        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[test]
    fn test_timers_fire_in_due_order() {
        let queue = ManualQueue::new();
        let (log, job) = recorder();

        queue.run_after(Duration::from_millis(30), job("late"));
        queue.run_after(Duration::from_millis(10), job("early"));
        queue.run_after(Duration::from_millis(10), job("early-tie"));

        queue.advance(Duration::from_millis(5));
        assert!(log.lock().is_empty());

        queue.advance(Duration::from_millis(50));
        assert_eq!(*log.lock(), vec!["early", "early-tie", "late"]);
        assert_eq!(queue.timers_registered(), 3);
        assert_eq!(queue.pending_timers(), 0);
    }

    #[test]
    fn test_clock_moves_to_due_time_before_firing() {
        let start = Instant::now();
        let queue = ManualQueue::starting_at(start);
        let seen = Arc::new(Mutex::new(None));

        let q = queue.clone();
        let slot = seen.clone();
        queue.run_after(
            Duration::from_millis(20),
            Box::new(move || *slot.lock() = Some(q.now())),
        );

        queue.advance(Duration::from_millis(100));
        assert_eq!(*seen.lock(), Some(start + Duration::from_millis(20)));
        assert_eq!(queue.now(), start + Duration::from_millis(100));
    }

    #[test]
    fn test_cancelled_timer_never_runs() {
        let queue = ManualQueue::new();
        let (log, job) = recorder();

        let token = queue.run_after(Duration::from_millis(10), job("cancelled"));
        queue.run_after(Duration::from_millis(20), job("kept"));
        token.cancel();
        assert_eq!(queue.pending_timers(), 1);

        queue.advance(Duration::from_millis(50));
        assert_eq!(*log.lock(), vec!["kept"]);
    }

    #[test]
    fn test_repeating_timer_ticks_until_cancelled() {
        let queue = ManualQueue::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();

        let token = queue.run_repeating(
            Duration::from_millis(10),
            Duration::ZERO,
            Arc::new(move || {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
            }),
        );

        queue.advance(Duration::from_millis(35));
        assert_eq!(ticks.load(AtomicOrdering::SeqCst), 3);

        token.cancel();
        queue.advance(Duration::from_millis(100));
        assert_eq!(ticks.load(AtomicOrdering::SeqCst), 3);
        assert_eq!(queue.timers_registered(), 1);
    }

    #[test]
    fn test_repeating_timer_tolerance_coalesces_early_tick() {
        let queue = ManualQueue::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();

        queue.run_repeating(
            Duration::from_millis(10),
            Duration::from_millis(3),
            Arc::new(move || {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
            }),
        );

        // Due at 10ms, but within 3ms of the 8ms target
        queue.advance(Duration::from_millis(8));
        assert_eq!(ticks.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn test_jobs_scheduled_by_jobs_run_in_same_advance() {
        let queue = ManualQueue::new();
        let (log, job) = recorder();

        let q = queue.clone();
        let follow_up = job("follow-up");
        let nested = job("nested-timer");
        queue.run_after(
            Duration::from_millis(10),
            Box::new(move || {
                q.run_now(follow_up);
                q.run_after(Duration::from_millis(5), nested);
            }),
        );

        queue.advance(Duration::from_millis(20));
        assert_eq!(*log.lock(), vec!["follow-up", "nested-timer"]);
        assert_eq!(queue.next_due(), None);
    }
}
