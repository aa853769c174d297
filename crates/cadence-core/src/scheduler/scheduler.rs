//! Multi-task timer scheduler

use super::task::{ScheduledTask, SchedulerStats};
use crate::queue::WorkQueue;
use crate::timer::{DelayedAction, ScheduleRequest};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Default debounce window for timer resets
pub const DEFAULT_ACCURACY: Duration = Duration::from_millis(10);

struct SchedulerState<U> {
    /// Pending tasks, ascending by fire date, FIFO among equal dates
    tasks: Vec<ScheduledTask<U>>,
    /// Fire date the backing timer is registered for
    scheduled: Option<Instant>,
    accuracy: Duration,
    stats: SchedulerStats,
}

struct SchedulerInner<U> {
    queue: Arc<dyn WorkQueue>,
    state: Mutex<SchedulerState<U>>,
    timer: DelayedAction,
}

impl<U: Send + 'static> SchedulerInner<U> {
    /// Bring the backing timer in line with the earliest pending task.
    ///
    /// The timer is only re-registered when none is pending or when the
    /// earliest task is due at least `accuracy` before the registered date.
    fn reconcile(&self, state: &mut SchedulerState<U>) {
        let earliest = match state.tasks.first() {
            Some(task) => task.fire_date(),
            None => {
                if state.scheduled.take().is_some() {
                    self.timer.cancel();
                }
                return;
            }
        };

        let reset = match state.scheduled {
            None => true,
            Some(current) => earliest < current && current - earliest >= state.accuracy,
        };
        if reset {
            let effective = self.timer.schedule(ScheduleRequest::at(earliest));
            state.scheduled = Some(effective);
            state.stats.timer_resets += 1;
            tracing::trace!(pending = state.tasks.len(), "scheduler timer reset");
        }
    }

    /// Backing timer callback
    fn fire(&self) {
        let due = {
            let mut state = self.state.lock();
            let now = self.queue.now();
            let scheduled = state.scheduled.take().unwrap_or(now);
            let max_date = scheduled.max(now + state.accuracy);
            let split = state.tasks.partition_point(|task| task.fire_date() <= max_date);
            let due: Vec<_> = state.tasks.drain(..split).collect();
            state.stats.fired += due.len() as u64;
            due
        };

        tracing::debug!(count = due.len(), "scheduler firing due tasks");
        for task in due {
            task.run();
        }

        let mut state = self.state.lock();
        self.reconcile(&mut state);
    }

    /// Split pending tasks into (matching, rest), preserving order
    fn extract<P>(state: &mut SchedulerState<U>, mut predicate: P) -> Vec<ScheduledTask<U>>
    where
        P: FnMut(&ScheduledTask<U>) -> bool,
    {
        let (matching, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut state.tasks)
            .into_iter()
            .partition(|task| predicate(task));
        state.tasks = rest;
        matching
    }
}

/// Timer scheduler for many callbacks sharing one underlying timer
///
/// Tasks fire in non-decreasing fire-date order; tasks with equal fire
/// dates fire in insertion order. Callbacks run on the work queue with the
/// scheduler lock released and may call back into the scheduler.
pub struct Scheduler<U = ()> {
    inner: Arc<SchedulerInner<U>>,
}

impl<U: Send + 'static> Scheduler<U> {
    /// Create a scheduler with [`DEFAULT_ACCURACY`]
    pub fn new(queue: Arc<dyn WorkQueue>) -> Self {
        Self::with_accuracy(queue, DEFAULT_ACCURACY)
    }

    /// Create a scheduler that debounces timer resets within `accuracy`
    pub fn with_accuracy(queue: Arc<dyn WorkQueue>, accuracy: Duration) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<SchedulerInner<U>>| {
            let weak = weak.clone();
            let timer = DelayedAction::new(queue.clone(), move || {
                if let Some(inner) = weak.upgrade() {
                    inner.fire();
                }
            });
            SchedulerInner {
                queue,
                state: Mutex::new(SchedulerState {
                    tasks: Vec::new(),
                    scheduled: None,
                    accuracy,
                    stats: SchedulerStats::default(),
                }),
                timer,
            }
        });
        Self { inner }
    }

    /// Add a task
    pub fn add(&self, task: ScheduledTask<U>) {
        let mut state = self.inner.state.lock();
        let fire_date = task.fire_date();
        let index = state.tasks.partition_point(|t| t.fire_date() <= fire_date);
        state.tasks.insert(index, task);
        state.stats.added += 1;
        self.inner.reconcile(&mut state);
    }

    /// Add a task running `callback(user_data)` at `fire_date`
    pub fn add_at<F>(&self, fire_date: Instant, user_data: U, callback: F)
    where
        F: FnOnce(U) + Send + 'static,
    {
        self.add(ScheduledTask::new(fire_date, user_data, callback));
    }

    /// Add a task running `callback(user_data)` once `delay` has elapsed
    pub fn add_after<F>(&self, delay: Duration, user_data: U, callback: F)
    where
        F: FnOnce(U) + Send + 'static,
    {
        let fire_date = self.inner.queue.now() + delay;
        self.add_at(fire_date, user_data, callback);
    }

    /// Drop every pending task matching `predicate`. Returns how many.
    pub fn remove<P>(&self, predicate: P) -> usize
    where
        P: FnMut(&ScheduledTask<U>) -> bool,
    {
        let removed = {
            let mut state = self.inner.state.lock();
            let removed = SchedulerInner::extract(&mut state, predicate);
            state.stats.removed += removed.len() as u64;
            self.inner.reconcile(&mut state);
            removed
        };
        removed.len()
    }

    /// Run every pending task matching `predicate` right now, on the
    /// calling thread, regardless of fire date. Returns how many ran.
    pub fn execute_tasks<P>(&self, predicate: P) -> usize
    where
        P: FnMut(&ScheduledTask<U>) -> bool,
    {
        let matching = {
            let mut state = self.inner.state.lock();
            let matching = SchedulerInner::extract(&mut state, predicate);
            state.stats.executed += matching.len() as u64;
            matching
        };

        let count = matching.len();
        for task in matching {
            task.run();
        }

        let mut state = self.inner.state.lock();
        self.inner.reconcile(&mut state);
        count
    }

    /// Drop all pending tasks and cancel the timer
    pub fn clear(&self) {
        let dropped = {
            let mut state = self.inner.state.lock();
            let dropped = std::mem::take(&mut state.tasks);
            state.stats.removed += dropped.len() as u64;
            self.inner.reconcile(&mut state);
            dropped
        };
        drop(dropped);
    }

    /// Cancel the timer, keeping pending tasks.
    ///
    /// The next [`add`](Self::add) re-arms the timer for the earliest task.
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock();
        state.scheduled = None;
        self.inner.timer.cancel();
    }

    /// Number of pending tasks
    pub fn len(&self) -> usize {
        self.inner.state.lock().tasks.len()
    }

    /// Check whether no tasks are pending
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().tasks.is_empty()
    }

    /// Fire date of the earliest pending task
    pub fn next_fire_date(&self) -> Option<Instant> {
        self.inner.state.lock().tasks.first().map(|task| task.fire_date())
    }

    /// Fire date the backing timer is registered for
    pub fn scheduled_fire_date(&self) -> Option<Instant> {
        self.inner.state.lock().scheduled
    }

    /// Debounce window
    pub fn accuracy(&self) -> Duration {
        self.inner.state.lock().accuracy
    }

    /// Snapshot of the scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        self.inner.state.lock().stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ManualQueue;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    type Log = Arc<Mutex<Vec<(u32, Instant)>>>;

    fn setup(accuracy: Duration) -> (Arc<ManualQueue>, Scheduler<u32>, Log) {
        let queue = ManualQueue::new();
        let scheduler = Scheduler::with_accuracy(queue.clone(), accuracy);
        (queue, scheduler, Arc::new(Mutex::new(Vec::new())))
    }

    fn add(scheduler: &Scheduler<u32>, queue: &Arc<ManualQueue>, log: &Log, id: u32, delay_ms: u64) {
        let sink = log.clone();
        let q = queue.clone();
        scheduler.add_after(Duration::from_millis(delay_ms), id, move |id| {
            sink.lock().push((id, q.now()));
        });
    }

    fn fired_ids(log: &Log) -> Vec<u32> {
        log.lock().iter().map(|(id, _)| *id).collect()
    }

    #[test]
    fn test_scheduler_creation() {
        let queue = ManualQueue::new();
        let scheduler: Scheduler = Scheduler::new(queue.clone());

        assert!(scheduler.is_empty());
        assert_eq!(scheduler.len(), 0);
        assert_eq!(scheduler.accuracy(), DEFAULT_ACCURACY);
        assert_eq!(scheduler.next_fire_date(), None);
        assert_eq!(scheduler.stats(), SchedulerStats::default());
        assert_eq!(queue.pending_timers(), 0);
    }

    #[test]
    fn test_tasks_fire_in_fire_date_order() {
        let (queue, scheduler, log) = setup(Duration::ZERO);

        add(&scheduler, &queue, &log, 3, 30);
        add(&scheduler, &queue, &log, 1, 10);
        add(&scheduler, &queue, &log, 2, 20);
        assert_eq!(scheduler.len(), 3);

        queue.advance(Duration::from_millis(100));
        assert_eq!(fired_ids(&log), vec![1, 2, 3]);
        assert!(scheduler.is_empty());
        assert_eq!(queue.pending_timers(), 0);
        assert_eq!(scheduler.stats().fired, 3);
    }

    #[test]
    fn test_equal_fire_dates_keep_insertion_order() {
        let (queue, scheduler, log) = setup(Duration::ZERO);

        for id in 0..5 {
            add(&scheduler, &queue, &log, id, 10);
        }
        queue.advance(Duration::from_millis(10));
        assert_eq!(fired_ids(&log), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_tasks_fire_at_their_dates() {
        let (queue, scheduler, log) = setup(Duration::ZERO);
        let start = queue.now();

        add(&scheduler, &queue, &log, 1, 10);
        add(&scheduler, &queue, &log, 2, 25);
        queue.advance(Duration::from_millis(100));

        let log = log.lock();
        assert_eq!(log[0], (1, start + Duration::from_millis(10)));
        assert_eq!(log[1], (2, start + Duration::from_millis(25)));
    }

    #[test]
    fn test_removed_tasks_never_fire() {
        let (queue, scheduler, log) = setup(Duration::ZERO);

        add(&scheduler, &queue, &log, 1, 10);
        add(&scheduler, &queue, &log, 2, 20);
        add(&scheduler, &queue, &log, 3, 30);

        assert_eq!(scheduler.remove(|task| *task.user_data() == 2), 1);
        assert_eq!(scheduler.remove(|task| *task.user_data() == 42), 0);
        assert_eq!(scheduler.len(), 2);

        queue.advance(Duration::from_millis(100));
        assert_eq!(fired_ids(&log), vec![1, 3]);
        assert_eq!(scheduler.stats().removed, 1);
    }

    #[test]
    fn test_removing_last_task_cancels_timer() {
        let (queue, scheduler, log) = setup(Duration::ZERO);

        add(&scheduler, &queue, &log, 1, 10);
        assert_eq!(queue.pending_timers(), 1);

        scheduler.remove(|_| true);
        assert_eq!(queue.pending_timers(), 0);
        assert_eq!(scheduler.scheduled_fire_date(), None);
    }

    #[test]
    fn test_debounce_skips_near_resets() {
        let (queue, scheduler, log) = setup(Duration::from_millis(10));

        add(&scheduler, &queue, &log, 1, 100);
        // Within accuracy of the registered date: no reset
        add(&scheduler, &queue, &log, 2, 95);
        add(&scheduler, &queue, &log, 3, 91);
        // Later than the registered date: no reset
        add(&scheduler, &queue, &log, 4, 200);
        assert_eq!(scheduler.stats().timer_resets, 1);

        // Far enough ahead: reset
        add(&scheduler, &queue, &log, 5, 50);
        assert_eq!(scheduler.stats().timer_resets, 2);
        assert_eq!(queue.timers_registered(), 2);

        queue.advance(Duration::from_millis(300));
        assert_eq!(fired_ids(&log), vec![5, 3, 2, 1, 4]);
    }

    #[test]
    fn test_tasks_within_accuracy_fire_together() {
        let (queue, scheduler, log) = setup(Duration::from_millis(10));
        let start = queue.now();

        add(&scheduler, &queue, &log, 1, 50);
        add(&scheduler, &queue, &log, 2, 55);
        add(&scheduler, &queue, &log, 3, 70);

        queue.advance(Duration::from_millis(50));
        {
            let log = log.lock();
            assert_eq!(log.len(), 2);
            assert!(log.iter().all(|(_, at)| *at == start + Duration::from_millis(50)));
        }

        queue.advance(Duration::from_millis(50));
        assert_eq!(fired_ids(&log), vec![1, 2, 3]);
    }

    #[test]
    fn test_execute_tasks_runs_immediately() {
        let (queue, scheduler, log) = setup(Duration::ZERO);

        add(&scheduler, &queue, &log, 1, 10);
        add(&scheduler, &queue, &log, 2, 1000);
        add(&scheduler, &queue, &log, 3, 20);

        let ran = scheduler.execute_tasks(|task| *task.user_data() >= 2);
        assert_eq!(ran, 2);
        // Ascending fire-date order among the extracted tasks
        assert_eq!(fired_ids(&log), vec![3, 2]);
        assert_eq!(scheduler.len(), 1);

        queue.advance(Duration::from_millis(2000));
        assert_eq!(fired_ids(&log), vec![3, 2, 1]);
        assert_eq!(scheduler.stats().executed, 2);
    }

    #[test]
    fn test_past_fire_date_fires_on_next_turn() {
        let (queue, scheduler, log) = setup(Duration::ZERO);
        queue.advance(Duration::from_secs(1));

        let sink = log.clone();
        let q = queue.clone();
        scheduler.add_at(queue.now() - Duration::from_millis(500), 7, move |id| {
            sink.lock().push((id, q.now()));
        });

        queue.advance(Duration::ZERO);
        assert_eq!(fired_ids(&log), vec![7]);
    }

    #[test]
    fn test_callback_can_add_tasks() {
        let queue = ManualQueue::new();
        let scheduler: Arc<Scheduler<u32>> = Arc::new(Scheduler::with_accuracy(queue.clone(), Duration::ZERO));
        let log: Log = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::downgrade(&scheduler);
        let sink = log.clone();
        let q = queue.clone();
        scheduler.add_after(Duration::from_millis(10), 1, move |id| {
            sink.lock().push((id, q.now()));
            if let Some(scheduler) = s.upgrade() {
                let sink = sink.clone();
                let q = q.clone();
                scheduler.add_after(Duration::from_millis(10), 2, move |id| {
                    sink.lock().push((id, q.now()));
                });
            }
        });

        queue.advance(Duration::from_millis(100));
        assert_eq!(fired_ids(&log), vec![1, 2]);
    }

    #[test]
    fn test_clear_drops_everything() {
        let (queue, scheduler, log) = setup(Duration::ZERO);

        add(&scheduler, &queue, &log, 1, 10);
        add(&scheduler, &queue, &log, 2, 20);
        scheduler.clear();

        assert!(scheduler.is_empty());
        assert_eq!(queue.pending_timers(), 0);
        queue.advance(Duration::from_millis(100));
        assert!(log.lock().is_empty());
        assert_eq!(scheduler.stats().removed, 2);
    }

    #[test]
    fn test_cancel_keeps_tasks_until_next_add() {
        let (queue, scheduler, log) = setup(Duration::ZERO);

        add(&scheduler, &queue, &log, 1, 10);
        scheduler.cancel();
        queue.advance(Duration::from_millis(50));
        assert!(log.lock().is_empty());
        assert_eq!(scheduler.len(), 1);

        add(&scheduler, &queue, &log, 2, 10);
        queue.advance(Duration::from_millis(50));
        assert_eq!(fired_ids(&log), vec![1, 2]);
    }

    #[test]
    fn test_drop_cancels_timer() {
        let (queue, scheduler, log) = setup(Duration::ZERO);

        add(&scheduler, &queue, &log, 1, 10);
        drop(scheduler);
        assert_eq!(queue.pending_timers(), 0);

        queue.advance(Duration::from_millis(50));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_random_add_remove_sequences() {
        // Fixed seed so a failing sequence can be replayed
        let mut rng = StdRng::seed_from_u64(0x2545_f491_4f6c_dd1d);

        for round in 0..20 {
            let accuracy = Duration::from_millis(rng.gen_range(0..5));
            let (queue, scheduler, log) = setup(accuracy);
            let scheduler = Arc::new(scheduler);
            // Fired count seen by each callback; equal within one batch
            let batches = Arc::new(Mutex::new(Vec::new()));
            let mut dates = std::collections::HashMap::new();
            let mut removed = std::collections::BTreeSet::new();

            for id in 0..40u32 {
                let delay = rng.gen_range(0..200);
                dates.insert(id, queue.now() + Duration::from_millis(delay));
                let sink = log.clone();
                let batch_sink = batches.clone();
                let q = queue.clone();
                let weak = Arc::downgrade(&scheduler);
                scheduler.add_after(Duration::from_millis(delay), id, move |id| {
                    sink.lock().push((id, q.now()));
                    if let Some(scheduler) = weak.upgrade() {
                        batch_sink.lock().push(scheduler.stats().fired);
                    }
                });

                if rng.gen_range(0..4) == 0 {
                    let victim = rng.gen_range(0..=id);
                    let already_fired = log.lock().iter().any(|(fired, _)| *fired == victim);
                    if scheduler.remove(|task| *task.user_data() == victim) == 1 {
                        assert!(!already_fired);
                        removed.insert(victim);
                    }
                }
                if rng.gen_range(0..8) == 0 {
                    queue.advance(Duration::from_millis(rng.gen_range(0..30)));
                }
            }
            queue.advance(Duration::from_secs(1));

            let log = log.lock();
            let mut seen = std::collections::BTreeSet::new();
            for (id, at) in log.iter() {
                assert!(seen.insert(*id), "round {}: task {} fired twice", round, id);
                assert!(!removed.contains(id), "round {}: removed task {} fired", round, id);
                let due = dates[id];
                assert!(*at + accuracy >= due, "round {}: task {} fired early", round, id);
                assert!(*at <= due + accuracy, "round {}: task {} fired late", round, id);
            }
            for id in 0..40u32 {
                assert!(
                    seen.contains(&id) || removed.contains(&id),
                    "round {}: task {} never fired",
                    round,
                    id
                );
            }
            let batches = batches.lock();
            assert_eq!(batches.len(), log.len());
            for (i, pair) in log.windows(2).enumerate() {
                assert!(pair[0].1 <= pair[1].1, "round {}: out of order", round);
                if batches[i] == batches[i + 1] {
                    assert!(
                        dates[&pair[0].0] <= dates[&pair[1].0],
                        "round {}: batch not in fire date order",
                        round
                    );
                }
            }
        }
    }
}
