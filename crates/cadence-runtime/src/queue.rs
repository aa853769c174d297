//! Threaded work queue
//!
//! [`ThreadQueue`] runs immediate jobs on a pool of worker threads and
//! timed jobs through a dedicated timer thread.

use crate::error::RuntimeError;
use crate::options::QueueOptions;
use crate::timer::{TimerKind, TimerThread};
use crate::worker::{Shared, Worker};
use cadence_core::{CancelToken, Job, RepeatingJob, WorkQueue};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Job counters for a [`ThreadQueue`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Jobs that ran to completion
    pub executed: u64,
    /// Jobs that panicked
    pub panicked: u64,
    /// Timed registrations still armed
    pub pending_timers: usize,
}

/// Work queue backed by OS threads
///
/// Jobs run on `workers` threads in roughly submission order; timed jobs are
/// released to the workers by a single timer thread. A panicking job is
/// logged and the worker keeps running.
pub struct ThreadQueue {
    options: QueueOptions,
    shared: Arc<Shared>,
    timer: Arc<TimerThread>,
    workers: Mutex<Vec<Worker>>,
}

impl ThreadQueue {
    /// Start a queue with the given options
    pub fn start(options: QueueOptions) -> Result<Arc<Self>, RuntimeError> {
        options.validate()?;

        let queue = Arc::new(Self {
            shared: Shared::new(),
            timer: TimerThread::new(),
            workers: Mutex::new(Vec::with_capacity(options.workers)),
            options,
        });

        // A partially started queue is torn down when `queue` drops
        queue.timer.start(
            format!("{}-timer", queue.options.thread_prefix),
            queue.shared.clone(),
        )?;
        for id in 0..queue.options.workers {
            let worker = Worker::spawn(
                id,
                format!("{}-worker-{}", queue.options.thread_prefix, id),
                queue.shared.clone(),
                queue.options.idle_timeout,
            )?;
            queue.workers.lock().push(worker);
        }

        tracing::info!(
            workers = queue.options.workers,
            prefix = %queue.options.thread_prefix,
            "thread queue started"
        );
        Ok(queue)
    }

    /// Start a queue configured from the environment
    pub fn from_env() -> Result<Arc<Self>, RuntimeError> {
        Self::start(QueueOptions::from_env()?)
    }

    /// Options the queue was started with
    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    /// Number of worker threads
    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Check whether the queue has been shut down
    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Snapshot of the job counters
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            executed: self.shared.executed(),
            panicked: self.shared.panicked(),
            pending_timers: self.timer.pending(),
        }
    }

    /// Stop every thread. Queued and timed jobs that have not started are
    /// dropped; later submissions are ignored.
    pub fn shutdown(&self) {
        if !self.shared.begin_shutdown() {
            return;
        }

        let timeout = self.options.shutdown_timeout;
        self.timer.stop(timeout);
        let mut workers = std::mem::take(&mut *self.workers.lock());
        for worker in &mut workers {
            worker.join(timeout);
        }

        let dropped = self.shared.discard_pending();
        tracing::info!(dropped, "thread queue stopped");
    }
}

impl WorkQueue for ThreadQueue {
    fn run_now(&self, job: Job) {
        self.shared.submit(job);
    }

    fn run_after(&self, delay: Duration, job: Job) -> CancelToken {
        self.timer
            .register(Instant::now() + delay, Duration::ZERO, TimerKind::Once(job))
    }

    fn run_repeating(
        &self,
        interval: Duration,
        tolerance: Duration,
        job: RepeatingJob,
    ) -> CancelToken {
        self.timer.register(
            Instant::now() + interval,
            tolerance,
            TimerKind::Every { interval, job },
        )
    }
}

impl Drop for ThreadQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
