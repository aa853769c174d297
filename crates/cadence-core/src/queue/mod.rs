//! Work dispatch abstraction
//!
//! Every primitive in this crate posts its work through a [`WorkQueue`]:
//! run a closure now, after a delay, or on a repeating interval. Timed
//! registrations hand back a [`CancelToken`].

mod manual;

pub use manual::ManualQueue;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A one-shot unit of work
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A unit of work invoked on every tick of a repeating registration
pub type RepeatingJob = Arc<dyn Fn() + Send + Sync + 'static>;

/// Dispatches closures immediately, after a delay, or repeatedly
pub trait WorkQueue: Send + Sync + 'static {
    /// Current time on this queue's clock
    fn now(&self) -> Instant {
        Instant::now()
    }

    /// Run `job` as soon as possible
    fn run_now(&self, job: Job);

    /// Run `job` once `delay` has elapsed
    fn run_after(&self, delay: Duration, job: Job) -> CancelToken;

    /// Run `job` every `interval`, first after one interval.
    ///
    /// `tolerance` is the slack the queue may use to coalesce ticks with
    /// other due work.
    fn run_repeating(&self, interval: Duration, tolerance: Duration, job: RepeatingJob)
        -> CancelToken;
}

/// Cancellation handle for a timed registration
///
/// Cloning shares the same underlying flag. Cancelling is idempotent and a
/// cancelled registration never runs again.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the registration
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check whether the registration was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Check whether two tokens share the same registration
    pub fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Work that can be asked to stop
///
/// Cancellation is advisory: running work decides for itself whether and
/// when to stop.
pub trait Cancellable: Send + Sync {
    /// Request cancellation
    fn cancel(&self);
}

impl Cancellable for CancelToken {
    fn cancel(&self) {
        CancelToken::cancel(self);
    }
}

impl<C: Cancellable + ?Sized> Cancellable for Arc<C> {
    fn cancel(&self) {
        (**self).cancel();
    }
}

/// Adapter turning a closure into a [`Cancellable`]
pub struct CancelFn<F>(pub F);

impl<F: Fn() + Send + Sync> Cancellable for CancelFn<F> {
    fn cancel(&self) {
        (self.0)();
    }
}
