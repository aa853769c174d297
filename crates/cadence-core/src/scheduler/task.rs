//! Scheduled task entries and scheduler statistics

use std::fmt;
use std::time::Instant;

/// A callback due at a fire date, carrying opaque user data
pub struct ScheduledTask<U> {
    fire_date: Instant,
    user_data: U,
    callback: Box<dyn FnOnce(U) + Send>,
}

impl<U> ScheduledTask<U> {
    /// Create a task that runs `callback(user_data)` at `fire_date`
    pub fn new<F>(fire_date: Instant, user_data: U, callback: F) -> Self
    where
        F: FnOnce(U) + Send + 'static,
    {
        Self {
            fire_date,
            user_data,
            callback: Box::new(callback),
        }
    }

    /// When the task is due
    pub fn fire_date(&self) -> Instant {
        self.fire_date
    }

    /// The task's user data
    pub fn user_data(&self) -> &U {
        &self.user_data
    }

    pub(crate) fn run(self) {
        (self.callback)(self.user_data);
    }
}

impl<U: fmt::Debug> fmt::Debug for ScheduledTask<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("fire_date", &self.fire_date)
            .field("user_data", &self.user_data)
            .finish_non_exhaustive()
    }
}

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total tasks added
    pub added: u64,

    /// Tasks run because their fire date arrived
    pub fired: u64,

    /// Tasks run early through `execute_tasks`
    pub executed: u64,

    /// Tasks dropped through `remove` or `clear`
    pub removed: u64,

    /// Times the backing timer was (re)registered
    pub timer_resets: u64,
}
