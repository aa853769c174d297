//! Timer Scheduler
//!
//! Many pending callbacks multiplexed onto one [`DelayedAction`](crate::DelayedAction),
//! fired in fire-date order with debounced timer resets.

#[allow(clippy::module_inception)]
mod scheduler;
mod task;

pub use scheduler::{Scheduler, DEFAULT_ACCURACY};
pub use task::{ScheduledTask, SchedulerStats};
