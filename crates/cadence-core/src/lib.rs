//! Cadence Core
//!
//! In-process task scheduling and coordination primitives:
//! - Re-schedulable delayed/repeating actions ([`DelayedAction`])
//! - Multi-task timer scheduler backed by a single delayed action ([`Scheduler`])
//! - Serial task controller that always reflects the latest input ([`SerialTaskController`])
//! - Fork/join task groups with result and error accumulation ([`TaskGroup`])
//!
//! Every primitive dispatches through a [`WorkQueue`]. A deterministic
//! [`ManualQueue`] lives in this crate; the threaded queue lives in
//! `cadence-runtime`.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod controller;
pub mod error;
pub mod group;
pub mod queue;
pub mod scheduler;
pub mod sync;
pub mod timer;

pub use controller::{ControllerResult, ControllerStats, SerialTaskController, Status};
pub use error::{Misuse, TaskError};
pub use group::{
    Append, Appendable, GroupOutcome, MergePolicy, Outcome, Replace, TaskGroup,
};
pub use queue::{CancelFn, CancelToken, Cancellable, Job, ManualQueue, RepeatingJob, WorkQueue};
pub use scheduler::{ScheduledTask, Scheduler, SchedulerStats, DEFAULT_ACCURACY};
pub use sync::{Flag, FlagSet};
pub use timer::{ActionState, DelayedAction, Repetition, ScheduleOption, ScheduleRequest};
