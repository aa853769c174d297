//! Delayed and repeating actions

mod delayed_action;
mod request;

pub use delayed_action::{ActionState, DelayedAction};
pub use request::{Repetition, ScheduleOption, ScheduleRequest};
