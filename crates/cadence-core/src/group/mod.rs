//! Fork/join task groups
//!
//! Units of work `enter` a [`TaskGroup`] before starting and `leave` it with
//! their outcome. Once every unit has left, the registered `notify` hook
//! receives the merged [`GroupOutcome`].

#[allow(clippy::module_inception)]
mod group;
mod merge;
mod outcome;

pub use group::TaskGroup;
pub use merge::{Append, Appendable, MergePolicy, Replace};
pub use outcome::{GroupOutcome, Outcome};
