//! Shared synchronization utilities

mod flags;

pub use flags::{Flag, FlagSet, MAX_FLAGS};
