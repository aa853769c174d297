//! Cadence Runtime
//!
//! Threaded [`WorkQueue`](cadence_core::WorkQueue) for the cadence
//! primitives:
//! - Worker pool pulling jobs from a shared injector queue
//! - Timer thread keeping delayed and repeating registrations in a min-heap
//! - Environment-driven configuration ([`QueueOptions::from_env`])

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod error;
mod options;
mod queue;
mod timer;
mod worker;

pub use error::RuntimeError;
pub use options::{QueueOptions, THREAD_PREFIX_ENV, WORKERS_ENV};
pub use queue::{QueueStats, ThreadQueue};
