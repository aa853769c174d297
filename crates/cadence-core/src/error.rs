//! Error types shared by the coordination primitives

/// Programmer-misuse conditions.
///
/// These never abort the process. They are reported through `tracing` in
/// debug builds and silently ignored in release builds; the offending
/// transition is skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Misuse {
    /// A task result was committed while no execution was recorded as running
    #[error("result committed while no execution was running")]
    CommitWithoutRun,

    /// `leave` was called more often than `enter`
    #[error("leave called with no pending work")]
    UnbalancedLeave,

    /// A completion hook was registered while another one was still pending
    #[error("notify hook replaced before it fired")]
    HookReplaced,
}

/// Report a misuse condition. Only visible in debug builds.
pub(crate) fn report_misuse(misuse: Misuse, component: &'static str) {
    if cfg!(debug_assertions) {
        tracing::warn!(component, "{}", misuse);
    }
}

/// Failure produced by a user-supplied task function.
///
/// Errors returned by the task are wrapped in [`TaskError::Failed`]; a panic
/// unwinding out of the task is captured as [`TaskError::Panicked`] so it is
/// delivered as data instead of crossing the component boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError<E> {
    /// The task returned an error
    #[error("task failed: {0}")]
    Failed(E),

    /// The task panicked
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl<E> TaskError<E> {
    /// Build a [`TaskError::Panicked`] from a caught panic payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        TaskError::Panicked(message)
    }

    /// The error returned by the task, if it did not panic.
    pub fn failure(&self) -> Option<&E> {
        match self {
            TaskError::Failed(e) => Some(e),
            TaskError::Panicked(_) => None,
        }
    }
}
