//! Runtime errors

/// Errors raised while configuring or starting a [`ThreadQueue`](crate::ThreadQueue)
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A worker or timer thread could not be spawned
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The configured worker count is zero
    #[error("worker count must be at least 1")]
    InvalidWorkers,

    /// An environment variable holds an unusable value
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv {
        /// Variable name
        var: &'static str,
        /// Offending value
        value: String,
    },
}
