//! Queue configuration

use crate::error::RuntimeError;
use std::time::Duration;

/// Environment variable overriding the worker count
pub const WORKERS_ENV: &str = "CADENCE_WORKERS";

/// Environment variable overriding the thread name prefix
pub const THREAD_PREFIX_ENV: &str = "CADENCE_THREAD_PREFIX";

/// Configuration for a [`ThreadQueue`](crate::ThreadQueue)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    /// Number of worker threads
    pub workers: usize,

    /// Prefix for worker and timer thread names
    pub thread_prefix: String,

    /// How long an idle worker parks before re-checking for work
    pub idle_timeout: Duration,

    /// Upper bound on waiting for each thread during shutdown
    pub shutdown_timeout: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().max(1),
            thread_prefix: "cadence".to_string(),
            idle_timeout: Duration::from_millis(50),
            shutdown_timeout: Duration::from_secs(2),
        }
    }
}

impl QueueOptions {
    /// Defaults overridden by `CADENCE_WORKERS` and `CADENCE_THREAD_PREFIX`
    pub fn from_env() -> Result<Self, RuntimeError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub(crate) fn from_lookup<L>(lookup: L) -> Result<Self, RuntimeError>
    where
        L: Fn(&'static str) -> Option<String>,
    {
        let mut options = Self::default();

        if let Some(value) = lookup(WORKERS_ENV) {
            options.workers = match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(RuntimeError::InvalidEnv {
                        var: WORKERS_ENV,
                        value,
                    })
                }
            };
        }

        if let Some(value) = lookup(THREAD_PREFIX_ENV) {
            let prefix = value.trim();
            if prefix.is_empty() {
                return Err(RuntimeError::InvalidEnv {
                    var: THREAD_PREFIX_ENV,
                    value,
                });
            }
            options.thread_prefix = prefix.to_string();
        }

        Ok(options)
    }

    /// Set the worker count
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the thread name prefix
    pub fn thread_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_prefix = prefix.into();
        self
    }

    /// Set the idle park timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the per-thread shutdown wait
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), RuntimeError> {
        if self.workers == 0 {
            return Err(RuntimeError::InvalidWorkers);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let vars: HashMap<&'static str, String> =
            vars.iter().map(|(k, v)| (*k, v.to_string())).collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_default_options() {
        let options = QueueOptions::default();
        assert!(options.workers >= 1);
        assert_eq!(options.thread_prefix, "cadence");
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let options = QueueOptions::default()
            .workers(3)
            .thread_prefix("io")
            .idle_timeout(Duration::from_millis(5))
            .shutdown_timeout(Duration::from_millis(100));
        assert_eq!(options.workers, 3);
        assert_eq!(options.thread_prefix, "io");
        assert_eq!(options.idle_timeout, Duration::from_millis(5));
        assert_eq!(options.shutdown_timeout, Duration::from_millis(100));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let options = QueueOptions::default().workers(0);
        assert!(matches!(options.validate(), Err(RuntimeError::InvalidWorkers)));
    }

    #[test]
    fn test_env_overrides() {
        let options =
            QueueOptions::from_lookup(lookup(&[(WORKERS_ENV, " 6 "), (THREAD_PREFIX_ENV, "bg")]))
                .unwrap();
        assert_eq!(options.workers, 6);
        assert_eq!(options.thread_prefix, "bg");

        let options = QueueOptions::from_lookup(lookup(&[])).unwrap();
        assert_eq!(options, QueueOptions::default());
    }

    #[test]
    fn test_env_invalid_values() {
        let err = QueueOptions::from_lookup(lookup(&[(WORKERS_ENV, "many")])).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidEnv { var: WORKERS_ENV, .. }));

        let err = QueueOptions::from_lookup(lookup(&[(WORKERS_ENV, "0")])).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidEnv { .. }));

        let err = QueueOptions::from_lookup(lookup(&[(THREAD_PREFIX_ENV, "  ")])).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidEnv { var: THREAD_PREFIX_ENV, .. }));
    }
}
