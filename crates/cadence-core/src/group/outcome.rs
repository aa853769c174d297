//! Per-child and group-level outcomes

/// What a single unit of work reports when it leaves the group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, E> {
    /// Finished with a value
    Success(T),
    /// Finished with an error
    Failure(E),
    /// Stopped because it was cancelled
    Cancelled,
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(err) => Outcome::Failure(err),
        }
    }
}

/// Resolved outcome of a whole wave of work.
///
/// Resolution priority is `Failed` over `Cancelled` over `Value` over
/// `Empty`: a single recorded error fails the group no matter how many
/// values were merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOutcome<T, E> {
    /// At least one unit failed; errors in leave order
    Failed(Vec<E>),
    /// The group or one of its units was cancelled
    Cancelled,
    /// The merged value
    Value(T),
    /// Every unit left without a value
    Empty,
}

impl<T, E> GroupOutcome<T, E> {
    /// Check whether the wave failed
    pub fn is_failed(&self) -> bool {
        matches!(self, GroupOutcome::Failed(_))
    }

    /// Check whether the wave was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GroupOutcome::Cancelled)
    }

    /// The merged value, if the wave succeeded with one
    pub fn into_value(self) -> Option<T> {
        match self {
            GroupOutcome::Value(value) => Some(value),
            _ => None,
        }
    }
}
