//! Fork/join group with merge-on-leave

use super::merge::{Append, Appendable, MergePolicy, Replace};
use super::outcome::{GroupOutcome, Outcome};
use crate::error::{report_misuse, Misuse};
use crate::queue::{Cancellable, WorkQueue};
use parking_lot::Mutex;
use std::fmt;
use std::mem;
use std::sync::Arc;

type Callback<T, E> = Box<dyn FnOnce(GroupOutcome<T, E>) + Send + 'static>;

/// Completion hook registered through `notify`
struct Hook<T, E> {
    queue: Arc<dyn WorkQueue>,
    callback: Callback<T, E>,
}

impl<T: Send + 'static, E: Send + 'static> Hook<T, E> {
    fn deliver(self, outcome: GroupOutcome<T, E>) {
        let callback = self.callback;
        self.queue.run_now(Box::new(move || callback(outcome)));
    }
}

struct GroupState<T, E> {
    pending: usize,
    value: Option<T>,
    errors: Vec<E>,
    cancelled: bool,
    handles: Vec<Box<dyn Cancellable>>,
    hook: Option<Hook<T, E>>,
}

impl<T, E> GroupState<T, E> {
    /// Resolve the accumulated outcome and reset for the next wave
    fn resolve(&mut self) -> GroupOutcome<T, E> {
        let errors = mem::take(&mut self.errors);
        let value = self.value.take();
        let cancelled = mem::replace(&mut self.cancelled, false);
        self.handles.clear();

        if !errors.is_empty() {
            GroupOutcome::Failed(errors)
        } else if cancelled {
            GroupOutcome::Cancelled
        } else {
            match value {
                Some(value) => GroupOutcome::Value(value),
                None => GroupOutcome::Empty,
            }
        }
    }

    /// Decrement the pending count. Returns the hook and its outcome when
    /// this was the last unit out.
    fn leave(&mut self) -> Result<Option<(Hook<T, E>, GroupOutcome<T, E>)>, Misuse> {
        if self.pending == 0 {
            return Err(Misuse::UnbalancedLeave);
        }
        self.pending -= 1;
        if self.pending > 0 {
            return Ok(None);
        }
        // Every unit of the wave has left; nothing is left to cancel
        self.handles.clear();
        Ok(self.hook.take().map(|hook| {
            let outcome = self.resolve();
            (hook, outcome)
        }))
    }
}

/// Fork/join group accumulating values, errors and cancellation
///
/// Each unit of work calls [`enter`](Self::enter) before it starts and one
/// of the `leave` variants when it finishes. Values are folded together by
/// the group's [`MergePolicy`]; any recorded error fails the whole wave.
/// After the hook registered with [`notify`](Self::notify) has been handed
/// the outcome, the accumulator is reset and the group can be reused.
///
/// # Example
///
/// ```ignore
/// let group = Arc::new(TaskGroup::<Vec<u32>, String, _>::appending());
/// for id in 0..3 {
///     group.enter();
///     let group = group.clone();
///     queue.run_now(Box::new(move || group.leave_value(vec![id])));
/// }
/// group.notify(queue, |outcome| println!("{:?}", outcome));
/// ```
pub struct TaskGroup<T, E, P = Replace> {
    policy: P,
    state: Mutex<GroupState<T, E>>,
}

impl<T, E> TaskGroup<T, E, Replace>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Create a group where the last value to leave wins
    pub fn new() -> Self {
        Self::with_policy(Replace)
    }
}

impl<T, E> Default for TaskGroup<T, E, Replace>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> TaskGroup<T, E, Append>
where
    T: Appendable + Send + 'static,
    E: Send + 'static,
{
    /// Create a group concatenating values in leave order
    pub fn appending() -> Self {
        Self::with_policy(Append)
    }
}

impl<T, E, P> TaskGroup<T, E, P>
where
    T: Send + 'static,
    E: Send + 'static,
    P: MergePolicy<T>,
{
    /// Create a group with an explicit merge policy
    pub fn with_policy(policy: P) -> Self {
        Self {
            policy,
            state: Mutex::new(GroupState {
                pending: 0,
                value: None,
                errors: Vec::new(),
                cancelled: false,
                handles: Vec::new(),
                hook: None,
            }),
        }
    }

    /// Register a unit of work
    pub fn enter(&self) {
        self.state.lock().pending += 1;
    }

    /// Register a unit of work together with a handle that stops it.
    ///
    /// If the group is already cancelled the handle is cancelled right away.
    pub fn enter_with<C>(&self, handle: C)
    where
        C: Cancellable + 'static,
    {
        {
            let mut state = self.state.lock();
            state.pending += 1;
            if !state.cancelled {
                state.handles.push(Box::new(handle));
                return;
            }
        }
        handle.cancel();
    }

    /// Mark a unit of work as finished without a value
    pub fn leave(&self) {
        let result = self.state.lock().leave();
        self.finish(result);
    }

    /// Finish a unit of work with a value
    ///
    /// Values arriving after [`cancel`](Self::cancel) are dropped; the
    /// pending count is still decremented.
    pub fn leave_value(&self, value: T) {
        let result = {
            let mut state = self.state.lock();
            if !state.cancelled {
                let current = state.value.take();
                state.value = Some(self.policy.merge(current, value));
            }
            state.leave()
        };
        self.finish(result);
    }

    /// Finish a unit of work with an error
    pub fn leave_error(&self, error: E) {
        let result = {
            let mut state = self.state.lock();
            state.errors.push(error);
            state.leave()
        };
        self.finish(result);
    }

    /// Finish a unit of work that was cancelled
    pub fn leave_cancelled(&self) {
        let result = {
            let mut state = self.state.lock();
            state.cancelled = true;
            state.leave()
        };
        self.finish(result);
    }

    /// Finish a unit of work with a `Result`
    pub fn leave_result(&self, result: Result<T, E>) {
        self.leave_outcome(result.into());
    }

    /// Finish a unit of work with an [`Outcome`]
    pub fn leave_outcome(&self, outcome: Outcome<T, E>) {
        match outcome {
            Outcome::Success(value) => self.leave_value(value),
            Outcome::Failure(error) => self.leave_error(error),
            Outcome::Cancelled => self.leave_cancelled(),
        }
    }

    /// Cancel the group and ask every registered unit to stop.
    ///
    /// Units still have to leave; the wave resolves as cancelled unless an
    /// error was recorded.
    pub fn cancel(&self) {
        let handles = {
            let mut state = self.state.lock();
            state.cancelled = true;
            mem::take(&mut state.handles)
        };
        tracing::debug!(handles = handles.len(), "task group cancelled");
        for handle in handles {
            handle.cancel();
        }
    }

    /// Register the completion hook.
    ///
    /// `callback` is posted to `queue` once the pending count reaches zero,
    /// or right away if nothing is pending. Registering a new hook before the
    /// previous one fired replaces it.
    pub fn notify<F>(&self, queue: Arc<dyn WorkQueue>, callback: F)
    where
        F: FnOnce(GroupOutcome<T, E>) + Send + 'static,
    {
        let hook = Hook {
            queue,
            callback: Box::new(callback),
        };

        let (ready, replaced) = {
            let mut state = self.state.lock();
            if state.pending == 0 {
                let outcome = state.resolve();
                (Some((hook, outcome)), false)
            } else {
                (None, state.hook.replace(hook).is_some())
            }
        };

        if replaced {
            report_misuse(Misuse::HookReplaced, "task_group");
        }
        if let Some((hook, outcome)) = ready {
            hook.deliver(outcome);
        }
    }

    /// Number of units that entered but have not left
    pub fn pending(&self) -> usize {
        self.state.lock().pending
    }

    /// Check whether the current wave has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    fn finish(&self, result: Result<Option<(Hook<T, E>, GroupOutcome<T, E>)>, Misuse>) {
        match result {
            Ok(Some((hook, outcome))) => hook.deliver(outcome),
            Ok(None) => {}
            Err(misuse) => report_misuse(misuse, "task_group"),
        }
    }
}

impl<T, E, P> fmt::Debug for TaskGroup<T, E, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TaskGroup")
            .field("pending", &state.pending)
            .field("errors", &state.errors.len())
            .field("cancelled", &state.cancelled)
            .field("has_value", &state.value.is_some())
            .finish()
    }
}
