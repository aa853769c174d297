//! Serial task controller
//!
//! Runs a task function for the latest input with at most one execution in
//! flight. Inputs arriving during a run supersede each other; only the
//! newest one is run next. Clearing the input discards the in-flight result.

use crate::error::{report_misuse, Misuse, TaskError};
use crate::queue::WorkQueue;
use crate::sync::{Flag, FlagSet};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Controller status flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// The current input has not been run yet
    NeedsRun,
    /// An execution is in flight
    Running,
    /// The in-flight result must be discarded
    Cancelled,
}

impl Flag for Status {
    const ALL: &'static [Self] = &[Status::NeedsRun, Status::Running, Status::Cancelled];
}

/// Outcome of one task execution
pub type ControllerResult<O, E> = Result<O, TaskError<E>>;

/// A published result; `None` means "no result" (input cleared)
type Published<O, E> = Option<Arc<ControllerResult<O, E>>>;

type Observer<O, E> = Arc<dyn Fn(Published<O, E>) + Send + Sync>;

/// Controller counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerStats {
    /// Executions dispatched
    pub runs_started: u64,
    /// Executions that reported back
    pub runs_completed: u64,
    /// Completed executions whose result was thrown away
    pub results_discarded: u64,
    /// Results committed while nothing was running
    pub misuse: u64,
}

struct ControllerState<I, O, E> {
    input: Option<I>,
    status: FlagSet<Status>,
    last_result: Published<O, E>,
    observer: Option<Observer<O, E>>,
    /// Publications not yet handed to the observer, in publish order
    outbox: VecDeque<Published<O, E>>,
    /// Set while some thread is draining the outbox
    delivering: bool,
    stats: ControllerStats,
}

struct ControllerInner<I, O, E> {
    queue: Arc<dyn WorkQueue>,
    task: Box<dyn Fn(I) -> Result<O, E> + Send + Sync>,
    state: Mutex<ControllerState<I, O, E>>,
}

impl<I, O, E> ControllerInner<I, O, E>
where
    I: Clone + Send + 'static,
    O: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Begin an execution if one is needed and none is in flight.
    /// Returns the input captured for it.
    fn start_locked(&self, state: &mut ControllerState<I, O, E>) -> Option<I> {
        if state.status.contains(Status::Running) || !state.status.remove(Status::NeedsRun) {
            return None;
        }
        let input = state.input.clone()?;
        state.status.insert(Status::Running);
        state.stats.runs_started += 1;
        Some(input)
    }

    fn publish_locked(&self, state: &mut ControllerState<I, O, E>, result: Published<O, E>) {
        state.last_result = result.clone();
        state.outbox.push_back(result);
    }

    fn dispatch(self: &Arc<Self>, input: I) {
        let inner = Arc::clone(self);
        self.queue.run_now(Box::new(move || {
            let result = match catch_unwind(AssertUnwindSafe(|| (inner.task)(input))) {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(err)) => Err(TaskError::Failed(err)),
                Err(payload) => Err(TaskError::from_panic(payload)),
            };
            inner.complete(result);
        }));
    }

    fn complete(self: &Arc<Self>, result: ControllerResult<O, E>) {
        let next = {
            let mut state = self.state.lock();
            if !state.status.remove(Status::Running) {
                state.stats.misuse += 1;
                drop(state);
                report_misuse(Misuse::CommitWithoutRun, "serial_task_controller");
                return;
            }
            state.stats.runs_completed += 1;

            if state.status.remove(Status::Cancelled) {
                state.stats.results_discarded += 1;
                if state.input.is_none() && state.last_result.is_some() {
                    self.publish_locked(&mut state, None);
                }
            } else {
                self.publish_locked(&mut state, Some(Arc::new(result)));
            }
            self.start_locked(&mut state)
        };

        self.drain();
        if let Some(input) = next {
            self.dispatch(input);
        }
    }

    /// Deliver queued publications to the observer, outside the lock.
    ///
    /// Only one thread drains at a time; publications made while draining
    /// (including from the observer itself) are picked up by that thread,
    /// so the observer sees them in publish order.
    fn drain(&self) {
        {
            let mut state = self.state.lock();
            if state.delivering || state.outbox.is_empty() {
                return;
            }
            state.delivering = true;
        }

        loop {
            let (item, observer) = {
                let mut state = self.state.lock();
                match state.outbox.pop_front() {
                    Some(item) => (item, state.observer.clone()),
                    None => {
                        state.delivering = false;
                        return;
                    }
                }
            };
            if let Some(observer) = observer {
                observer(item);
            }
        }
    }
}

/// Runs a task function for the latest input, one execution at a time
///
/// Setting an input while idle dispatches the task on the work queue with a
/// copy of that input. Inputs set while a run is in flight are coalesced:
/// when the run finishes, the task runs once more with the newest input.
/// Clearing the input discards the in-flight result and publishes "no
/// result".
pub struct SerialTaskController<I, O, E> {
    inner: Arc<ControllerInner<I, O, E>>,
}

impl<I, O, E> SerialTaskController<I, O, E>
where
    I: Clone + Send + 'static,
    O: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Create an idle controller running `task` on `queue`
    pub fn new<F>(queue: Arc<dyn WorkQueue>, task: F) -> Self
    where
        F: Fn(I) -> Result<O, E> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ControllerInner {
                queue,
                task: Box::new(task),
                state: Mutex::new(ControllerState {
                    input: None,
                    status: FlagSet::empty(),
                    last_result: None,
                    observer: None,
                    outbox: VecDeque::new(),
                    delivering: false,
                    stats: ControllerStats::default(),
                }),
            }),
        }
    }

    /// Builder form of [`set_observer`](Self::set_observer)
    pub fn with_observer<F>(self, observer: F) -> Self
    where
        F: Fn(Option<Arc<ControllerResult<O, E>>>) + Send + Sync + 'static,
    {
        self.set_observer(observer);
        self
    }

    /// Register the observer receiving every publication, replacing any
    /// earlier one.
    ///
    /// The observer runs without the controller lock held and may call
    /// back into the controller.
    pub fn set_observer<F>(&self, observer: F)
    where
        F: Fn(Option<Arc<ControllerResult<O, E>>>) + Send + Sync + 'static,
    {
        self.inner.state.lock().observer = Some(Arc::new(observer));
    }

    /// Set (`Some`) or clear (`None`) the input
    pub fn set_input(&self, input: Option<I>) {
        let next = {
            let mut state = self.inner.state.lock();
            match input {
                Some(value) => {
                    state.input = Some(value);
                    state.status.insert(Status::NeedsRun);
                    self.inner.start_locked(&mut state)
                }
                None => {
                    state.input = None;
                    state.status.remove(Status::NeedsRun);
                    if state.status.contains(Status::Running) {
                        state.status.insert(Status::Cancelled);
                    } else if state.last_result.is_some() {
                        self.inner.publish_locked(&mut state, None);
                    }
                    None
                }
            }
        };

        self.inner.drain();
        if let Some(value) = next {
            tracing::trace!("serial task dispatched");
            self.inner.dispatch(value);
        }
    }

    /// Latest input
    pub fn input(&self) -> Option<I> {
        self.inner.state.lock().input.clone()
    }

    /// Most recently published result
    pub fn last_result(&self) -> Option<Arc<ControllerResult<O, E>>> {
        self.inner.state.lock().last_result.clone()
    }

    /// Check whether an execution is in flight
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().status.contains(Status::Running)
    }

    /// Current status flags
    pub fn status(&self) -> FlagSet<Status> {
        self.inner.state.lock().status
    }

    /// Snapshot of the controller counters
    pub fn stats(&self) -> ControllerStats {
        self.inner.state.lock().stats.clone()
    }
}
