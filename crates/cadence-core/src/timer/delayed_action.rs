//! Re-schedulable delayed action
//!
//! A [`DelayedAction`] owns one callback and at most one pending timer
//! registration on a [`WorkQueue`]. Rescheduling replaces the registration;
//! the callback always runs with the internal lock released, so it may call
//! back into the same action.

use super::request::{Repetition, ScheduleOption, ScheduleRequest};
use crate::queue::{CancelToken, WorkQueue};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Whether a delayed action currently has a pending timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    /// No timer registered
    Idle,
    /// A timer is registered and will fire at the stored fire date
    Scheduled,
}

struct ActionCore {
    fire_date: Option<Instant>,
    repetition: Repetition,
    tolerance: Duration,
    /// Pending registration. `Some` exactly when scheduled.
    handle: Option<CancelToken>,
    /// Bumped on every registration change; stale firings compare against it
    generation: u64,
    /// Number of callbacks currently executing
    firing: usize,
}

struct ActionInner {
    queue: Arc<dyn WorkQueue>,
    core: Mutex<ActionCore>,
    action: Box<dyn Fn() + Send + Sync>,
}

impl ActionInner {
    /// Replace the pending registration with one firing at `fire_date`
    fn arm(self: &Arc<Self>, core: &mut ActionCore, fire_date: Instant) {
        if let Some(old) = core.handle.take() {
            old.cancel();
        }
        core.generation += 1;
        let generation = core.generation;

        let delay = fire_date.saturating_duration_since(self.queue.now());
        let weak: Weak<Self> = Arc::downgrade(self);
        let token = self.queue.run_after(
            delay,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.fire(generation);
                }
            }),
        );

        tracing::trace!(generation, ?delay, "delayed action armed");
        core.fire_date = Some(fire_date);
        core.handle = Some(token);
    }

    /// Drop the pending registration, if any
    fn disarm(&self, core: &mut ActionCore) {
        if let Some(old) = core.handle.take() {
            old.cancel();
            tracing::trace!(generation = core.generation, "delayed action cancelled");
        }
        core.generation += 1;
        core.fire_date = None;
    }

    /// Timer callback for the registration identified by `generation`
    fn fire(self: &Arc<Self>, generation: u64) {
        {
            let mut core = self.core.lock();
            if core.generation != generation || core.handle.is_none() {
                // Superseded or cancelled after the timer was already due
                return;
            }
            core.handle = None;
            core.firing += 1;
        }

        (self.action)();

        let mut core = self.core.lock();
        core.firing -= 1;
        if core.generation != generation {
            // The callback (or another thread) rescheduled or cancelled
            return;
        }
        match core.repetition {
            Repetition::Every(interval) => {
                let now = self.queue.now();
                let base = core.fire_date.unwrap_or(now);
                let next = (base + interval).max(now + core.tolerance);
                self.arm(&mut core, next);
            }
            Repetition::Once => {
                core.fire_date = None;
            }
        }
    }

    /// Run the callback now. With `only_if_scheduled`, does nothing unless
    /// a timer is pending. Returns whether the callback ran.
    fn run_immediately(self: &Arc<Self>, only_if_scheduled: bool) -> bool {
        let generation = {
            let mut core = self.core.lock();
            if only_if_scheduled && core.handle.is_none() {
                return false;
            }
            if let Some(old) = core.handle.take() {
                old.cancel();
            }
            core.generation += 1;
            core.firing += 1;
            core.generation
        };

        (self.action)();

        let mut core = self.core.lock();
        core.firing -= 1;
        if core.generation != generation {
            return true;
        }
        match core.repetition {
            Repetition::Every(interval) => {
                let next = self.queue.now() + interval;
                self.arm(&mut core, next);
            }
            Repetition::Once => {
                core.fire_date = None;
            }
        }
        true
    }
}

/// One re-schedulable, optionally repeating, coalescable timer callback
///
/// Dropping a `DelayedAction` cancels its pending timer.
pub struct DelayedAction {
    inner: Arc<ActionInner>,
}

impl DelayedAction {
    /// Create an idle action that runs `action` on `queue` when it fires
    pub fn new<F>(queue: Arc<dyn WorkQueue>, action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ActionInner {
                queue,
                core: Mutex::new(ActionCore {
                    fire_date: None,
                    repetition: Repetition::Once,
                    tolerance: Duration::ZERO,
                    handle: None,
                    generation: 0,
                    firing: 0,
                }),
                action: Box::new(action),
            }),
        }
    }

    /// Schedule (or reschedule) the action. Returns the effective fire date.
    ///
    /// With [`ScheduleOption::Weak`] and a timer already pending, the fire
    /// date only ever moves earlier. The repetition is replaced either way.
    pub fn schedule(&self, request: ScheduleRequest) -> Instant {
        let mut core = self.inner.core.lock();
        let now = self.inner.queue.now();
        let mut fire_date = request.effective_fire_date(now);

        if request.options.contains(ScheduleOption::Weak) && core.handle.is_some() {
            if let Some(current) = core.fire_date {
                fire_date = fire_date.min(current);
            }
        }

        core.repetition = request.repetition;
        core.tolerance = request.tolerance;
        self.inner.arm(&mut core, fire_date);
        fire_date
    }

    /// Run the action now, regardless of schedule state.
    ///
    /// Afterwards a repeating action is rescheduled one interval from now;
    /// a one-shot action is left idle.
    pub fn trigger(&self) {
        self.inner.run_immediately(false);
    }

    /// Like [`trigger`](Self::trigger), but only if currently scheduled.
    /// Returns whether the action ran.
    pub fn flush(&self) -> bool {
        self.inner.run_immediately(true)
    }

    /// Cancel the pending timer, leaving the action idle
    pub fn cancel(&self) {
        let mut core = self.inner.core.lock();
        self.inner.disarm(&mut core);
    }

    /// Check whether a timer is pending
    pub fn is_scheduled(&self) -> bool {
        self.inner.core.lock().handle.is_some()
    }

    /// Current schedule state
    pub fn state(&self) -> ActionState {
        if self.is_scheduled() {
            ActionState::Scheduled
        } else {
            ActionState::Idle
        }
    }

    /// Check whether the callback is executing right now
    pub fn is_firing(&self) -> bool {
        self.inner.core.lock().firing > 0
    }

    /// Fire date of the pending timer
    pub fn fire_date(&self) -> Option<Instant> {
        let core = self.inner.core.lock();
        core.handle.as_ref().and(core.fire_date)
    }

    /// Repetition set by the last schedule request
    pub fn repetition(&self) -> Repetition {
        self.inner.core.lock().repetition
    }
}

impl Drop for DelayedAction {
    fn drop(&mut self) {
        self.cancel();
    }
}
