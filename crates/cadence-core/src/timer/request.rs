//! Scheduling requests for delayed actions

use crate::sync::{Flag, FlagSet};
use std::time::{Duration, Instant};

/// Whether a delayed action fires once or keeps repeating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Repetition {
    /// Fire a single time, then become idle
    Once,
    /// Fire, then fire again every interval until cancelled
    Every(Duration),
}

impl Repetition {
    /// The repeat interval, if any
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Repetition::Once => None,
            Repetition::Every(interval) => Some(*interval),
        }
    }

    /// Check whether this repeats
    pub fn is_repeating(&self) -> bool {
        matches!(self, Repetition::Every(_))
    }
}

/// Options modifying how a request is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleOption {
    /// Only ever move an already scheduled fire date earlier
    Weak,
}

impl Flag for ScheduleOption {
    const ALL: &'static [Self] = &[ScheduleOption::Weak];
}

/// A request to (re)schedule a [`DelayedAction`](super::DelayedAction)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleRequest {
    /// Explicit absolute fire date
    pub fire_date: Option<Instant>,
    /// Delay from now, used when no explicit fire date is given
    pub delay: Duration,
    /// Repeat behaviour after the first firing
    pub repetition: Repetition,
    /// Minimum slack between now and the fire date
    pub tolerance: Duration,
    /// Request options
    pub options: FlagSet<ScheduleOption>,
}

impl ScheduleRequest {
    /// Fire once after `delay`
    pub fn after(delay: Duration) -> Self {
        Self {
            fire_date: None,
            delay,
            repetition: Repetition::Once,
            tolerance: Duration::ZERO,
            options: FlagSet::empty(),
        }
    }

    /// Fire once at `fire_date`
    pub fn at(fire_date: Instant) -> Self {
        Self {
            fire_date: Some(fire_date),
            ..Self::after(Duration::ZERO)
        }
    }

    /// Fire every `interval`, first after one interval
    pub fn every(interval: Duration) -> Self {
        Self {
            repetition: Repetition::Every(interval),
            ..Self::after(interval)
        }
    }

    /// Keep firing every `interval` after the first firing
    pub fn repeating(mut self, interval: Duration) -> Self {
        self.repetition = Repetition::Every(interval);
        self
    }

    /// Set the minimum slack between now and the fire date
    pub fn tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Add an option
    pub fn with_option(mut self, option: ScheduleOption) -> Self {
        self.options.insert(option);
        self
    }

    /// Only move an already scheduled fire date earlier
    pub fn weak(self) -> Self {
        self.with_option(ScheduleOption::Weak)
    }

    /// Fire date this request resolves to at `now`, before any weak
    /// coalescing with an existing schedule.
    ///
    /// An explicit date is clamped to at least `now + tolerance`; otherwise
    /// the date is `now + max(delay, tolerance)`.
    pub fn effective_fire_date(&self, now: Instant) -> Instant {
        match self.fire_date {
            Some(date) => date.max(now + self.tolerance),
            None => now + self.delay.max(self.tolerance),
        }
    }
}
