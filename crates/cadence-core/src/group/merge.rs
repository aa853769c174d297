//! Value merge policies

use std::collections::VecDeque;

/// How a [`TaskGroup`](super::TaskGroup) folds successive values together
pub trait MergePolicy<T>: Send + Sync + 'static {
    /// Merge `incoming` into the accumulated value, if any
    fn merge(&self, current: Option<T>, incoming: T) -> T;
}

/// Last write wins
#[derive(Debug, Clone, Copy, Default)]
pub struct Replace;

impl<T> MergePolicy<T> for Replace {
    fn merge(&self, _current: Option<T>, incoming: T) -> T {
        incoming
    }
}

/// Concatenate values in leave order
#[derive(Debug, Clone, Copy, Default)]
pub struct Append;

impl<T: Appendable> MergePolicy<T> for Append {
    fn merge(&self, current: Option<T>, incoming: T) -> T {
        match current {
            Some(mut acc) => {
                acc.extend_with(incoming);
                acc
            }
            None => incoming,
        }
    }
}

/// Sequence-like values that can absorb another value of the same type
pub trait Appendable {
    /// Append `other` to the end of `self`
    fn extend_with(&mut self, other: Self);
}

impl<T> Appendable for Vec<T> {
    fn extend_with(&mut self, mut other: Self) {
        self.append(&mut other);
    }
}

impl<T> Appendable for VecDeque<T> {
    fn extend_with(&mut self, mut other: Self) {
        self.append(&mut other);
    }
}

impl Appendable for String {
    fn extend_with(&mut self, other: Self) {
        self.push_str(&other);
    }
}
