//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when an observable or a
//! computed is read, the runtime registers the current computation as a
//! subscriber.
//!
//! # Implementation
//!
//! Each [`Runtime`](super::Runtime) owns a single "current evaluator" cell.
//! Entering a scope swaps a new value in and remembers the old one; dropping
//! the guard restores it. Nesting falls out naturally: a computed read from
//! inside a reaction swaps itself in for the duration of its evaluation and
//! hands the reaction back afterwards. Suppressing tracking (actions,
//! `untracked`) is just entering a scope with no evaluator.
//!
//! Guards restore state on drop, so the context stays consistent even when
//! host code panics.

use std::cell::Cell;

use crate::graph::NodeId;

/// Guard that restores the previous evaluator when dropped.
pub(crate) struct TrackingScope<'a> {
    tracker: &'a Cell<Option<NodeId>>,
    previous: Option<NodeId>,
    current: Option<NodeId>,
}

impl<'a> TrackingScope<'a> {
    /// Make `current` the evaluator until the guard drops.
    pub(crate) fn enter(tracker: &'a Cell<Option<NodeId>>, current: Option<NodeId>) -> Self {
        let previous = tracker.replace(current);
        Self {
            tracker,
            previous,
            current,
        }
    }
}

impl Drop for TrackingScope<'_> {
    fn drop(&mut self) {
        let active = self.tracker.replace(self.previous);

        // Scopes must unwind in LIFO order.
        debug_assert_eq!(
            active, self.current,
            "TrackingScope mismatch: expected {:?}, got {:?}",
            self.current, active
        );
    }
}

/// Guard that holds a counter incremented until dropped.
///
/// Used for transaction depth and for the number of computeds currently
/// evaluating.
pub(crate) struct DepthGuard<'a> {
    counter: &'a Cell<usize>,
}

impl<'a> DepthGuard<'a> {
    pub(crate) fn enter(counter: &'a Cell<usize>) -> Self {
        counter.set(counter.get() + 1);
        Self { counter }
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.counter.set(self.counter.get() - 1);
    }
}

/// Guard that raises a flag and lowers it when dropped.
pub(crate) struct FlagGuard<'a> {
    flag: &'a Cell<bool>,
}

impl<'a> FlagGuard<'a> {
    /// Raise `flag`, or return `None` if it is already raised.
    pub(crate) fn try_raise(flag: &'a Cell<bool>) -> Option<Self> {
        if flag.replace(true) {
            None
        } else {
            Some(Self { flag })
        }
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}
