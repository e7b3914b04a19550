//! Reactive Primitives
//!
//! This module implements the reactive system: observables, computeds and
//! reactions, coordinated by a [`Runtime`].
//!
//! # Concepts
//!
//! ## Observables
//!
//! An Observable is a container for mutable state. When its value is read
//! while a computed or reaction evaluates, the evaluator is registered as a
//! subscriber. When the value changes, every subscriber is notified.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It is evaluated
//! lazily and re-evaluates only when one of its inputs really changed.
//!
//! ## Reactions
//!
//! A Reaction is a side-effecting computation that runs whenever its inputs
//! change. Reactions are how state reaches the outside world.
//!
//! ## Transactions
//!
//! Writes made inside [`transaction`] or [`action`] are batched: dependent
//! reactions run once, when the outermost transaction closes, and observe
//! only the final values.
//!
//! # Implementation Notes
//!
//! Dependency tracking is automatic. The runtime keeps a "current evaluator"
//! and every read made while it is set records an edge. Change propagation
//! is push for flags (dirty / maybe-dirty) and pull for values: computeds
//! only recompute when something actually asks for them.

mod computed;
mod context;
mod observable;
mod options;
mod reaction;
mod runtime;
mod subscriber;

pub use computed::Computed;
pub use observable::Observable;
pub use options::{Equality, Options};
pub use reaction::{Manager, Reaction};
pub use runtime::Runtime;

pub(crate) use subscriber::{Derivation, Scheduled};

use crate::error::Result;

/// Run `f` as a transaction on the thread's default runtime.
///
/// See [`Runtime::transaction`].
pub fn transaction<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    Runtime::current().transaction(f)
}

/// Run `f` as an untracked transaction on the thread's default runtime.
///
/// See [`Runtime::action`].
pub fn action<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    Runtime::current().action(f)
}

/// Run `f` with tracking suppressed on the thread's default runtime.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    Runtime::current().untracked(f)
}
