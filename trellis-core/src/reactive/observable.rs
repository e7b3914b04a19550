//! Observable Implementation
//!
//! An Observable is the fundamental reactive primitive: a mutable cell that
//! remembers who read it and tells them when it changes.
//!
//! # How Observables Work
//!
//! 1. When an observable is read while a computed or reaction evaluates,
//!    that evaluator becomes a subscriber.
//!
//! 2. When a new value is written, the subscriber set is drained and every
//!    subscriber is flagged dirty. Subscribers re-register on their next
//!    evaluation.
//!
//! 3. Outside a transaction the write then flushes the schedule, so
//!    dependent reactions have run by the time `set` returns.
//!
//! An optional equality check turns writes of an equal value into no-ops.
//!
//! Host code never runs while the cell is borrowed: readers see a shared
//! snapshot of the value, so they may write to the observable they read.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::Rc;

use super::options::{Equality, Options};
use super::runtime::Runtime;
use crate::error::Result;
use crate::graph::{Node, NodeId, NodeState};

/// A reactive cell holding a value of type `T`.
///
/// # Example
///
/// ```rust,ignore
/// let count = Observable::new(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (notifies subscribers)
/// count.set(5)?;
/// ```
pub struct Observable<T: 'static> {
    inner: Rc<ObservableInner<T>>,
}

struct ObservableInner<T> {
    runtime: Runtime,
    id: NodeId,
    value: RefCell<Rc<T>>,
    equality: Option<Equality<T>>,
}

impl<T: 'static> Observable<T> {
    /// Create an observable on the thread's default runtime.
    pub fn new(value: T) -> Self {
        Runtime::current().observable(value)
    }

    /// Create an observable with options on the thread's default runtime.
    pub fn with_options(value: T, options: Options<T>) -> Self {
        Runtime::current().observable_with(value, options)
    }

    pub(crate) fn create(runtime: Runtime, value: T, options: Options<T>) -> Self {
        let equality = options.into_equality();
        let id = runtime.register(Node::observable(equality.is_some()));
        Self {
            inner: Rc::new(ObservableInner {
                runtime,
                id,
                value: RefCell::new(Rc::new(value)),
                equality,
            }),
        }
    }

    /// This observable's node id.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// The runtime this observable belongs to.
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Get the current value, recording a dependency if tracked.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Borrow the current value, recording a dependency if tracked.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.runtime.report_read(self.inner.id);
        let value = self.snapshot();
        f(&*value)
    }

    /// Get the current value without recording a dependency.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        T::clone(&self.inner.value.borrow())
    }

    /// Write a new value and notify subscribers.
    ///
    /// Fails with [`IllegalMutation`](crate::ReactiveError::IllegalMutation)
    /// while a computed is evaluating. Outside a transaction, errors from
    /// the reactions this write triggers are returned here.
    pub fn set(&self, value: T) -> Result<()> {
        let runtime = &self.inner.runtime;
        let id = self.inner.id;
        runtime.guard_mutation(id)?;

        if let Some(equal) = &self.inner.equality {
            let current = self.snapshot();
            if runtime.untracked(|| equal(&*current, &value)) {
                return Ok(());
            }
        }

        let previous = self.inner.value.replace(Rc::new(value));
        drop(previous);
        runtime.notify_changed(id)
    }

    /// Write a value derived from the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        let current = self.snapshot();
        self.set(f(&*current))
    }

    fn snapshot(&self) -> Rc<T> {
        Rc::clone(&self.inner.value.borrow())
    }

    /// Current freshness state: CLEAN, or NOTIFYING mid-broadcast.
    pub fn state(&self) -> NodeState {
        self.inner
            .runtime
            .state(self.inner.id)
            .unwrap_or(NodeState::Clean)
    }

    /// Number of nodes that read this observable in their last evaluation.
    pub fn subscriber_count(&self) -> usize {
        self.inner.runtime.subscriber_count(self.inner.id)
    }
}

impl<T> Drop for ObservableInner<T> {
    fn drop(&mut self) {
        self.runtime.release(self.id);
    }
}

impl<T: 'static> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Observable<T>
where
    T: Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("id", &self.inner.id)
            .field("value", &**self.inner.value.borrow())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
