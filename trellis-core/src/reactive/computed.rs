//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when one of
//! its inputs really changed.
//!
//! # How Computeds Work
//!
//! 1. A computed is created DIRTY and does nothing until first read.
//!
//! 2. Reading it runs the compute function with the computed as the current
//!    evaluator, so every observable or computed it reads becomes an input.
//!
//! 3. When an input changes, the computed is flagged DIRTY (the input
//!    definitely changed) or MAYBE_DIRTY (an input of an input changed).
//!
//! 4. On the next read a MAYBE_DIRTY computed first brings its own inputs up
//!    to date. Only if one of them really changed does it recompute.
//!
//! 5. With an equality check, a recomputation that yields an equal value
//!    is dropped and downstream nodes are never told.
//!
//! # Failure
//!
//! If the compute function fails, the computed stays DIRTY and the error is
//! returned to the reader. The next read tries again.
//!
//! # Disposal
//!
//! A computed whose last subscriber goes away is detached from its inputs
//! at the end of the flush. It keeps its last value but recomputes (and
//! re-subscribes) on the next read.
//!
//! The graph holds the computation itself, so a computed that is still read
//! by another node outlives its handles. Once both are gone it is reclaimed.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::Rc;

use super::options::{Equality, Options};
use super::runtime::Runtime;
use super::subscriber::Derivation;
use crate::error::Result;
use crate::graph::{Behavior, Node, NodeId, NodeState};

pub(crate) type Compute<T> = Box<dyn Fn() -> Result<T>>;

/// A cached derived value that recomputes only when its inputs change.
///
/// # Example
///
/// ```rust,ignore
/// let count = Observable::new(2);
///
/// let doubled = {
///     let count = count.clone();
///     Computed::new(move || Ok(count.get() * 2))
/// };
///
/// assert_eq!(doubled.get()?, 4);
/// ```
pub struct Computed<T: 'static> {
    handle: Rc<Handle<T>>,
}

/// Shared by every clone of a [`Computed`]; the last one to go releases
/// the node.
struct Handle<T: 'static>(Rc<ComputedInner<T>>);

struct ComputedInner<T> {
    runtime: Runtime,
    id: NodeId,
    compute: Compute<T>,
    /// `None` until the first successful computation.
    value: RefCell<Option<Rc<T>>>,
    equality: Option<Equality<T>>,
}

impl<T: 'static> Computed<T> {
    /// Create a computed on the thread's default runtime.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> Result<T> + 'static,
    {
        Runtime::current().computed(compute)
    }

    /// Create a computed with options on the thread's default runtime.
    pub fn with_options<F>(compute: F, options: Options<T>) -> Self
    where
        F: Fn() -> Result<T> + 'static,
    {
        Runtime::current().computed_with(compute, options)
    }

    pub(crate) fn create(runtime: Runtime, compute: Compute<T>, options: Options<T>) -> Self {
        let equality = options.into_equality();
        let id = runtime.register(Node::computed(equality.is_some()));
        let inner = Rc::new(ComputedInner {
            runtime,
            id,
            compute,
            value: RefCell::new(None),
            equality,
        });

        let derivation: Rc<dyn Derivation> = inner.clone();
        inner.runtime.attach(id, Behavior::Computed(derivation));
        Self {
            handle: Rc::new(Handle(inner)),
        }
    }

    fn inner(&self) -> &ComputedInner<T> {
        &self.handle.0
    }

    /// This computed's node id.
    pub fn id(&self) -> NodeId {
        self.inner().id
    }

    /// The runtime this computed belongs to.
    pub fn runtime(&self) -> &Runtime {
        &self.inner().runtime
    }

    /// Get the current value, recomputing first if needed.
    ///
    /// Fails with [`ReentrantRead`](crate::ReactiveError::ReentrantRead) if
    /// the computed is read from inside its own computation, or with
    /// whatever error the compute function returned.
    pub fn get(&self) -> Result<T>
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Borrow the current value, recomputing first if needed.
    ///
    /// `f` sees a snapshot of the value and may write to the inputs it was
    /// derived from.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let inner = self.inner();
        inner.runtime.actualize(inner.id)?;
        inner.runtime.report_read(inner.id);

        let value = inner
            .value
            .borrow()
            .clone()
            .expect("actualized computed holds a value");
        Ok(f(&*value))
    }

    /// Whether the computed has ever produced a value.
    pub fn has_value(&self) -> bool {
        self.inner().value.borrow().is_some()
    }

    /// Current freshness state.
    pub fn state(&self) -> NodeState {
        self.inner()
            .runtime
            .state(self.inner().id)
            .unwrap_or(NodeState::Dirty)
    }

    /// Number of nodes that read this computed in their last evaluation.
    pub fn subscriber_count(&self) -> usize {
        self.inner().runtime.subscriber_count(self.inner().id)
    }

    /// Number of inputs read by the last computation.
    pub fn subscription_count(&self) -> usize {
        self.inner().runtime.subscription_count(self.inner().id)
    }

    /// Detach from every input and mark DIRTY. Inputs left unobserved are
    /// detached in turn. The next read recomputes.
    pub fn destroy(&self) {
        self.inner().runtime.detach(self.inner().id);
    }
}

impl<T: 'static> Derivation for ComputedInner<T> {
    fn recompute(&self) -> Result<bool> {
        let next = self.runtime.evaluate_as(self.id, || (self.compute)())?;

        let current = self.value.borrow().clone();
        let changed = match (current, &self.equality) {
            (Some(current), Some(equal)) => !self.runtime.untracked(|| equal(&*current, &next)),
            _ => true,
        };

        if changed {
            let previous = self.value.replace(Some(Rc::new(next)));
            drop(previous);
        }
        Ok(changed)
    }
}

impl<T: 'static> Drop for Handle<T> {
    fn drop(&mut self) {
        self.0.runtime.release(self.0.id);
    }
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            handle: Rc::clone(&self.handle),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner().id)
            .field("state", &self.state())
            .field("value", &self.inner().value.borrow().as_deref())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
