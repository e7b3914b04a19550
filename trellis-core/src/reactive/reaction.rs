//! Reaction Implementation
//!
//! A Reaction is a side-effecting computation that runs whenever its inputs
//! change.
//!
//! # How Reactions Work
//!
//! 1. When created, the reaction is scheduled. Outside a transaction it runs
//!    before the constructor returns, establishing its initial inputs.
//!
//! 2. When an input changes, the reaction is queued (at most once per
//!    flush) and runs when the outermost transaction closes.
//!
//! 3. Each run drops the old inputs and records new ones, so conditional
//!    reads are tracked exactly.
//!
//! 4. A reaction queued only because something upstream *might* have
//!    changed first brings the computeds it read up to date, and skips the
//!    run if none of them really changed.
//!
//! # Managers
//!
//! A reaction may carry a manager. Scheduled runs are then handed to the
//! manager instead, which decides if and when to call [`Reaction::run`].
//! This is how deferral, debouncing or throttling are layered on top.
//!
//! # Lifetime
//!
//! The graph owns every reaction, so dropping its handles does not stop it.
//! A reaction lives until [`Reaction::destroy`] is called, after which it
//! never runs again and its node is reclaimed.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use super::runtime::Runtime;
use super::subscriber::Scheduled;
use crate::error::Result;
use crate::graph::{Behavior, Node, NodeId, NodeState};

pub(crate) type Body = Box<dyn Fn() -> Result<()>>;

/// Replaces direct execution of a scheduled reaction.
pub type Manager = Box<dyn Fn(&Reaction) -> Result<()>>;

/// A side-effecting computation that re-runs when its inputs change.
///
/// # Example
///
/// ```rust,ignore
/// let count = Observable::new(0);
///
/// let logger = {
///     let count = count.clone();
///     Reaction::new(move || {
///         println!("Count is: {}", count.get());
///         Ok(())
///     })
/// };
///
/// count.set(5)?;  // Prints: "Count is: 5"
/// ```
#[derive(Clone)]
pub struct Reaction {
    inner: Rc<ReactionInner>,
}

struct ReactionInner {
    runtime: Runtime,
    id: NodeId,
    body: Body,
    manager: Option<Manager>,
    disposed: Cell<bool>,
    run_count: Cell<usize>,
}

impl Reaction {
    /// Create a reaction on the thread's default runtime.
    pub fn new<F>(body: F) -> Self
    where
        F: Fn() -> Result<()> + 'static,
    {
        Runtime::current().reaction(body)
    }

    /// Create a managed reaction on the thread's default runtime.
    pub fn with_manager<F, M>(body: F, manager: M) -> Self
    where
        F: Fn() -> Result<()> + 'static,
        M: Fn(&Reaction) -> Result<()> + 'static,
    {
        Runtime::current().reaction_with_manager(body, manager)
    }

    pub(crate) fn create(runtime: Runtime, body: Body, manager: Option<Manager>) -> Self {
        let id = runtime.register(Node::reaction());
        let inner = Rc::new(ReactionInner {
            runtime,
            id,
            body,
            manager,
            disposed: Cell::new(false),
            run_count: Cell::new(0),
        });

        let scheduled: Rc<dyn Scheduled> = inner.clone();
        let runtime = &inner.runtime;
        runtime.attach(id, Behavior::Reaction(scheduled));
        runtime.schedule_reaction(id);

        // The flush has already logged every failure it saw.
        if let Err(error) = runtime.flush_if_idle() {
            debug!(reaction = %id, %error, "initial flush failed");
        }
        Self { inner }
    }

    /// This reaction's node id.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// The runtime this reaction belongs to.
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Run the body now, re-recording its inputs.
    ///
    /// The run is its own transaction: writes made by the body are batched
    /// and, unless a transaction is already open, flushed before this
    /// returns. Errors from the body come first, then flush errors.
    /// Does nothing once the reaction is destroyed.
    pub fn run(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.disposed.get() {
            return Ok(());
        }
        inner.run_count.set(inner.run_count.get() + 1);
        inner.runtime.run_reaction(inner.id, || (inner.body)())
    }

    /// Stop reacting and release the node. Inputs left unobserved are
    /// detached in turn.
    pub fn destroy(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        debug!(reaction = %self.inner.id, "destroying reaction");
        self.inner.runtime.dispose(self.inner.id);
    }

    /// Whether [`destroy`](Self::destroy) was called.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// How many times the body has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    /// Current scheduling state.
    pub fn state(&self) -> NodeState {
        self.inner
            .runtime
            .state(self.inner.id)
            .unwrap_or(NodeState::Dirty)
    }

    /// Number of inputs read by the last run.
    pub fn subscription_count(&self) -> usize {
        self.inner.runtime.subscription_count(self.inner.id)
    }
}

impl Scheduled for ReactionInner {
    fn run_scheduled(self: Rc<Self>) -> Result<()> {
        if self.disposed.get() {
            return Ok(());
        }
        let reaction = Reaction { inner: self };
        match &reaction.inner.manager {
            Some(manager) => {
                reaction.inner.runtime.discard_subscriptions(reaction.inner.id);
                manager(&reaction)
            }
            None => reaction.run(),
        }
    }
}

impl fmt::Debug for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaction")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("run_count", &self.run_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn reaction_runs_on_creation() {
        let runtime = Runtime::new();
        let reaction = runtime.reaction(|| Ok(()));
        assert_eq!(reaction.run_count(), 1);
        assert_eq!(reaction.state(), NodeState::Clean);
    }

    #[test]
    fn reaction_reruns_on_change() {
        let runtime = Runtime::new();
        let source = runtime.observable(0);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let log = seen.clone();
        let reader = source.clone();
        let reaction = runtime.reaction(move || {
            log.borrow_mut().push(reader.get());
            Ok(())
        });

        source.set(1).unwrap();
        source.set(2).unwrap();
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
        assert_eq!(reaction.run_count(), 3);
        assert_eq!(reaction.subscription_count(), 1);
    }

    #[test]
    fn destroyed_reaction_never_runs() {
        let runtime = Runtime::new();
        let source = runtime.observable(0);
        let reader = source.clone();
        let reaction = runtime.reaction(move || {
            reader.get();
            Ok(())
        });

        reaction.destroy();
        assert!(reaction.is_disposed());
        assert_eq!(source.subscriber_count(), 0);

        source.set(1).unwrap();
        reaction.run().unwrap();
        assert_eq!(reaction.run_count(), 1);
    }

    #[test]
    fn unbound_reactions_keep_running() {
        let runtime = Runtime::new();
        let source = runtime.observable(0);
        let runs = Rc::new(Cell::new(0));

        let (reader, counter) = (source.clone(), runs.clone());
        runtime.reaction(move || {
            reader.get();
            counter.set(counter.get() + 1);
            Ok(())
        });
        assert_eq!(runs.get(), 1);

        source.set(1).unwrap();
        assert_eq!(runs.get(), 2);
        assert_eq!(source.subscriber_count(), 1);
        assert_eq!(runtime.stats().reactions, 1);
    }

    #[test]
    fn destroy_from_inside_the_body() {
        let runtime = Runtime::new();
        let source = runtime.observable(0);
        let slot: Rc<RefCell<Option<Reaction>>> = Rc::new(RefCell::new(None));

        let (reader, this) = (source.clone(), slot.clone());
        let reaction = runtime.reaction(move || {
            if reader.get() > 0 {
                if let Some(reaction) = this.borrow_mut().take() {
                    reaction.destroy();
                }
            }
            Ok(())
        });
        *slot.borrow_mut() = Some(reaction.clone());

        source.set(1).unwrap();
        assert!(reaction.is_disposed());
        assert_eq!(reaction.state(), NodeState::Dirty);
        assert_eq!(runtime.stats().reactions, 0);

        source.set(2).unwrap();
        assert_eq!(reaction.run_count(), 2);
    }

    #[test]
    fn conditional_reads_switch_inputs() {
        let runtime = Runtime::new();
        let use_left = runtime.observable(true);
        let left = runtime.observable("left");
        let right = runtime.observable("right");
        let seen = Rc::new(RefCell::new(Vec::new()));

        let reaction = {
            let (use_left, left, right, log) =
                (use_left.clone(), left.clone(), right.clone(), seen.clone());
            runtime.reaction(move || {
                let value = if use_left.get() { left.get() } else { right.get() };
                log.borrow_mut().push(value);
                Ok(())
            })
        };
        assert_eq!(right.subscriber_count(), 0);

        use_left.set(false).unwrap();
        assert_eq!(left.subscriber_count(), 0);
        assert_eq!(right.subscriber_count(), 1);

        left.set("ignored").unwrap();
        assert_eq!(reaction.run_count(), 2);
        assert_eq!(*seen.borrow(), vec!["left", "right"]);
    }

    #[test]
    fn writes_before_reads_do_not_self_schedule() {
        let runtime = Runtime::new();
        let source = runtime.observable(0);
        let handle = source.clone();
        let reaction = runtime.reaction(move || {
            handle.set(5)?;
            handle.get();
            Ok(())
        });

        assert_eq!(reaction.run_count(), 1);
        assert_eq!(source.get(), 5);
    }

    #[test]
    fn manager_decides_when_to_run() {
        let runtime = Runtime::new();
        let source = runtime.observable(0);
        let deferred: Rc<RefCell<Vec<Reaction>>> = Rc::new(RefCell::new(Vec::new()));

        let queue = deferred.clone();
        let reader = source.clone();
        let reaction = runtime.reaction_with_manager(
            move || {
                reader.get();
                Ok(())
            },
            move |reaction| {
                queue.borrow_mut().push(reaction.clone());
                Ok(())
            },
        );
        assert_eq!(reaction.run_count(), 0);
        assert_eq!(deferred.borrow().len(), 1);

        let pending: Vec<Reaction> = deferred.borrow_mut().drain(..).collect();
        for reaction in pending {
            reaction.run().unwrap();
        }
        assert_eq!(reaction.run_count(), 1);
        assert_eq!(source.subscriber_count(), 1);

        source.set(1).unwrap();
        assert_eq!(reaction.run_count(), 1);
        assert_eq!(deferred.borrow().len(), 1);
        assert_eq!(source.subscriber_count(), 0);

        deferred.borrow_mut().clear();
    }

    #[test]
    fn body_errors_are_returned_from_run() {
        let runtime = Runtime::new();
        let fail = Rc::new(Cell::new(false));
        let flag = fail.clone();
        let reaction = runtime.reaction(move || {
            if flag.get() {
                return Err(crate::ReactiveError::user("boom"));
            }
            Ok(())
        });

        fail.set(true);
        assert!(reaction.run().unwrap_err().is_user());
        assert_eq!(reaction.run_count(), 2);
        assert_eq!(reaction.state(), NodeState::Clean);
    }
}
