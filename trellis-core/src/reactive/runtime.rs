//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects observables,
//! computeds and reactions. It owns the dependency graph, the tracking
//! context, the transaction depth and the schedule.
//!
//! # How It Works
//!
//! 1. Reading an observable or computed while a computed or reaction is
//!    evaluating records an edge between the two.
//!
//! 2. Writing an observable pushes dirty / maybe-dirty flags down the graph
//!    synchronously. Computeds are only flagged; reactions are queued.
//!
//! 3. When the outermost transaction closes (a bare `set` is its own
//!    transaction), queued reactions run, last scheduled first. Each one
//!    pulls fresh values out of the computeds it reads, which recompute
//!    only if an input really changed. Computeds left without subscribers
//!    are then detached from their inputs.
//!
//! # Isolation
//!
//! Every [`Runtime`] is an independent graph. Handles created by one never
//! track reads made under another. The convenience constructors
//! ([`Observable::new`](super::Observable::new) and friends) and the free
//! functions [`transaction`](super::transaction), [`action`](super::action)
//! and [`untracked`](super::untracked) use a per-thread default runtime.
//!
//! # Thread Safety
//!
//! None, on purpose. The runtime is `!Send` and `!Sync`: all state changes
//! are synchronous re-entrant calls on one thread.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use super::computed::Computed;
use super::context::{DepthGuard, FlagGuard, TrackingScope};
use super::observable::Observable;
use super::options::Options;
use super::reaction::{Manager, Reaction};
use super::subscriber::{Derivation, Scheduled};
use crate::config::RuntimeConfig;
use crate::error::{ReactiveError, Result};
use crate::graph::{Behavior, Graph, GraphStats, Node, NodeId, NodeKind, NodeState};

thread_local! {
    static DEFAULT_RUNTIME: Runtime = Runtime::new();
}

/// Handle to a reactive graph. Cheap to clone; clones share the graph.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

struct RuntimeInner {
    graph: RefCell<Graph>,
    /// The computed or reaction currently evaluating, if any.
    tracker: Cell<Option<NodeId>>,
    /// Open transactions.
    depth: Cell<usize>,
    /// Computeds currently evaluating.
    computing: Cell<usize>,
    flushing: Cell<bool>,
    config: RuntimeConfig,
}

impl Runtime {
    /// Create an isolated runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create an isolated runtime.
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                graph: RefCell::new(Graph::new(config.min_subscriber_capacity)),
                tracker: Cell::new(None),
                depth: Cell::new(0),
                computing: Cell::new(0),
                flushing: Cell::new(false),
                config,
            }),
        }
    }

    /// The default runtime of the calling thread.
    pub fn current() -> Self {
        DEFAULT_RUNTIME.with(Runtime::clone)
    }

    /// The configuration this runtime was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------
    // Factories
    // ------------------------------------------------------------------

    /// Create an observable without equality gating.
    pub fn observable<T: 'static>(&self, value: T) -> Observable<T> {
        self.observable_with(value, Options::new())
    }

    /// Create an observable.
    pub fn observable_with<T: 'static>(&self, value: T, options: Options<T>) -> Observable<T> {
        Observable::create(self.clone(), value, options)
    }

    /// Create a computed without equality gating. It is not evaluated until
    /// first read.
    pub fn computed<T, F>(&self, compute: F) -> Computed<T>
    where
        T: 'static,
        F: Fn() -> Result<T> + 'static,
    {
        self.computed_with(compute, Options::new())
    }

    /// Create a computed.
    pub fn computed_with<T, F>(&self, compute: F, options: Options<T>) -> Computed<T>
    where
        T: 'static,
        F: Fn() -> Result<T> + 'static,
    {
        Computed::create(self.clone(), Box::new(compute), options)
    }

    /// Create a reaction. It is scheduled immediately, so outside a
    /// transaction it runs once before this returns.
    pub fn reaction<F>(&self, body: F) -> Reaction
    where
        F: Fn() -> Result<()> + 'static,
    {
        Reaction::create(self.clone(), Box::new(body), None)
    }

    /// Create a reaction whose scheduled runs go through `manager`.
    ///
    /// The manager receives the reaction and decides if and when to call
    /// [`Reaction::run`], e.g. to debounce. The first run still happens
    /// through the manager.
    pub fn reaction_with_manager<F, M>(&self, body: F, manager: M) -> Reaction
    where
        F: Fn() -> Result<()> + 'static,
        M: Fn(&Reaction) -> Result<()> + 'static,
    {
        let manager: Manager = Box::new(manager);
        Reaction::create(self.clone(), Box::new(body), Some(manager))
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Run `f` as a transaction: reactions scheduled inside it run once,
    /// when the outermost transaction closes.
    ///
    /// An error from `f` wins over an error from the flush.
    pub fn transaction<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let result = {
            let _transaction = DepthGuard::enter(&self.inner.depth);
            f()
        };
        let flushed = self.flush_if_idle();
        let value = result?;
        flushed?;
        Ok(value)
    }

    /// Run `f` as a transaction with dependency tracking suppressed.
    ///
    /// Reads inside an action never become dependencies of an enclosing
    /// computation.
    pub fn action<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let _scope = TrackingScope::enter(&self.inner.tracker, None);
        self.transaction(f)
    }

    /// Wrap `f` so every call runs as an [`action`](Self::action).
    pub fn action_fn<R, F>(&self, f: F) -> impl Fn() -> Result<R>
    where
        F: Fn() -> Result<R>,
    {
        let runtime = self.clone();
        move || runtime.action(&f)
    }

    /// Run `f` with dependency tracking suppressed. Does not open a
    /// transaction.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _scope = TrackingScope::enter(&self.inner.tracker, None);
        f()
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Whether reads are currently being recorded.
    pub fn is_tracking(&self) -> bool {
        self.inner.tracker.get().is_some()
    }

    /// The computed or reaction currently evaluating, if tracked.
    pub fn current_evaluator(&self) -> Option<NodeId> {
        self.inner.tracker.get()
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.inner.depth.get() > 0
    }

    /// Graph size and pending work.
    pub fn stats(&self) -> GraphStats {
        self.graph().stats()
    }

    /// Whether two handles refer to the same runtime.
    pub fn same(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------
    // Graph plumbing used by the handles
    // ------------------------------------------------------------------

    fn graph(&self) -> Ref<'_, Graph> {
        self.inner.graph.borrow()
    }

    fn graph_mut(&self) -> RefMut<'_, Graph> {
        self.inner.graph.borrow_mut()
    }

    pub(crate) fn register(&self, node: Node) -> NodeId {
        self.graph_mut().insert(node)
    }

    pub(crate) fn attach(&self, id: NodeId, behavior: Behavior) {
        self.graph_mut().set_behavior(id, behavior);
    }

    /// Called when the last handle of `id` drops. The node stays in the
    /// graph for as long as something still reads it.
    pub(crate) fn release(&self, id: NodeId) {
        {
            let Ok(mut graph) = self.inner.graph.try_borrow_mut() else {
                warn!(node = %id, "graph busy while releasing node; slot leaked");
                return;
            };
            graph.disown(id);
            if self.is_idle() {
                graph.drain_checks();
            }
        }
        self.bury();
    }

    /// Drop nodes the graph has reclaimed. Their behaviors own host
    /// closures, whose captured handles may release more nodes in turn.
    fn bury(&self) {
        loop {
            let dead = self.graph_mut().take_reclaimed();
            if dead.is_empty() {
                return;
            }
            drop(dead);
        }
    }

    pub(crate) fn state(&self, id: NodeId) -> Option<NodeState> {
        self.graph().state(id)
    }

    pub(crate) fn subscriber_count(&self, id: NodeId) -> usize {
        self.graph().subscriber_count(id)
    }

    pub(crate) fn subscription_count(&self, id: NodeId) -> usize {
        self.graph().subscription_count(id)
    }

    pub(crate) fn schedule_reaction(&self, id: NodeId) {
        self.graph_mut().schedule_mut().push_reaction(id);
    }

    /// Record a read of `id` by the current evaluator, if any.
    pub(crate) fn report_read(&self, id: NodeId) {
        if let Some(current) = self.inner.tracker.get() {
            self.graph_mut().link(current, id);
        }
    }

    /// Writes are illegal while any computed is evaluating.
    pub(crate) fn guard_mutation(&self, id: NodeId) -> Result<()> {
        if self.inner.computing.get() > 0 {
            return Err(ReactiveError::IllegalMutation(id));
        }
        Ok(())
    }

    /// Broadcast a committed observable change and flush if idle.
    pub(crate) fn notify_changed(&self, id: NodeId) -> Result<()> {
        self.graph_mut().drain_and_notify(id);
        self.flush_if_idle()
    }

    /// Run `f` as the evaluation of computed `id`.
    pub(crate) fn evaluate_as<R>(&self, id: NodeId, f: impl FnOnce() -> R) -> R {
        let _computing = DepthGuard::enter(&self.inner.computing);
        let _scope = TrackingScope::enter(&self.inner.tracker, Some(id));
        f()
    }

    /// Drop a node's subscriptions and mark it dirty, then run the
    /// disposal checks this may have queued.
    pub(crate) fn detach(&self, id: NodeId) {
        {
            let mut graph = self.graph_mut();
            graph.discard_subscriptions(id);
            graph.set_state(id, NodeState::Dirty);
            graph.drain_checks();
        }
        self.bury();
    }

    /// Remove reaction `id` from the graph for good, then run the disposal
    /// checks this queued.
    pub(crate) fn dispose(&self, id: NodeId) {
        {
            let mut graph = self.graph_mut();
            graph.reclaim(id);
            graph.drain_checks();
        }
        self.bury();
    }

    /// Discard a node's subscriptions without touching its state.
    pub(crate) fn discard_subscriptions(&self, id: NodeId) {
        self.graph_mut().discard_subscriptions(id);
    }

    // ------------------------------------------------------------------
    // Pull: bringing computeds up to date
    // ------------------------------------------------------------------

    /// Make computed `id` fresh, recomputing if an input really changed.
    pub(crate) fn actualize(&self, id: NodeId) -> Result<()> {
        let state = self.graph().state(id);
        match state {
            None => return Ok(()),
            Some(NodeState::Computing) => return Err(ReactiveError::ReentrantRead(id)),
            Some(NodeState::MaybeDirty) => self.resolve_maybe_dirty(id)?,
            Some(_) => {}
        }

        let state = self.graph().state(id);
        if state == Some(NodeState::Dirty) {
            self.recompute(id)
        } else {
            Ok(())
        }
    }

    /// Actualize the upstream computeds of a maybe-dirty node, in read
    /// order. An upstream that really changed dirties `id` through the
    /// normal notification path; the walk stops there. If none did, `id`
    /// settles CLEAN.
    fn resolve_maybe_dirty(&self, id: NodeId) -> Result<()> {
        let upstream = self.graph().subscriptions(id);
        for target in upstream {
            let kind = self.graph().kind(target);
            if kind == Some(NodeKind::Computed) {
                self.actualize(target)?;
            }
            let state = self.graph().state(id);
            if state == Some(NodeState::Dirty) {
                return Ok(());
            }
        }

        let mut graph = self.graph_mut();
        if graph.state(id) == Some(NodeState::MaybeDirty) {
            graph.set_state(id, NodeState::Clean);
        }
        Ok(())
    }

    fn recompute(&self, id: NodeId) -> Result<()> {
        let behavior = self.graph().behavior(id);
        let Behavior::Computed(derivation) = behavior else {
            return Ok(());
        };

        {
            let mut graph = self.graph_mut();
            graph.discard_subscriptions(id);
            graph.set_state(id, NodeState::Computing);
        }
        trace!(node = %id, "recomputing");

        let outcome = derivation.recompute();

        let mut graph = self.graph_mut();
        match outcome {
            Ok(true) => {
                graph.drain_and_notify(id);
                Ok(())
            }
            Ok(false) => {
                trace!(node = %id, "recomputed to an equal value");
                graph.set_state(id, NodeState::Clean);
                Ok(())
            }
            Err(error) => {
                graph.set_state(id, NodeState::Dirty);
                Err(error)
            }
        }
    }

    // ------------------------------------------------------------------
    // Push: running reactions
    // ------------------------------------------------------------------

    /// Run reaction `id` with `body` as its evaluation.
    ///
    /// The reaction is marked CLEAN before the body runs, so writes the
    /// body makes to inputs it has not read yet do not re-schedule it. A
    /// failing body leaves the reaction CLEAN with whatever it read before
    /// failing, so a later change to those inputs runs it again.
    pub(crate) fn run_reaction(&self, id: NodeId, body: impl FnOnce() -> Result<()>) -> Result<()> {
        self.graph_mut().discard_subscriptions(id);

        let result = {
            let _transaction = DepthGuard::enter(&self.inner.depth);
            let _scope = TrackingScope::enter(&self.inner.tracker, Some(id));
            self.graph_mut().set_state(id, NodeState::Clean);
            trace!(reaction = %id, "running");
            body()
        };

        let flushed = self.flush_if_idle();
        result.and(flushed)
    }

    /// Run a reaction popped off the schedule.
    fn run_scheduled(&self, id: NodeId) -> Result<()> {
        let Some(mut state) = self.graph().state(id) else {
            return Ok(());
        };

        if state == NodeState::MaybeDirty {
            if let Err(error) = self.resolve_maybe_dirty(id) {
                // Let the body observe the failure itself.
                debug!(reaction = %id, %error, "upstream failed while resolving; running anyway");
                self.graph_mut().set_state(id, NodeState::Dirty);
            }
            state = self.graph().state(id).unwrap_or(NodeState::Clean);
        }
        if state != NodeState::Dirty {
            return Ok(());
        }

        let behavior = self.graph().behavior(id);
        let Behavior::Reaction(reaction) = behavior else {
            return Ok(());
        };
        reaction.run_scheduled()
    }

    fn is_idle(&self) -> bool {
        self.inner.depth.get() == 0 && self.inner.computing.get() == 0 && !self.inner.flushing.get()
    }

    /// Flush unless a transaction is open or a computed is evaluating.
    pub(crate) fn flush_if_idle(&self) -> Result<()> {
        if self.inner.depth.get() > 0 || self.inner.computing.get() > 0 {
            return Ok(());
        }
        self.flush()
    }

    /// Drain the schedule to a fixed point.
    ///
    /// Reactions run last-scheduled first. A failing reaction does not stop
    /// the flush: the rest still run, every failure is logged, and the first
    /// one is returned. Re-entrant calls (from reactions closing their own
    /// implicit transactions) return at once; the outer loop picks up
    /// whatever they scheduled.
    fn flush(&self) -> Result<()> {
        let Some(_flushing) = FlagGuard::try_raise(&self.inner.flushing) else {
            return Ok(());
        };

        let limit = self.inner.config.max_reaction_runs;
        let mut runs = 0;
        let mut first_error = None;

        loop {
            let next = self.graph_mut().schedule_mut().pop_reaction();
            if let Some(id) = next {
                if runs == limit {
                    self.schedule_reaction(id);
                    warn!(limit, "reaction flush exceeded its run budget");
                    return Err(ReactiveError::RunawayFlush { limit });
                }
                runs += 1;
                if let Err(error) = self.run_scheduled(id) {
                    warn!(reaction = %id, %error, "reaction failed");
                    first_error.get_or_insert(error);
                }
                continue;
            }

            let check = self.graph_mut().schedule_mut().pop_check();
            match check {
                Some(id) => {
                    self.graph_mut().check_subscribers(id);
                    self.bury();
                }
                None => break,
            }
        }

        if runs > 0 {
            trace!(runs, "flush complete");
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("depth", &self.inner.depth.get())
            .field("tracking", &self.inner.tracker.get())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn runtimes_are_isolated() {
        let a = Runtime::new();
        let b = Runtime::new();

        let source = a.observable(1);
        let _reader = b.reaction(move || {
            source.get();
            Ok(())
        });

        assert!(!a.same(&b));
        assert_eq!(a.stats().edges, 0);
        assert_eq!(b.stats().edges, 0);
    }

    #[test]
    fn current_runtime_is_shared_per_thread() {
        assert!(Runtime::current().same(&Runtime::current()));
    }

    #[test]
    fn transaction_depth_is_tracked() {
        let runtime = Runtime::new();
        assert!(!runtime.in_transaction());

        runtime
            .transaction(|| {
                assert!(runtime.in_transaction());
                runtime.transaction(|| {
                    assert!(runtime.in_transaction());
                    Ok(())
                })
            })
            .unwrap();

        assert!(!runtime.in_transaction());
    }

    #[test]
    fn transaction_closes_on_error() {
        let runtime = Runtime::new();
        let result: Result<()> = runtime.transaction(|| Err(ReactiveError::user("nope")));
        assert!(result.unwrap_err().is_user());
        assert!(!runtime.in_transaction());
    }

    #[test]
    fn untracked_and_action_suppress_tracking() {
        let runtime = Runtime::new();
        let tracked = Rc::new(Cell::new(None));

        let seen = tracked.clone();
        let inner = runtime.clone();
        let reaction = runtime.reaction(move || {
            let during_untracked = inner.untracked(|| inner.is_tracking());
            let during_action = inner.action(|| Ok(inner.is_tracking()))?;
            seen.set(Some((inner.is_tracking(), during_untracked, during_action)));
            Ok(())
        });

        assert_eq!(tracked.get(), Some((true, false, false)));
        assert_eq!(reaction.run_count(), 1);
        assert!(!runtime.is_tracking());
    }

    #[test]
    fn action_fn_batches_every_call() {
        let runtime = Runtime::new();
        let source = runtime.observable(0);
        let runs = Rc::new(Cell::new(0));

        let counter = runs.clone();
        let reader = source.clone();
        let _reaction = runtime.reaction(move || {
            reader.get();
            counter.set(counter.get() + 1);
            Ok(())
        });

        let writer = source.clone();
        let bump_twice = runtime.action_fn(move || {
            writer.update(|v| v + 1)?;
            writer.update(|v| v + 1)
        });

        bump_twice().unwrap();
        bump_twice().unwrap();

        assert_eq!(source.get(), 4);
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn stats_count_nodes_and_edges() {
        let runtime = Runtime::new();
        let source = runtime.observable(2);
        let doubled = {
            let source = source.clone();
            runtime.computed(move || Ok(source.get() * 2))
        };
        let reaction = {
            let doubled = doubled.clone();
            runtime.reaction(move || doubled.get().map(drop))
        };

        let stats = runtime.stats();
        assert_eq!(stats.observables, 1);
        assert_eq!(stats.computeds, 1);
        assert_eq!(stats.reactions, 1);
        assert_eq!(stats.edges, 2);
        assert_eq!(stats.pending_reactions, 0);

        // Dropping a handle does not stop a reaction.
        let id = reaction.id();
        let kept = reaction.clone();
        drop(reaction);
        assert_eq!(runtime.stats().reactions, 1);
        assert_eq!(runtime.state(id), Some(NodeState::Clean));

        kept.destroy();
        let stats = runtime.stats();
        assert_eq!(stats.reactions, 0);
        assert_eq!(stats.edges, 0);
    }

    #[test]
    fn destroy_releases_the_graph_reference() {
        let runtime = Runtime::new();
        let source = runtime.observable(2);
        let doubled = {
            let source = source.clone();
            runtime.computed(move || Ok(source.get() * 2))
        };
        let reaction = {
            let doubled = doubled.clone();
            runtime.reaction(move || doubled.get().map(drop))
        };

        drop(doubled);
        drop(source);
        let stats = runtime.stats();
        assert_eq!(stats.observables, 1);
        assert_eq!(stats.computeds, 1);
        assert_eq!(stats.edges, 2);

        // The body still holds `doubled` until the last handle goes.
        reaction.destroy();
        assert_eq!(runtime.stats().reactions, 0);
        assert_eq!(runtime.stats().edges, 0);
        drop(reaction);
        assert_eq!(runtime.stats(), GraphStats::default());
    }
}
