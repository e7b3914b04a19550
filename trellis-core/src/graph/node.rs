//! Graph Nodes
//!
//! This module defines the node records that live in the dependency graph
//! arena, along with their identity and freshness state.

use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use super::identity_set::IdentitySet;
use crate::reactive::{Derivation, Scheduled};

/// Handle to a node slot in a graph arena.
///
/// The generation distinguishes a live node from an earlier occupant of the
/// same slot, so stale ids held by edges or queues resolve to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index in the arena.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when this id was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }

}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A mutable cell. Has subscribers, never subscriptions.
    Observable,

    /// A memoized derivation. Has both subscribers and subscriptions.
    Computed,

    /// A side-effecting leaf. Has subscriptions, never subscribers.
    Reaction,
}

/// Freshness state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// The value is valid and no input is stale.
    Clean,

    /// An upstream computed might have changed; not yet resolved.
    MaybeDirty,

    /// The value is stale and must be recomputed before the next read.
    Dirty,

    /// The node is broadcasting a change; its subscriber set is being
    /// consumed and must not be mutated.
    Notifying,

    /// The node is re-evaluating; reading it now is a cycle.
    Computing,
}

/// Host-side behavior a node calls back into.
///
/// The graph owns computeds and reactions through this pointer: a computed
/// that is still read by someone outlives its handles, and a reaction lives
/// until it is destroyed.
#[derive(Clone, Default)]
pub(crate) enum Behavior {
    /// Observables carry no behavior; their value lives in the handle.
    #[default]
    Inert,
    Computed(Rc<dyn Derivation>),
    Reaction(Rc<dyn Scheduled>),
}

/// A node in the dependency graph.
pub(crate) struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) state: NodeState,
    /// Whether changes are gated by an equality predicate.
    pub(crate) checks_value: bool,
    /// Nodes that read this one during their last evaluation.
    pub(crate) subscribers: IdentitySet<NodeId>,
    /// Largest subscriber count seen this cycle.
    pub(crate) max_subscribers: usize,
    /// Nodes this one read during its last evaluation, in read order.
    pub(crate) subscriptions: SmallVec<[NodeId; 4]>,
    pub(crate) behavior: Behavior,
    /// Whether a handle still refers to this node.
    pub(crate) owned: bool,
}

impl Node {
    fn new(kind: NodeKind, state: NodeState, checks_value: bool) -> Self {
        Self {
            kind,
            state,
            checks_value,
            subscribers: IdentitySet::new(),
            max_subscribers: 0,
            subscriptions: SmallVec::new(),
            behavior: Behavior::Inert,
            owned: true,
        }
    }

    /// A clean observable.
    pub(crate) fn observable(checks_value: bool) -> Self {
        Self::new(NodeKind::Observable, NodeState::Clean, checks_value)
    }

    /// A computed that has never run.
    pub(crate) fn computed(checks_value: bool) -> Self {
        Self::new(NodeKind::Computed, NodeState::Dirty, checks_value)
    }

    /// A reaction that still has to run once.
    pub(crate) fn reaction() -> Self {
        Self::new(NodeKind::Reaction, NodeState::Dirty, false)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("checks_value", &self.checks_value)
            .field("subscribers", &self.subscribers.size())
            .field("subscriptions", &self.subscriptions.len())
            .field("owned", &self.owned)
            .finish()
    }
}
