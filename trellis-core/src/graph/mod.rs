//! Dependency Graph
//!
//! This module holds the arena of nodes and every piece of graph logic that
//! does not call back into host code: wiring edges, the dirty and
//! maybe-dirty notification protocol, the schedule, and disposal checks.
//!
//! # Overview
//!
//! Nodes are observables, computeds and reactions. Edges are kept on both
//! ends: a node's `subscriptions` list what it read during its last
//! evaluation, and a node's `subscribers` list who read it. Both sides are
//! rebuilt from scratch on every evaluation, so the graph follows whatever
//! the code actually read last time rather than a static declaration.
//!
//! # Notification
//!
//! A change walks downward synchronously:
//!
//! - [`Graph::drain_and_notify`] empties a node's subscriber set, clearing
//!   each slot as it is visited, and sends each subscriber a dirty signal.
//! - A computed with an equality check cannot know yet whether its own
//!   value will change, so a dirty signal makes it forward *maybe-dirty*
//!   instead. Maybe-dirty is forwarded without consuming subscriber sets.
//! - Reactions never run here; they are pushed onto the [`Schedule`].
//!
//! Propagation is gated on the CLEAN state, so every node receives at most
//! one effective signal per pass.
//!
//! # Design Decisions
//!
//! 1. Nodes live in a generational arena and edges store [`NodeId`]s. A
//!    freed slot bumps its generation, so ids left behind in queues or in
//!    other nodes' edge lists simply stop resolving.
//!
//! 2. Nothing in this module runs host code. The runtime can therefore hold
//!    one mutable borrow of the graph for a whole notification pass.

mod identity_set;
mod node;
mod scheduler;

pub use identity_set::IdentitySet;
pub use node::{NodeId, NodeKind, NodeState};
pub use scheduler::Schedule;

pub(crate) use node::{Behavior, Node};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::config::DEFAULT_MIN_SUBSCRIBER_CAPACITY;

/// A snapshot of graph size and pending work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    /// Live observable nodes.
    pub observables: usize,
    /// Live computed nodes.
    pub computeds: usize,
    /// Live reaction nodes.
    pub reactions: usize,
    /// Subscription edges across all nodes.
    pub edges: usize,
    /// Reactions waiting for the next flush.
    pub pending_reactions: usize,
    /// Computeds waiting for a disposal check.
    pub pending_checks: usize,
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Arena of nodes plus the deferred-work schedule.
pub(crate) struct Graph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    schedule: Schedule,
    min_capacity: usize,
    /// Removed nodes whose behaviors still have to be dropped. Dropping
    /// them can release handles, so the runtime does it outside its borrow.
    reclaimed: Vec<Node>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SUBSCRIBER_CAPACITY)
    }
}

impl Graph {
    pub(crate) fn new(min_capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            schedule: Schedule::new(),
            min_capacity,
            reclaimed: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Arena
    // ------------------------------------------------------------------

    pub(crate) fn insert(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeId::new(index, slot.generation)
            }
            None => {
                let index = u32::try_from(self.slots.len()).expect("node arena exhausted");
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId::new(index, 0)
            }
        }
    }

    /// Detach every edge of `id` and free its slot.
    fn remove(&mut self, id: NodeId) -> Option<Node> {
        self.node(id)?;
        self.discard_subscriptions(id);

        let slot = &mut self.slots[id.index() as usize];
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index());

        for subscriber in node.subscribers.iter() {
            if let Some(downstream) = self.node_mut(subscriber) {
                downstream.subscriptions.retain(|upstream| *upstream != id);
            }
        }
        debug!(node = %id, kind = ?node.kind, "node reclaimed");
        Some(node)
    }

    /// The last handle of `id` was dropped. The node is reclaimed now if
    /// nothing reads it, otherwise once its last subscriber leaves.
    /// Reactions are only reclaimed through [`Graph::reclaim`].
    pub(crate) fn disown(&mut self, id: NodeId) {
        let Some(node) = self.node_mut(id) else {
            return;
        };
        node.owned = false;
        if node.kind != NodeKind::Reaction && node.subscribers.is_empty() {
            self.reclaim(id);
        }
    }

    /// Remove `id` and park it until [`Graph::take_reclaimed`].
    pub(crate) fn reclaim(&mut self, id: NodeId) {
        if let Some(node) = self.remove(id) {
            self.reclaimed.push(node);
        }
    }

    pub(crate) fn take_reclaimed(&mut self) -> Vec<Node> {
        std::mem::take(&mut self.reclaimed)
    }

    pub(crate) fn node(&self, id: NodeId) -> Option<&Node> {
        let slot = self.slots.get(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.node.as_ref()
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.node.as_mut()
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub(crate) fn state(&self, id: NodeId) -> Option<NodeState> {
        self.node(id).map(|node| node.state)
    }

    pub(crate) fn set_state(&mut self, id: NodeId, state: NodeState) {
        if let Some(node) = self.node_mut(id) {
            node.state = state;
        }
    }

    pub(crate) fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.node(id).map(|node| node.kind)
    }

    pub(crate) fn set_behavior(&mut self, id: NodeId, behavior: Behavior) {
        if let Some(node) = self.node_mut(id) {
            node.behavior = behavior;
        }
    }

    pub(crate) fn behavior(&self, id: NodeId) -> Behavior {
        self.node(id)
            .map(|node| node.behavior.clone())
            .unwrap_or_default()
    }

    pub(crate) fn subscriptions(&self, id: NodeId) -> SmallVec<[NodeId; 4]> {
        self.node(id)
            .map(|node| node.subscriptions.clone())
            .unwrap_or_default()
    }

    pub(crate) fn subscriber_count(&self, id: NodeId) -> usize {
        self.node(id).map_or(0, |node| node.subscribers.size())
    }

    pub(crate) fn subscription_count(&self, id: NodeId) -> usize {
        self.node(id).map_or(0, |node| node.subscriptions.len())
    }

    pub(crate) fn schedule_mut(&mut self) -> &mut Schedule {
        &mut self.schedule
    }

    pub(crate) fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            pending_reactions: self.schedule.pending_reactions(),
            pending_checks: self.schedule.pending_checks(),
            ..GraphStats::default()
        };
        for node in self.slots.iter().filter_map(|slot| slot.node.as_ref()) {
            match node.kind {
                NodeKind::Observable => stats.observables += 1,
                NodeKind::Computed => stats.computeds += 1,
                NodeKind::Reaction => stats.reactions += 1,
            }
            stats.edges += node.subscriptions.len();
        }
        stats
    }

    // ------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------

    /// Record that `subscriber` read `target`. Idempotent.
    pub(crate) fn link(&mut self, subscriber: NodeId, target: NodeId) {
        if !self.contains(subscriber) {
            return;
        }
        let Some(upstream) = self.node_mut(target) else {
            return;
        };
        if !upstream.subscribers.add(subscriber) {
            return;
        }
        upstream.max_subscribers = upstream.max_subscribers.max(upstream.subscribers.size());

        if let Some(downstream) = self.node_mut(subscriber) {
            if !downstream.subscriptions.contains(&target) {
                downstream.subscriptions.push(target);
            }
        }
    }

    /// Remove `subscriber` from `target`'s subscriber set.
    ///
    /// A no-op while `target` is notifying: its set is mid-drain and the slot
    /// is about to be cleared anyway. A computed, or any node without a
    /// handle, left with no subscribers is queued for a disposal check.
    pub(crate) fn unsubscribe(&mut self, target: NodeId, subscriber: NodeId) {
        let Some(upstream) = self.node_mut(target) else {
            return;
        };
        if upstream.state == NodeState::Notifying {
            return;
        }
        upstream.subscribers.remove(&subscriber);
        let checked = upstream.kind == NodeKind::Computed || !upstream.owned;
        if checked && upstream.subscribers.is_empty() {
            self.schedule.push_check(target);
        }
    }

    /// Drop every subscription of `id`, unsubscribing from each upstream.
    pub(crate) fn discard_subscriptions(&mut self, id: NodeId) {
        let Some(node) = self.node_mut(id) else {
            return;
        };
        let upstream = std::mem::take(&mut node.subscriptions);
        for target in upstream {
            self.unsubscribe(target, id);
        }
    }

    // ------------------------------------------------------------------
    // Notification
    // ------------------------------------------------------------------

    /// Consume `id`'s subscriber set, dirty-notifying each subscriber.
    ///
    /// The node is NOTIFYING for the duration, which turns unsubscribes
    /// against it into no-ops. Afterwards storage is resized for the next
    /// cycle and the node settles CLEAN.
    pub(crate) fn drain_and_notify(&mut self, id: NodeId) {
        let Some(node) = self.node_mut(id) else {
            return;
        };
        node.state = NodeState::Notifying;
        let len = node.subscribers.begin_drain();
        trace!(node = %id, subscribers = node.subscribers.size(), "notifying");

        for slot in 0..len {
            let subscriber = self
                .node_mut(id)
                .and_then(|node| node.subscribers.take(slot));
            if let Some(subscriber) = subscriber {
                self.notify_dirty(subscriber);
            }
        }

        let floor = self.min_capacity;
        if let Some(node) = self.node_mut(id) {
            let capacity = IdentitySet::<NodeId>::desired_capacity(node.max_subscribers, floor);
            node.subscribers.end_drain(capacity);
            node.max_subscribers = node.subscribers.size();
            node.state = NodeState::Clean;
        }
    }

    /// An upstream of `id` definitely changed.
    pub(crate) fn notify_dirty(&mut self, id: NodeId) {
        let Some(node) = self.node(id) else {
            return;
        };
        let (kind, state, checks_value) = (node.kind, node.state, node.checks_value);

        match kind {
            NodeKind::Observable => {}
            NodeKind::Computed => {
                if checks_value {
                    if state == NodeState::Clean {
                        self.forward_maybe_dirty(id);
                    }
                } else if matches!(state, NodeState::Clean | NodeState::MaybeDirty) {
                    self.drain_and_notify(id);
                }
                self.discard_subscriptions(id);
                self.set_state(id, NodeState::Dirty);
            }
            NodeKind::Reaction => {
                if state == NodeState::Clean {
                    self.schedule.push_reaction(id);
                }
                self.set_state(id, NodeState::Dirty);
            }
        }
    }

    /// An upstream of `id` might have changed.
    pub(crate) fn notify_maybe_dirty(&mut self, id: NodeId) {
        let Some(node) = self.node(id) else {
            return;
        };
        if node.state != NodeState::Clean {
            return;
        }

        match node.kind {
            NodeKind::Observable => {}
            NodeKind::Computed => {
                self.set_state(id, NodeState::MaybeDirty);
                self.forward_maybe_dirty(id);
            }
            NodeKind::Reaction => {
                self.set_state(id, NodeState::MaybeDirty);
                self.schedule.push_reaction(id);
            }
        }
    }

    fn forward_maybe_dirty(&mut self, id: NodeId) {
        let subscribers: SmallVec<[NodeId; 8]> = match self.node(id) {
            Some(node) => node.subscribers.iter().collect(),
            None => return,
        };
        for subscriber in subscribers {
            self.notify_maybe_dirty(subscriber);
        }
    }

    // ------------------------------------------------------------------
    // Disposal
    // ------------------------------------------------------------------

    /// Act on `id` if it is still unobserved: a node without handles is
    /// reclaimed, a computed is detached from its upstream.
    pub(crate) fn check_subscribers(&mut self, id: NodeId) {
        let Some(node) = self.node(id) else {
            return;
        };
        let (kind, owned) = (node.kind, node.owned);
        if kind == NodeKind::Reaction || !node.subscribers.is_empty() {
            return;
        }

        if !owned {
            self.reclaim(id);
        } else if kind == NodeKind::Computed {
            debug!(node = %id, "disposing unobserved computed");
            self.discard_subscriptions(id);
            self.set_state(id, NodeState::Dirty);
        }
    }

    /// Run every queued disposal check, including ones queued on the way.
    pub(crate) fn drain_checks(&mut self) {
        while let Some(id) = self.schedule.pop_check() {
            self.check_subscribers(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(graph: &mut Graph, node: Node) -> NodeId {
        let id = graph.insert(node);
        graph.set_state(id, NodeState::Clean);
        id
    }

    #[test]
    fn insert_and_remove_nodes() {
        let mut graph = Graph::default();
        let a = graph.insert(Node::observable(false));
        let b = graph.insert(Node::computed(false));

        assert!(graph.contains(a));
        assert_eq!(graph.stats().observables, 1);
        assert_eq!(graph.stats().computeds, 1);

        graph.remove(a);
        assert!(!graph.contains(a));
        assert!(graph.contains(b));

        // The freed slot is reused under a new generation.
        let c = graph.insert(Node::observable(false));
        assert_eq!(c.index(), a.index());
        assert_ne!(c, a);
        assert!(graph.node(a).is_none());
    }

    #[test]
    fn link_is_bidirectional_and_idempotent() {
        let mut graph = Graph::default();
        let source = graph.insert(Node::observable(false));
        let derived = graph.insert(Node::computed(false));

        graph.link(derived, source);
        graph.link(derived, source);

        assert_eq!(graph.subscriber_count(source), 1);
        assert_eq!(graph.subscriptions(derived).as_slice(), &[source]);
        assert_eq!(graph.stats().edges, 1);

        graph.discard_subscriptions(derived);
        assert_eq!(graph.subscriber_count(source), 0);
        assert_eq!(graph.subscription_count(derived), 0);
    }

    #[test]
    fn dirty_propagates_through_plain_computeds() {
        let mut graph = Graph::default();
        let source = graph.insert(Node::observable(false));
        let first = clean(&mut graph, Node::computed(false));
        let second = clean(&mut graph, Node::computed(false));
        let leaf = clean(&mut graph, Node::reaction());

        graph.link(first, source);
        graph.link(second, first);
        graph.link(leaf, second);

        graph.drain_and_notify(source);

        assert_eq!(graph.state(source), Some(NodeState::Clean));
        assert_eq!(graph.state(first), Some(NodeState::Dirty));
        assert_eq!(graph.state(second), Some(NodeState::Dirty));
        assert_eq!(graph.state(leaf), Some(NodeState::Dirty));
        assert_eq!(graph.stats().pending_reactions, 1);

        // Computeds dropped their inputs; the reaction keeps its list until it runs.
        assert_eq!(graph.subscription_count(first), 0);
        assert_eq!(graph.subscription_count(second), 0);
        assert_eq!(graph.subscription_count(leaf), 1);
        assert_eq!(graph.subscriber_count(source), 0);
    }

    #[test]
    fn checked_computeds_forward_maybe_dirty() {
        let mut graph = Graph::default();
        let source = graph.insert(Node::observable(false));
        let gated = clean(&mut graph, Node::computed(true));
        let below = clean(&mut graph, Node::computed(false));
        let leaf = clean(&mut graph, Node::reaction());

        graph.link(gated, source);
        graph.link(below, gated);
        graph.link(leaf, below);

        graph.drain_and_notify(source);

        assert_eq!(graph.state(gated), Some(NodeState::Dirty));
        assert_eq!(graph.state(below), Some(NodeState::MaybeDirty));
        assert_eq!(graph.state(leaf), Some(NodeState::MaybeDirty));
        assert_eq!(graph.stats().pending_reactions, 1);

        // Maybe-dirty does not consume subscriber sets.
        assert_eq!(graph.subscriber_count(gated), 1);
        assert_eq!(graph.subscriber_count(below), 1);
    }

    #[test]
    fn diamond_schedules_the_reaction_once() {
        let mut graph = Graph::default();
        let source = graph.insert(Node::observable(false));
        let left = clean(&mut graph, Node::computed(false));
        let right = clean(&mut graph, Node::computed(false));
        let join = clean(&mut graph, Node::computed(false));
        let leaf = clean(&mut graph, Node::reaction());

        graph.link(left, source);
        graph.link(right, source);
        graph.link(join, left);
        graph.link(join, right);
        graph.link(leaf, join);

        graph.drain_and_notify(source);

        assert_eq!(graph.stats().pending_reactions, 1);
        assert_eq!(graph.schedule_mut().pop_reaction(), Some(leaf));
    }

    #[test]
    fn unsubscribe_is_ignored_while_notifying() {
        let mut graph = Graph::default();
        let source = graph.insert(Node::observable(false));
        let derived = graph.insert(Node::computed(false));
        graph.link(derived, source);

        graph.set_state(source, NodeState::Notifying);
        graph.unsubscribe(source, derived);
        assert_eq!(graph.subscriber_count(source), 1);

        graph.set_state(source, NodeState::Clean);
        graph.unsubscribe(source, derived);
        assert_eq!(graph.subscriber_count(source), 0);
    }

    #[test]
    fn orphaned_computeds_are_checked_and_detached() {
        let mut graph = Graph::default();
        let source = graph.insert(Node::observable(false));
        let derived = clean(&mut graph, Node::computed(false));
        let leaf = clean(&mut graph, Node::reaction());

        graph.link(derived, source);
        graph.link(leaf, derived);

        graph.discard_subscriptions(leaf);
        assert_eq!(graph.stats().pending_checks, 1);

        graph.drain_checks();
        assert_eq!(graph.state(derived), Some(NodeState::Dirty));
        assert_eq!(graph.subscription_count(derived), 0);
        assert_eq!(graph.subscriber_count(source), 0);
    }

    #[test]
    fn resubscribed_computeds_survive_their_check() {
        let mut graph = Graph::default();
        let source = graph.insert(Node::observable(false));
        let derived = clean(&mut graph, Node::computed(false));
        let leaf = clean(&mut graph, Node::reaction());

        graph.link(derived, source);
        graph.link(leaf, derived);
        graph.discard_subscriptions(leaf);
        graph.link(leaf, derived);

        graph.drain_checks();
        assert_eq!(graph.state(derived), Some(NodeState::Clean));
        assert_eq!(graph.subscription_count(derived), 1);
    }

    #[test]
    fn removing_a_node_detaches_both_directions() {
        let mut graph = Graph::default();
        let source = graph.insert(Node::observable(false));
        let derived = graph.insert(Node::computed(false));
        let leaf = graph.insert(Node::reaction());

        graph.link(derived, source);
        graph.link(leaf, derived);

        graph.remove(derived);

        assert_eq!(graph.subscriber_count(source), 0);
        assert_eq!(graph.subscription_count(leaf), 0);
        assert_eq!(graph.stats().edges, 0);
    }

    #[test]
    fn disowned_nodes_wait_for_their_last_subscriber() {
        let mut graph = Graph::default();
        let source = graph.insert(Node::observable(false));
        let derived = clean(&mut graph, Node::computed(false));
        let leaf = clean(&mut graph, Node::reaction());

        graph.link(derived, source);
        graph.link(leaf, derived);

        graph.disown(derived);
        assert!(graph.contains(derived));
        assert!(graph.take_reclaimed().is_empty());

        graph.discard_subscriptions(leaf);
        graph.drain_checks();
        assert!(!graph.contains(derived));
        assert_eq!(graph.subscriber_count(source), 0);
        assert_eq!(graph.take_reclaimed().len(), 1);
    }

    #[test]
    fn unread_nodes_are_reclaimed_when_disowned() {
        let mut graph = Graph::default();
        let source = graph.insert(Node::observable(false));
        let leaf = clean(&mut graph, Node::reaction());

        graph.disown(source);
        graph.disown(leaf);

        assert!(!graph.contains(source));
        assert!(graph.contains(leaf));
        assert_eq!(graph.take_reclaimed().len(), 1);
    }

    #[test]
    fn capacity_follows_the_largest_cycle() {
        let mut graph = Graph::new(2);
        let source = graph.insert(Node::observable(false));
        let readers: Vec<_> = (0..5)
            .map(|_| clean(&mut graph, Node::computed(false)))
            .collect();
        for reader in &readers {
            graph.link(*reader, source);
        }
        assert_eq!(graph.node(source).map(|n| n.max_subscribers), Some(5));

        graph.drain_and_notify(source);

        let node = graph.node(source).unwrap();
        assert!(node.subscribers.is_empty());
        assert_eq!(node.max_subscribers, 0);
    }
}
