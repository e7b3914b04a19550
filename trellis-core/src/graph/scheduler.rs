//! Schedule
//!
//! Two queues of deferred work, drained when the outermost transaction
//! closes:
//!
//! 1. Reactions whose inputs changed (or might have). A reaction is pushed
//!    only on its CLEAN → not-CLEAN transition, so it appears at most once.
//! 2. Computeds that lost their last subscriber. Each is checked again after
//!    the reactions ran; if still orphaned it is detached from its upstream.
//!
//! Both queues drain last-in, first-out: the reaction scheduled last runs
//! first. Callers rely on this order in tests, so it is part of the contract.

use std::collections::HashSet;

use super::node::NodeId;

/// Pending reactions and disposal checks.
#[derive(Debug, Default)]
pub struct Schedule {
    reactions: Vec<NodeId>,
    checks: Vec<NodeId>,
    /// Mirror of `checks` for O(1) deduplication.
    queued_checks: HashSet<NodeId>,
}

impl Schedule {
    /// Create an empty schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reaction to run at the next flush.
    pub fn push_reaction(&mut self, id: NodeId) {
        self.reactions.push(id);
    }

    /// Take the most recently queued reaction.
    pub fn pop_reaction(&mut self) -> Option<NodeId> {
        self.reactions.pop()
    }

    /// Queue a computed for a disposal check.
    pub fn push_check(&mut self, id: NodeId) {
        if self.queued_checks.insert(id) {
            self.checks.push(id);
        }
    }

    /// Take the most recently queued disposal check.
    pub fn pop_check(&mut self) -> Option<NodeId> {
        let id = self.checks.pop()?;
        self.queued_checks.remove(&id);
        Some(id)
    }

    /// Number of queued reactions.
    pub fn pending_reactions(&self) -> usize {
        self.reactions.len()
    }

    /// Number of queued disposal checks.
    pub fn pending_checks(&self) -> usize {
        self.checks.len()
    }
}
