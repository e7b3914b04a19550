//! Runtime configuration.
//!
//! A [`RuntimeConfig`] is plain data: hosts can build one in code or load it
//! from whatever configuration format they already use, since it derives
//! serde's traits and fills every missing field with its default.

use serde::{Deserialize, Serialize};

/// Default number of reaction runs allowed in a single flush.
pub const DEFAULT_MAX_REACTION_RUNS: usize = 100_000;

/// Default floor for subscriber-set capacity.
pub const DEFAULT_MIN_SUBSCRIBER_CAPACITY: usize = 4;

/// Tunables for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Reaction runs allowed in one flush before it stops with
    /// [`ReactiveError::RunawayFlush`](crate::ReactiveError::RunawayFlush).
    ///
    /// A reaction that writes an observable it also reads re-schedules
    /// itself; this bound turns such a loop into an error instead of a hang.
    pub max_reaction_runs: usize,

    /// Smallest capacity a non-empty subscriber set is resized to after a
    /// notification pass.
    pub min_subscriber_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_reaction_runs: DEFAULT_MAX_REACTION_RUNS,
            min_subscriber_capacity: DEFAULT_MIN_SUBSCRIBER_CAPACITY,
        }
    }
}

impl RuntimeConfig {
    /// Set the per-flush reaction budget.
    pub fn with_max_reaction_runs(mut self, limit: usize) -> Self {
        self.max_reaction_runs = limit;
        self
    }

    /// Set the subscriber-set capacity floor.
    pub fn with_min_subscriber_capacity(mut self, capacity: usize) -> Self {
        self.min_subscriber_capacity = capacity;
        self
    }
}
