//! Error types for the reactive runtime.
//!
//! Two kinds of error are programmer mistakes and are never retried:
//! reading a computed from inside its own evaluation, and writing an
//! observable while a computed is evaluating. Everything returned by host
//! code (a `compute` function or a reaction body) travels as
//! [`ReactiveError::User`].

use thiserror::Error;

use crate::graph::NodeId;

/// Boxed error produced by host code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors surfaced by reads, writes and flushes.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A computed was read while it was computing (a dependency cycle).
    #[error("computed {0} was read while computing; the dependency graph has a cycle")]
    ReentrantRead(NodeId),

    /// An observable was written while a computed value was being evaluated.
    #[error("observable {0} was written while a computed value was being evaluated")]
    IllegalMutation(NodeId),

    /// A single flush ran more reactions than the runtime allows.
    #[error("flush stopped after {limit} reaction runs; remaining reactions stay queued")]
    RunawayFlush {
        /// The configured `max_reaction_runs`.
        limit: usize,
    },

    /// Host code failed inside a computed or a reaction.
    #[error("user code failed: {0}")]
    User(#[from] BoxError),
}

impl ReactiveError {
    /// Lift any host error into a [`ReactiveError::User`].
    pub fn user<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::User(error.into())
    }

    /// Whether this error came from host code rather than the runtime.
    pub fn is_user(&self) -> bool {
        matches!(self, Self::User(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_errors_keep_their_message() {
        let err = ReactiveError::user("disk on fire");
        assert!(err.is_user());
        assert_eq!(err.to_string(), "user code failed: disk on fire");
    }

    #[test]
    fn parse_errors_lift_through_user() {
        let err = "x1".parse::<i32>().map_err(ReactiveError::user).unwrap_err();
        assert!(err.is_user());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn runaway_reports_limit() {
        let err = ReactiveError::RunawayFlush { limit: 7 };
        assert!(!err.is_user());
        assert!(err.to_string().contains("after 7 reaction runs"));
    }
}
