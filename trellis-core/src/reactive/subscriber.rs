//! Subscriber behaviors.
//!
//! The graph stores node records without knowing the value types behind
//! them. When the runtime needs a node to do host-side work, it clones the
//! behavior stored on the node and calls through one of these traits with
//! the graph unborrowed.

use std::rc::Rc;

use crate::error::Result;

/// A computed value that can re-run its derivation.
pub(crate) trait Derivation {
    /// Run the compute function under this node's tracking scope and
    /// commit the result. Returns whether the committed value changed.
    fn recompute(&self) -> Result<bool>;
}

/// A reaction that can be run from the schedule.
pub(crate) trait Scheduled {
    /// Run the reaction, or hand it to its manager.
    fn run_scheduled(self: Rc<Self>) -> Result<()>;
}
