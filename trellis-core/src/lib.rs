//! Trellis Core
//!
//! This crate provides a fine-grained, glitch-free reactive runtime for a
//! single thread. It implements:
//!
//! - Reactive primitives (observables, computeds, reactions)
//! - Automatic dependency tracking
//! - Lazy, memoized recomputation with optional equality gating
//! - Batched transactions and untracked scopes
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Public handles, the runtime and dependency tracking
//! - `graph`: The dependency graph, node states and the schedule
//! - `config`: Runtime limits and tuning
//! - `error`: The error type shared by every fallible operation
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{Computed, Observable, Reaction};
//!
//! // Create an observable
//! let count = Observable::new(0);
//!
//! // Create a derived value
//! let doubled = {
//!     let count = count.clone();
//!     Computed::new(move || Ok(count.get() * 2))
//! };
//!
//! // Create a reaction
//! let _printer = {
//!     let (count, doubled) = (count.clone(), doubled.clone());
//!     Reaction::new(move || {
//!         println!("Count: {}, Doubled: {}", count.get(), doubled.get()?);
//!         Ok(())
//!     })
//! };
//!
//! // Update the observable
//! count.set(5)?;
//! // The reaction runs before `set` returns, printing "Count: 5, Doubled: 10"
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::RuntimeConfig;
pub use error::{ReactiveError, Result};
pub use graph::{GraphStats, NodeId, NodeKind, NodeState};
pub use reactive::{
    action, transaction, untracked, Computed, Manager, Observable, Options, Reaction, Runtime,
};
