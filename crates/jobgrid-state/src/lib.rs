//! jobgrid-state: execution lifecycle and its persistence.
//!
//! An [`Execution`] is one node's attempt at one job. It moves through
//! [`ExecutionState`] along a fixed set of edges (see [`machine`]); any
//! other event is rejected with [`StateError::InvalidTransition`] and
//! leaves the record untouched.
//!
//! # Architecture
//!
//! Executions are JSON-serialized into a redb table keyed by
//! `{job_id}:{execution_id}`, so all executions of a job are found with a
//! prefix scan. Each record carries its full transition history; the store
//! never deletes.
//!
//! The [`StateResolver`] folds the executions visible for a job, possibly
//! from several stores, into a single [`JobState`]. It is read-only.

pub mod error;
pub mod machine;
pub mod resolver;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use machine::{next_state, transition};
pub use resolver::{ExecutionSummary, JobState, ResolverPolicy, StateResolver, resolve_executions};
pub use store::{ExecutionSource, ExecutionStore};
pub use types::*;
