//! jobgrid-compute: the bid protocol handler.
//!
//! A [`ComputeNode`] listens for job announcements, decides whether to
//! bid, and then drives each of its executions through the state machine
//! in response to network events and local outcomes.
//!
//! # Concurrency
//!
//! - Every announcement is admitted in its own task. The fit check, the
//!   resource reservation and the execution record are made under one
//!   per-node ledger mutex.
//! - All other events flow through a single ordered channel. A dispatcher
//!   routes them to one worker per job; a node holds at most one execution
//!   per job, so each execution's events are applied strictly in order
//!   while different jobs proceed in parallel.
//! - Storage, execution and publishing run in spawned tasks. They re-enter
//!   the channel only to report their outcome.
//! - Cancelling an in-flight run signals the executor and marks the
//!   execution Cancelled once the run returns.

pub mod error;
pub mod settings;

mod bidding;
mod lifecycle;
mod node;

pub use error::{ComputeError, ComputeResult};
pub use node::{ComputeDependencies, ComputeNode};
pub use settings::ComputeSettings;
