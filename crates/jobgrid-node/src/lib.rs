//! jobgrid-node: assembling nodes from their collaborators.
//!
//! # Components
//!
//! - **`requester`**: submits jobs, answers bids, verifies results
//! - **`deps`**: the dependency set a node is built from, with noop and
//!   standard presets
//! - **`node`**: a node running the compute role, the requester role, or
//!   both, over one transport subscription
//! - **`devstack`**: N nodes on one in-memory network with a resolver
//!   spanning all of their stores

pub mod deps;
pub mod devstack;
pub mod error;
pub mod node;
pub mod requester;

pub use deps::NodeDependencies;
pub use devstack::{DevStack, DevStackOptions};
pub use error::{NodeError, NodeResult};
pub use node::Node;
pub use requester::{JobProgress, REASON_ENOUGH_BIDS, REASON_JOB_CANCELLED, RequesterNode};
