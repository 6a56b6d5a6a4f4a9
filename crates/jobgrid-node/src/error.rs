//! Node error types.

use thiserror::Error;

use jobgrid_state::ExecutionState;

pub type NodeResult<T> = Result<T, NodeError>;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("config error: {0}")]
    Config(#[from] jobgrid_core::ConfigError),

    #[error("invalid job resources: {0}")]
    Resource(#[from] jobgrid_core::ResourceError),

    #[error("state store error: {0}")]
    State(#[from] jobgrid_state::StateError),

    #[error("transport error: {0}")]
    Transport(#[from] jobgrid_transport::TransportError),

    #[error("compute error: {0}")]
    Compute(#[from] jobgrid_compute::ComputeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("requester role is disabled on node {0}")]
    RequesterDisabled(String),

    #[error("node already started")]
    AlreadyStarted,

    #[error("job {job_id} did not finish in time (last state {state})")]
    JobTimeout {
        job_id: String,
        state: ExecutionState,
    },
}
