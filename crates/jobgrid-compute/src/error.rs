//! Compute node error types.

use thiserror::Error;

pub type ComputeResult<T> = Result<T, ComputeError>;

#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("config error: {0}")]
    Config(#[from] jobgrid_core::ConfigError),

    #[error("state store error: {0}")]
    State(#[from] jobgrid_state::StateError),

    #[error("transport error: {0}")]
    Transport(#[from] jobgrid_transport::TransportError),

    #[error("provider error: {0}")]
    Provider(#[from] jobgrid_providers::ProviderError),

    #[error("compute node already started")]
    AlreadyStarted,
}
