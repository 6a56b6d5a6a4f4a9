//! Provider error types.

use std::time::Duration;

use jobgrid_core::{PublisherType, StorageSourceType};
use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{operation} timed out after {deadline:?}")]
    Timeout {
        operation: &'static str,
        deadline: Duration,
    },

    #[error("unknown publisher type: {0}")]
    UnknownPublisherType(PublisherType),

    #[error("unknown storage source: {0}")]
    UnknownStorageSource(StorageSourceType),

    #[error("invalid storage spec: {0}")]
    InvalidSpec(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("cancelled")]
    Cancelled,
}
