//! Error types for the execution store and state machine.

use jobgrid_core::ExecutionId;
use thiserror::Error;

use crate::types::ExecutionState;

/// Result type alias for state operations.
pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("execution already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid transition for execution {execution_id}: {event} not allowed in state {state}")]
    InvalidTransition {
        execution_id: ExecutionId,
        state: ExecutionState,
        event: &'static str,
    },
}
