//! Transport error types.

use jobgrid_core::NodeId;
use thiserror::Error;

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unknown peer: {0}")]
    UnknownPeer(NodeId),

    #[error("transport closed")]
    Closed,

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
