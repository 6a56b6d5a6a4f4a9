//! Admission error types.

use jobgrid_core::{ExecutionId, ResourceUsageData};
use thiserror::Error;

pub type AdmissionResult<T> = Result<T, AdmissionError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdmissionError {
    #[error("insufficient resources: required {required}, remaining {remaining}")]
    InsufficientResources {
        required: ResourceUsageData,
        remaining: ResourceUsageData,
    },

    #[error("resources already reserved for execution {0}")]
    AlreadyReserved(ExecutionId),
}
