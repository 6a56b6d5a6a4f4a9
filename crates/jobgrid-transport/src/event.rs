//! Wire events exchanged between requesters and compute nodes.

use serde::{Deserialize, Serialize};

use jobgrid_core::{ExecutionId, JobId, JobSpec, NodeId, PublishedResult, RunOutput};

use crate::error::TransportResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// Requester → all: a new job is open for bids.
    JobAnnounced { job: JobSpec },
    /// Compute → requester.
    BidPlaced {
        job_id: JobId,
        execution_id: ExecutionId,
    },
    /// Requester → compute.
    BidAccepted {
        job_id: JobId,
        execution_id: ExecutionId,
    },
    /// Requester → compute.
    BidRejected {
        job_id: JobId,
        execution_id: ExecutionId,
        reason: String,
    },
    /// Compute → requester: the run finished, here is its output.
    ResultProposed {
        job_id: JobId,
        execution_id: ExecutionId,
        output: RunOutput,
    },
    /// Requester → compute: verification passed, go publish.
    ResultAccepted {
        job_id: JobId,
        execution_id: ExecutionId,
    },
    /// Requester → compute: verification failed.
    ResultRejected {
        job_id: JobId,
        execution_id: ExecutionId,
        reason: String,
    },
    /// Compute → all.
    ExecutionPublished {
        job_id: JobId,
        execution_id: ExecutionId,
        result: PublishedResult,
    },
    /// Compute → all.
    ExecutionFailed {
        job_id: JobId,
        execution_id: ExecutionId,
        error: String,
    },
    /// Compute → all.
    ExecutionCancelled {
        job_id: JobId,
        execution_id: ExecutionId,
        reason: String,
    },
    /// Requester → all: stop every execution of the job.
    JobCancelled { job_id: JobId, reason: String },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::JobAnnounced { job } => &job.id,
            JobEvent::BidPlaced { job_id, .. }
            | JobEvent::BidAccepted { job_id, .. }
            | JobEvent::BidRejected { job_id, .. }
            | JobEvent::ResultProposed { job_id, .. }
            | JobEvent::ResultAccepted { job_id, .. }
            | JobEvent::ResultRejected { job_id, .. }
            | JobEvent::ExecutionPublished { job_id, .. }
            | JobEvent::ExecutionFailed { job_id, .. }
            | JobEvent::ExecutionCancelled { job_id, .. }
            | JobEvent::JobCancelled { job_id, .. } => job_id,
        }
    }

    pub fn execution_id(&self) -> Option<&str> {
        match self {
            JobEvent::JobAnnounced { .. } | JobEvent::JobCancelled { .. } => None,
            JobEvent::BidPlaced { execution_id, .. }
            | JobEvent::BidAccepted { execution_id, .. }
            | JobEvent::BidRejected { execution_id, .. }
            | JobEvent::ResultProposed { execution_id, .. }
            | JobEvent::ResultAccepted { execution_id, .. }
            | JobEvent::ResultRejected { execution_id, .. }
            | JobEvent::ExecutionPublished { execution_id, .. }
            | JobEvent::ExecutionFailed { execution_id, .. }
            | JobEvent::ExecutionCancelled { execution_id, .. } => Some(execution_id),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::JobAnnounced { .. } => "job_announced",
            JobEvent::BidPlaced { .. } => "bid_placed",
            JobEvent::BidAccepted { .. } => "bid_accepted",
            JobEvent::BidRejected { .. } => "bid_rejected",
            JobEvent::ResultProposed { .. } => "result_proposed",
            JobEvent::ResultAccepted { .. } => "result_accepted",
            JobEvent::ResultRejected { .. } => "result_rejected",
            JobEvent::ExecutionPublished { .. } => "execution_published",
            JobEvent::ExecutionFailed { .. } => "execution_failed",
            JobEvent::ExecutionCancelled { .. } => "execution_cancelled",
            JobEvent::JobCancelled { .. } => "job_cancelled",
        }
    }
}

/// An event plus its routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: NodeId,
    /// `None` for broadcasts.
    #[serde(default)]
    pub to: Option<NodeId>,
    pub event: JobEvent,
}

impl Envelope {
    pub fn encode(&self) -> TransportResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> TransportResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobgrid_core::PublisherType;

    #[test]
    fn envelope_json_shape() {
        let envelope = Envelope {
            from: "node-1".to_string(),
            to: Some("node-0".to_string()),
            event: JobEvent::BidPlaced {
                job_id: "job-1".to_string(),
                execution_id: "exec-1".to_string(),
            },
        };
        let json: serde_json::Value = serde_json::from_slice(&envelope.encode().unwrap()).unwrap();
        assert_eq!(json["event"]["type"], "bid_placed");
        assert_eq!(json["event"]["execution_id"], "exec-1");
        assert_eq!(Envelope::decode(&envelope.encode().unwrap()).unwrap(), envelope);
    }

    #[test]
    fn announced_job_id_comes_from_spec() {
        let mut job = JobSpec::new(&["true"], PublisherType::Noop);
        job.id = "job-9".to_string();
        let event = JobEvent::JobAnnounced { job };
        assert_eq!(event.job_id(), "job-9");
        assert_eq!(event.execution_id(), None);
        assert_eq!(event.kind(), "job_announced");
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(Envelope::decode(b"{\"from\": 1}").is_err());
    }
}
