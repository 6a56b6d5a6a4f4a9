//! Execution records and the events that move them.

use std::fmt;

use serde::{Deserialize, Serialize};

use jobgrid_core::{ExecutionId, JobId, NodeId, PublishedResult, ResourceUsageData, RunOutput};

// ── Execution state ────────────────────────────────────────────────

/// Lifecycle state of one execution. Ordered by progress.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ExecutionState {
    #[default]
    Undefined = 0,
    Created = 1,
    BidAccepted = 2,
    Running = 3,
    WaitingVerification = 4,
    ResultAccepted = 5,
    Publishing = 6,
    Completed = 7,
    Failed = 8,
    Cancelled = 9,
}

impl ExecutionState {
    pub const ALL: [ExecutionState; 10] = [
        ExecutionState::Undefined,
        ExecutionState::Created,
        ExecutionState::BidAccepted,
        ExecutionState::Running,
        ExecutionState::WaitingVerification,
        ExecutionState::ResultAccepted,
        ExecutionState::Publishing,
        ExecutionState::Completed,
        ExecutionState::Failed,
        ExecutionState::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Undefined => "Undefined",
            ExecutionState::Created => "Created",
            ExecutionState::BidAccepted => "BidAccepted",
            ExecutionState::Running => "Running",
            ExecutionState::WaitingVerification => "WaitingVerification",
            ExecutionState::ResultAccepted => "ResultAccepted",
            ExecutionState::Publishing => "Publishing",
            ExecutionState::Completed => "Completed",
            ExecutionState::Failed => "Failed",
            ExecutionState::Cancelled => "Cancelled",
        }
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Completed, Failed and Cancelled accept no further events.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::Failed | ExecutionState::Cancelled
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Events ─────────────────────────────────────────────────────────

/// Something that happened to an execution, locally or on the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    BidAccepted,
    BidRejected { reason: String },
    /// No answer from the requester within the bid window.
    BidTimedOut,
    RunStarted,
    RunCompleted { output: RunOutput },
    RunFailed { error: String },
    VerificationPassed,
    VerificationFailed { reason: String },
    PublishStarted,
    PublishSucceeded { result: PublishedResult },
    PublishFailed { error: String },
    Cancel { reason: String },
}

impl ExecutionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionEvent::BidAccepted => "bid_accepted",
            ExecutionEvent::BidRejected { .. } => "bid_rejected",
            ExecutionEvent::BidTimedOut => "bid_timed_out",
            ExecutionEvent::RunStarted => "run_started",
            ExecutionEvent::RunCompleted { .. } => "run_completed",
            ExecutionEvent::RunFailed { .. } => "run_failed",
            ExecutionEvent::VerificationPassed => "verification_passed",
            ExecutionEvent::VerificationFailed { .. } => "verification_failed",
            ExecutionEvent::PublishStarted => "publish_started",
            ExecutionEvent::PublishSucceeded { .. } => "publish_succeeded",
            ExecutionEvent::PublishFailed { .. } => "publish_failed",
            ExecutionEvent::Cancel { .. } => "cancel",
        }
    }

    /// Human-readable detail worth keeping in the history.
    pub fn detail(&self) -> Option<String> {
        match self {
            ExecutionEvent::BidRejected { reason }
            | ExecutionEvent::VerificationFailed { reason }
            | ExecutionEvent::Cancel { reason } => Some(reason.clone()),
            ExecutionEvent::RunFailed { error } | ExecutionEvent::PublishFailed { error } => {
                Some(error.clone())
            }
            ExecutionEvent::RunCompleted { output } => {
                Some(format!("exit code {}", output.exit_code))
            }
            ExecutionEvent::PublishSucceeded { result } => Some(result.uri.clone()),
            _ => None,
        }
    }
}

// ── Execution ──────────────────────────────────────────────────────

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: ExecutionState,
    pub to: ExecutionState,
    pub event: String,
    #[serde(default)]
    pub detail: Option<String>,
    /// Unix timestamp (milliseconds).
    pub at: u64,
}

/// One node's attempt at one job. Mutated only by the node that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub job_id: JobId,
    pub node_id: NodeId,
    pub state: ExecutionState,
    /// Resources reserved for this execution at bid time.
    pub requested: ResourceUsageData,
    /// Resources actually used, filled after the run.
    #[serde(default)]
    pub consumed: Option<ResourceUsageData>,
    #[serde(default)]
    pub result: Option<RunOutput>,
    #[serde(default)]
    pub published: Option<PublishedResult>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
    /// Every transition since creation, oldest first.
    pub history: Vec<StateTransition>,
}

impl Execution {
    /// Composite key used in the executions table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.job_id, self.id)
    }

    /// The ordered list of states this execution has been in.
    pub fn state_path(&self) -> Vec<ExecutionState> {
        let mut path: Vec<ExecutionState> = Vec::with_capacity(self.history.len() + 1);
        if let Some(first) = self.history.first() {
            path.push(first.from);
        }
        path.extend(self.history.iter().map(|t| t.to));
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_ordered_by_code() {
        for (i, state) in ExecutionState::ALL.iter().enumerate() {
            assert_eq!(state.code() as usize, i);
        }
        assert!(ExecutionState::Running > ExecutionState::BidAccepted);
    }

    #[test]
    fn terminal_states() {
        let terminal: Vec<_> = ExecutionState::ALL
            .iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(
            terminal,
            vec![
                &ExecutionState::Completed,
                &ExecutionState::Failed,
                &ExecutionState::Cancelled
            ]
        );
    }

    #[test]
    fn state_names_render() {
        assert_eq!(
            ExecutionState::WaitingVerification.to_string(),
            "WaitingVerification"
        );
        let json = serde_json::to_string(&ExecutionState::BidAccepted).unwrap();
        assert_eq!(json, "\"bid_accepted\"");
    }

    #[test]
    fn event_detail_carries_reason() {
        let event = ExecutionEvent::RunFailed {
            error: "exit 3".to_string(),
        };
        assert_eq!(event.name(), "run_failed");
        assert_eq!(event.detail().as_deref(), Some("exit 3"));
        assert_eq!(ExecutionEvent::RunStarted.detail(), None);
    }
}
