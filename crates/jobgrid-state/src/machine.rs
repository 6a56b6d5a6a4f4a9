//! The execution state machine.
//!
//! Every non-terminal state has one forward successor and one or two
//! escape edges into Failed or Cancelled:
//!
//! ```text
//! Created ──bid_accepted──▶ BidAccepted ──run_started──▶ Running
//!    │ bid_rejected / bid_timed_out                        │ run_failed ──▶ Failed
//!    ▼                                                     ▼ run_completed
//! Cancelled                                        WaitingVerification
//!                                                          │ verification_failed ──▶ Failed
//!                                                          ▼ verification_passed
//!                         Publishing ◀──publish_started── ResultAccepted
//!                             │ publish_failed ──▶ Failed
//!                             ▼ publish_succeeded
//!                         Completed
//! ```
//!
//! `cancel` moves any non-terminal state to Cancelled. `Undefined` exists
//! only before creation and accepts no events.

use jobgrid_core::{ExecutionId, JobId, NodeId, ResourceUsageData};

use crate::error::{StateError, StateResult};
use crate::types::{Execution, ExecutionEvent, ExecutionState, StateTransition};

/// The state `event` leads to from `current`, or `None` if there is no such edge.
pub fn next_state(current: ExecutionState, event: &ExecutionEvent) -> Option<ExecutionState> {
    use ExecutionEvent as E;
    use ExecutionState as S;

    if current == S::Undefined || current.is_terminal() {
        return None;
    }
    if let E::Cancel { .. } = event {
        return Some(S::Cancelled);
    }

    match (current, event) {
        (S::Created, E::BidAccepted) => Some(S::BidAccepted),
        (S::Created, E::BidRejected { .. } | E::BidTimedOut) => Some(S::Cancelled),
        (S::BidAccepted, E::RunStarted) => Some(S::Running),
        (S::Running, E::RunCompleted { .. }) => Some(S::WaitingVerification),
        (S::Running, E::RunFailed { .. }) => Some(S::Failed),
        (S::WaitingVerification, E::VerificationPassed) => Some(S::ResultAccepted),
        (S::WaitingVerification, E::VerificationFailed { .. }) => Some(S::Failed),
        (S::ResultAccepted, E::PublishStarted) => Some(S::Publishing),
        (S::Publishing, E::PublishSucceeded { .. }) => Some(S::Completed),
        (S::Publishing, E::PublishFailed { .. }) => Some(S::Failed),
        _ => None,
    }
}

/// Validate `event` against the execution's current state.
pub fn transition(execution: &Execution, event: &ExecutionEvent) -> StateResult<ExecutionState> {
    next_state(execution.state, event).ok_or_else(|| StateError::InvalidTransition {
        execution_id: execution.id.clone(),
        state: execution.state,
        event: event.name(),
    })
}

impl Execution {
    /// A fresh execution in `Created`, with its creation recorded.
    pub fn new(
        id: ExecutionId,
        job_id: JobId,
        node_id: NodeId,
        requested: ResourceUsageData,
        at: u64,
    ) -> Self {
        Self {
            id,
            job_id,
            node_id,
            state: ExecutionState::Created,
            requested,
            consumed: None,
            result: None,
            published: None,
            last_error: None,
            created_at: at,
            updated_at: at,
            history: vec![StateTransition {
                from: ExecutionState::Undefined,
                to: ExecutionState::Created,
                event: "created".to_string(),
                detail: None,
                at,
            }],
        }
    }

    /// Apply `event`, appending to the history.
    ///
    /// On error the execution is not modified.
    pub fn apply(&mut self, event: &ExecutionEvent, at: u64) -> StateResult<StateTransition> {
        let to = transition(self, event)?;

        match event {
            ExecutionEvent::RunCompleted { output } => {
                self.result = Some(output.clone());
                self.consumed = output.usage;
            }
            ExecutionEvent::RunFailed { error } | ExecutionEvent::PublishFailed { error } => {
                self.last_error = Some(error.clone());
            }
            ExecutionEvent::VerificationFailed { reason } => {
                self.last_error = Some(reason.clone());
            }
            ExecutionEvent::PublishSucceeded { result } => {
                self.published = Some(result.clone());
            }
            _ => {}
        }

        let record = StateTransition {
            from: self.state,
            to,
            event: event.name().to_string(),
            detail: event.detail(),
            at,
        };
        self.state = to;
        self.updated_at = at;
        self.history.push(record.clone());
        Ok(record)
    }
}
