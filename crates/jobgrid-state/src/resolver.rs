//! Folds per-node executions into one reportable job state.
//!
//! Resolution rules, in order:
//!
//! 1. At least `min_successes` executions Completed → Completed.
//! 2. Every execution terminal → Cancelled if all were cancelled,
//!    Failed otherwise.
//! 3. Otherwise the most advanced non-terminal state.
//!
//! A job with no visible executions resolves to `Undefined`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use jobgrid_core::{ExecutionId, JobId, NodeId, PublishedResult};

use crate::error::StateResult;
use crate::store::ExecutionSource;
use crate::types::{Execution, ExecutionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverPolicy {
    /// Completed executions needed before the job counts as Completed.
    pub min_successes: u32,
}

impl Default for ResolverPolicy {
    fn default() -> Self {
        Self { min_successes: 1 }
    }
}

/// Per-node view of an execution inside a [`JobState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    pub state: ExecutionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<PublishedResult>,
    pub updated_at: u64,
}

impl From<&Execution> for ExecutionSummary {
    fn from(execution: &Execution) -> Self {
        Self {
            execution_id: execution.id.clone(),
            node_id: execution.node_id.clone(),
            state: execution.state,
            last_error: execution.last_error.clone(),
            published: execution.published.clone(),
            updated_at: execution.updated_at,
        }
    }
}

/// Derived job status. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: JobId,
    pub state: ExecutionState,
    pub executions: Vec<ExecutionSummary>,
}

/// Pure fold over a snapshot of executions.
///
/// The same execution may appear more than once when several sources
/// hold a copy; the copy with the longer history wins.
pub fn resolve_executions(
    job_id: &str,
    executions: &[Execution],
    policy: &ResolverPolicy,
) -> JobState {
    let mut latest: BTreeMap<&str, &Execution> = BTreeMap::new();
    for execution in executions.iter().filter(|e| e.job_id == job_id) {
        match latest.get(execution.id.as_str()) {
            Some(seen) if seen.history.len() >= execution.history.len() => {}
            _ => {
                latest.insert(execution.id.as_str(), execution);
            }
        }
    }

    let mut summaries: Vec<ExecutionSummary> =
        latest.values().map(|e| ExecutionSummary::from(*e)).collect();
    summaries.sort_by(|a, b| {
        a.node_id
            .cmp(&b.node_id)
            .then_with(|| a.execution_id.cmp(&b.execution_id))
    });

    let state = fold_states(summaries.iter().map(|s| s.state), policy);
    JobState {
        job_id: job_id.to_string(),
        state,
        executions: summaries,
    }
}

fn fold_states(
    states: impl Iterator<Item = ExecutionState>,
    policy: &ResolverPolicy,
) -> ExecutionState {
    let mut total = 0usize;
    let mut completed = 0u32;
    let mut cancelled = 0usize;
    let mut terminal = 0usize;
    let mut most_advanced = ExecutionState::Undefined;

    for state in states {
        total += 1;
        match state {
            ExecutionState::Completed => completed += 1,
            ExecutionState::Cancelled => cancelled += 1,
            _ => {}
        }
        if state.is_terminal() {
            terminal += 1;
        } else if state > most_advanced {
            most_advanced = state;
        }
    }

    if total == 0 {
        return ExecutionState::Undefined;
    }
    if completed >= policy.min_successes.max(1) {
        return ExecutionState::Completed;
    }
    if terminal == total {
        return if cancelled == total {
            ExecutionState::Cancelled
        } else {
            ExecutionState::Failed
        };
    }
    most_advanced
}

/// Resolves job state across one or more execution sources.
#[derive(Clone)]
pub struct StateResolver {
    sources: Vec<Arc<dyn ExecutionSource>>,
    policy: ResolverPolicy,
}

impl StateResolver {
    pub fn new(sources: Vec<Arc<dyn ExecutionSource>>, policy: ResolverPolicy) -> Self {
        Self { sources, policy }
    }

    pub fn policy(&self) -> ResolverPolicy {
        self.policy
    }

    /// Snapshot every source and fold the result.
    pub fn resolve(&self, job_id: &str) -> StateResult<JobState> {
        let mut executions = Vec::new();
        for source in &self.sources {
            executions.extend(source.executions_for_job(job_id)?);
        }
        Ok(resolve_executions(job_id, &executions, &self.policy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ExecutionStore;
    use crate::types::StateTransition;
    use jobgrid_core::ResourceUsageData;

    fn exec_in(id: &str, node: &str, state: ExecutionState) -> Execution {
        let mut exec = Execution::new(
            id.to_string(),
            "job-1".to_string(),
            node.to_string(),
            ResourceUsageData::default(),
            1,
        );
        if state != ExecutionState::Created {
            exec.history.push(StateTransition {
                from: ExecutionState::Created,
                to: state,
                event: "test".to_string(),
                detail: None,
                at: 2,
            });
        }
        exec.state = state;
        exec
    }

    fn resolve(states: &[ExecutionState]) -> ExecutionState {
        let execs: Vec<_> = states
            .iter()
            .enumerate()
            .map(|(i, s)| exec_in(&format!("e{i}"), &format!("node-{i}"), *s))
            .collect();
        resolve_executions("job-1", &execs, &ResolverPolicy::default()).state
    }

    #[test]
    fn no_executions_is_undefined() {
        assert_eq!(resolve(&[]), ExecutionState::Undefined);
    }

    #[test]
    fn first_success_wins() {
        use ExecutionState::*;
        assert_eq!(resolve(&[Failed, Completed]), Completed);
        assert_eq!(resolve(&[Failed, Failed, Running, Completed]), Completed);
    }

    #[test]
    fn cancelled_only_if_unanimous() {
        use ExecutionState::*;
        assert_eq!(resolve(&[Cancelled, Cancelled]), Cancelled);
        assert_eq!(resolve(&[Cancelled, Failed, Cancelled]), Failed);
        assert_eq!(resolve(&[Failed]), Failed);
    }

    #[test]
    fn in_progress_reports_most_advanced() {
        use ExecutionState::*;
        assert_eq!(resolve(&[Created, Running, Failed]), Running);
        assert_eq!(resolve(&[BidAccepted, Publishing]), Publishing);
        assert_eq!(resolve(&[Cancelled, Created]), Created);
    }

    #[test]
    fn quorum_requires_k_successes() {
        use ExecutionState::*;
        let execs = vec![
            exec_in("a", "node-a", Completed),
            exec_in("b", "node-b", Running),
        ];
        let policy = ResolverPolicy { min_successes: 2 };
        assert_eq!(resolve_executions("job-1", &execs, &policy).state, Running);

        let execs = vec![
            exec_in("a", "node-a", Completed),
            exec_in("b", "node-b", Failed),
        ];
        assert_eq!(resolve_executions("job-1", &execs, &policy).state, Failed);

        let execs = vec![
            exec_in("a", "node-a", Completed),
            exec_in("b", "node-b", Completed),
        ];
        assert_eq!(resolve_executions("job-1", &execs, &policy).state, Completed);
    }

    #[test]
    fn duplicates_keep_the_most_recent_copy() {
        let stale = exec_in("a", "node-a", ExecutionState::Created);
        let fresh = exec_in("a", "node-a", ExecutionState::Failed);
        let state = resolve_executions(
            "job-1",
            &[fresh.clone(), stale.clone()],
            &ResolverPolicy::default(),
        );
        assert_eq!(state.executions.len(), 1);
        assert_eq!(state.state, ExecutionState::Failed);

        let state = resolve_executions("job-1", &[stale, fresh], &ResolverPolicy::default());
        assert_eq!(state.state, ExecutionState::Failed);
    }

    #[test]
    fn resolution_is_repeatable() {
        use ExecutionState::*;
        let execs = vec![
            exec_in("b", "node-b", Running),
            exec_in("a", "node-a", Failed),
        ];
        let first = resolve_executions("job-1", &execs, &ResolverPolicy::default());
        let second = resolve_executions("job-1", &execs, &ResolverPolicy::default());
        assert_eq!(first, second);
        assert_eq!(first.executions[0].node_id, "node-a");
    }

    #[test]
    fn resolver_merges_stores() {
        let store_a = ExecutionStore::open_in_memory().unwrap();
        let store_b = ExecutionStore::open_in_memory().unwrap();
        store_a
            .create_execution(&exec_in("a", "node-a", ExecutionState::Failed))
            .unwrap();
        store_b
            .create_execution(&exec_in("b", "node-b", ExecutionState::Completed))
            .unwrap();

        let resolver = StateResolver::new(
            vec![Arc::new(store_a), Arc::new(store_b)],
            ResolverPolicy::default(),
        );
        let job = resolver.resolve("job-1").unwrap();
        assert_eq!(job.state, ExecutionState::Completed);
        assert_eq!(job.executions.len(), 2);

        assert_eq!(
            resolver.resolve("job-2").unwrap().state,
            ExecutionState::Undefined
        );
    }
}
