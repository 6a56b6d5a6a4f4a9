//! The requester role: submits jobs, picks bids, verifies results.
//!
//! A requester accepts the first `concurrency` bids for a job in arrival
//! order and rejects the rest. Proposed results go through the
//! [`Verifier`]; the verdict is sent back to the proposing node. Final
//! outcomes broadcast by compute nodes are recorded in [`JobProgress`].
//!
//! All handling is idempotent: a duplicated bid or result gets the same
//! answer at most once.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use jobgrid_core::{
    ExecutionId, JobId, JobSpec, NodeId, PublishedResult, RunOutput, convert, epoch_millis,
    generate_id,
};
use jobgrid_providers::{Verdict, Verifier};
use jobgrid_transport::{Envelope, JobEvent, Transport};

use crate::error::{NodeError, NodeResult};

pub const REASON_ENOUGH_BIDS: &str = "job already has enough bids";
pub const REASON_JOB_CANCELLED: &str = "job cancelled";

/// What a requester knows about one of its jobs.
#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub spec: JobSpec,
    /// Accepted bids, execution id to bidding node.
    pub accepted: BTreeMap<ExecutionId, NodeId>,
    pub rejected: BTreeSet<ExecutionId>,
    /// Executions whose result has been judged.
    pub verified: BTreeMap<ExecutionId, bool>,
    pub published: BTreeMap<ExecutionId, PublishedResult>,
    pub failed: BTreeMap<ExecutionId, String>,
    pub cancelled: BTreeSet<ExecutionId>,
    /// Set once the requester cancelled the job.
    pub cancel_reason: Option<String>,
}

impl JobProgress {
    fn new(spec: JobSpec) -> Self {
        Self {
            spec,
            accepted: BTreeMap::new(),
            rejected: BTreeSet::new(),
            verified: BTreeMap::new(),
            published: BTreeMap::new(),
            failed: BTreeMap::new(),
            cancelled: BTreeSet::new(),
            cancel_reason: None,
        }
    }

    /// Every accepted execution has reported a final outcome.
    pub fn is_settled(&self) -> bool {
        !self.accepted.is_empty()
            && self.accepted.keys().all(|id| {
                self.published.contains_key(id)
                    || self.failed.contains_key(id)
                    || self.cancelled.contains(id)
            })
    }
}

struct RequesterInner {
    node_id: NodeId,
    transport: Arc<dyn Transport>,
    verifier: Arc<dyn Verifier>,
    jobs: RwLock<HashMap<JobId, JobProgress>>,
}

/// Requester side of a node. Cheap to clone.
#[derive(Clone)]
pub struct RequesterNode {
    inner: Arc<RequesterInner>,
}

impl RequesterNode {
    pub fn new(node_id: NodeId, transport: Arc<dyn Transport>, verifier: Arc<dyn Verifier>) -> Self {
        Self {
            inner: Arc::new(RequesterInner {
                node_id,
                transport,
                verifier,
                jobs: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    /// Validate a job, assign its id and announce it to the network.
    pub async fn submit(&self, mut job: JobSpec) -> NodeResult<JobId> {
        if job.entrypoint.is_empty() {
            return Err(NodeError::InvalidJob("entrypoint is empty".to_string()));
        }
        if job.concurrency == 0 {
            return Err(NodeError::InvalidJob("concurrency must be at least 1".to_string()));
        }
        convert(&job.resources)?;

        job.id = generate_id("job", &self.inner.node_id);
        job.requester_node_id = self.inner.node_id.clone();
        job.created_at = epoch_millis();
        let job_id = job.id.clone();

        self.inner
            .jobs
            .write()
            .await
            .insert(job_id.clone(), JobProgress::new(job.clone()));
        self.inner
            .transport
            .broadcast(JobEvent::JobAnnounced { job })
            .await?;

        info!(%job_id, node_id = %self.inner.node_id, "job submitted");
        Ok(job_id)
    }

    /// Withdraw a job; every compute node holding an execution cancels it.
    pub async fn cancel(&self, job_id: &str, reason: &str) -> NodeResult<()> {
        {
            let mut jobs = self.inner.jobs.write().await;
            let progress = jobs
                .get_mut(job_id)
                .ok_or_else(|| NodeError::UnknownJob(job_id.to_string()))?;
            progress.cancel_reason = Some(reason.to_string());
        }
        self.inner
            .transport
            .broadcast(JobEvent::JobCancelled {
                job_id: job_id.to_string(),
                reason: reason.to_string(),
            })
            .await?;
        info!(%job_id, %reason, "job cancelled");
        Ok(())
    }

    pub async fn job(&self, job_id: &str) -> Option<JobProgress> {
        self.inner.jobs.read().await.get(job_id).cloned()
    }

    pub async fn job_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.inner.jobs.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Feed one inbound envelope to the requester role.
    pub async fn handle_envelope(&self, envelope: &Envelope) {
        if let Some(to) = &envelope.to {
            if to != &self.inner.node_id {
                return;
            }
        }

        match &envelope.event {
            JobEvent::BidPlaced {
                job_id,
                execution_id,
            } => self.on_bid(job_id, execution_id, &envelope.from).await,
            JobEvent::ResultProposed {
                job_id,
                execution_id,
                output,
            } => self.on_result(job_id, execution_id, &envelope.from, output).await,
            JobEvent::ExecutionPublished {
                job_id,
                execution_id,
                result,
            } => {
                self.record(job_id, |p| {
                    if p.published.insert(execution_id.clone(), result.clone()).is_none() {
                        info!(%job_id, %execution_id, uri = %result.uri, "result published");
                    }
                })
                .await
            }
            JobEvent::ExecutionFailed {
                job_id,
                execution_id,
                error,
            } => {
                self.record(job_id, |p| {
                    if p.failed.insert(execution_id.clone(), error.clone()).is_none() {
                        warn!(%job_id, %execution_id, %error, "execution failed");
                    }
                })
                .await
            }
            JobEvent::ExecutionCancelled {
                job_id,
                execution_id,
                ..
            } => {
                self.record(job_id, |p| {
                    p.cancelled.insert(execution_id.clone());
                })
                .await
            }
            _ => {}
        }
    }

    async fn record(&self, job_id: &str, update: impl FnOnce(&mut JobProgress)) {
        if let Some(progress) = self.inner.jobs.write().await.get_mut(job_id) {
            update(progress);
        }
    }

    async fn on_bid(&self, job_id: &str, execution_id: &str, bidder: &str) {
        let reply = {
            let mut jobs = self.inner.jobs.write().await;
            let Some(progress) = jobs.get_mut(job_id) else {
                debug!(%job_id, %execution_id, "bid for unknown job dropped");
                return;
            };
            if progress.accepted.contains_key(execution_id) || progress.rejected.contains(execution_id) {
                debug!(%job_id, %execution_id, "duplicate bid dropped");
                return;
            }

            if progress.cancel_reason.is_some() {
                progress.rejected.insert(execution_id.to_string());
                Some(REASON_JOB_CANCELLED)
            } else if progress.accepted.len() < progress.spec.concurrency as usize {
                progress
                    .accepted
                    .insert(execution_id.to_string(), bidder.to_string());
                None
            } else {
                progress.rejected.insert(execution_id.to_string());
                Some(REASON_ENOUGH_BIDS)
            }
        };

        let event = match reply {
            None => {
                info!(%job_id, %execution_id, node_id = %bidder, "bid accepted");
                JobEvent::BidAccepted {
                    job_id: job_id.to_string(),
                    execution_id: execution_id.to_string(),
                }
            }
            Some(reason) => {
                debug!(%job_id, %execution_id, node_id = %bidder, %reason, "bid rejected");
                JobEvent::BidRejected {
                    job_id: job_id.to_string(),
                    execution_id: execution_id.to_string(),
                    reason: reason.to_string(),
                }
            }
        };
        if let Err(e) = self.inner.transport.send(bidder, event).await {
            warn!(%job_id, %execution_id, error = %e, "failed to answer bid");
        }
    }

    async fn on_result(&self, job_id: &str, execution_id: &str, proposer: &str, output: &RunOutput) {
        let spec = {
            let jobs = self.inner.jobs.read().await;
            let Some(progress) = jobs.get(job_id) else {
                return;
            };
            if !progress.accepted.contains_key(execution_id)
                || progress.verified.contains_key(execution_id)
            {
                debug!(%job_id, %execution_id, "result proposal dropped");
                return;
            }
            progress.spec.clone()
        };

        let verdict = self.inner.verifier.verify(&spec, execution_id, output).await;

        // A duplicate proposal may have been verified while we were busy.
        {
            let mut jobs = self.inner.jobs.write().await;
            let Some(progress) = jobs.get_mut(job_id) else {
                return;
            };
            if progress.verified.contains_key(execution_id) {
                return;
            }
            progress
                .verified
                .insert(execution_id.to_string(), verdict == Verdict::Passed);
        }

        let event = match verdict {
            Verdict::Passed => {
                debug!(%job_id, %execution_id, "result verified");
                JobEvent::ResultAccepted {
                    job_id: job_id.to_string(),
                    execution_id: execution_id.to_string(),
                }
            }
            Verdict::Failed(reason) => {
                warn!(%job_id, %execution_id, %reason, "result rejected");
                JobEvent::ResultRejected {
                    job_id: job_id.to_string(),
                    execution_id: execution_id.to_string(),
                    reason,
                }
            }
        };
        if let Err(e) = self.inner.transport.send(proposer, event).await {
            warn!(%job_id, %execution_id, error = %e, "failed to answer result");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobgrid_core::{PublisherType, ResourceUsageConfig};
    use jobgrid_providers::{ExitCodeVerifier, NoopVerifier};
    use jobgrid_transport::{InMemoryNetwork, Subscription};

    async fn setup(verifier: Arc<dyn Verifier>) -> (RequesterNode, Subscription, Subscription) {
        let network = InMemoryNetwork::new();
        let transport = network.join("req").await;
        let compute = network.join("compute").await;
        let compute_inbox = compute.subscribe().await.unwrap();
        let own_inbox = transport.subscribe().await.unwrap();
        let requester = RequesterNode::new("req".to_string(), Arc::new(transport), verifier);
        (requester, own_inbox, compute_inbox)
    }

    fn job(concurrency: u32) -> JobSpec {
        let mut job = JobSpec::new(&["echo", "hi"], PublisherType::Noop);
        job.resources = ResourceUsageConfig::new("1", "1Gi", "1Gi");
        job.concurrency = concurrency;
        job
    }

    fn bid(job_id: &str, execution_id: &str) -> Envelope {
        Envelope {
            from: "compute".to_string(),
            to: Some("req".to_string()),
            event: JobEvent::BidPlaced {
                job_id: job_id.to_string(),
                execution_id: execution_id.to_string(),
            },
        }
    }

    fn proposal(job_id: &str, execution_id: &str, exit_code: i32) -> Envelope {
        Envelope {
            from: "compute".to_string(),
            to: Some("req".to_string()),
            event: JobEvent::ResultProposed {
                job_id: job_id.to_string(),
                execution_id: execution_id.to_string(),
                output: RunOutput {
                    exit_code,
                    stdout: String::new(),
                    stderr: String::new(),
                    output_dir: String::new(),
                    usage: None,
                },
            },
        }
    }

    #[tokio::test]
    async fn submit_assigns_id_and_announces() {
        let (requester, _own, mut compute) = setup(Arc::new(NoopVerifier)).await;
        let job_id = requester.submit(job(1)).await.unwrap();
        assert!(job_id.starts_with("job-"));

        let announced = compute.next().await.unwrap();
        match announced.event {
            JobEvent::JobAnnounced { job } => {
                assert_eq!(job.id, job_id);
                assert_eq!(job.requester_node_id, "req");
                assert!(job.created_at > 0);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(requester.job_ids().await, vec![job_id]);
    }

    #[tokio::test]
    async fn submit_rejects_bad_resources() {
        let (requester, _own, _compute) = setup(Arc::new(NoopVerifier)).await;
        let mut bad = job(1);
        bad.resources.memory = "lots".to_string();
        assert!(matches!(requester.submit(bad).await, Err(NodeError::Resource(_))));

        let mut empty = job(1);
        empty.entrypoint.clear();
        assert!(matches!(requester.submit(empty).await, Err(NodeError::InvalidJob(_))));

        assert!(matches!(requester.submit(job(0)).await, Err(NodeError::InvalidJob(_))));
        assert!(requester.job_ids().await.is_empty());
    }

    #[tokio::test]
    async fn accepts_up_to_concurrency_then_rejects() {
        let (requester, _own, mut compute) = setup(Arc::new(NoopVerifier)).await;
        let job_id = requester.submit(job(1)).await.unwrap();
        compute.next().await.unwrap();

        requester.handle_envelope(&bid(&job_id, "exec-a")).await;
        requester.handle_envelope(&bid(&job_id, "exec-b")).await;
        requester.handle_envelope(&bid(&job_id, "exec-a")).await;

        let first = compute.next().await.unwrap();
        assert!(matches!(first.event, JobEvent::BidAccepted { ref execution_id, .. } if execution_id == "exec-a"));
        let second = compute.next().await.unwrap();
        match second.event {
            JobEvent::BidRejected { execution_id, reason, .. } => {
                assert_eq!(execution_id, "exec-b");
                assert_eq!(reason, REASON_ENOUGH_BIDS);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(compute.try_next().is_none());

        let progress = requester.job(&job_id).await.unwrap();
        assert_eq!(progress.accepted.len(), 1);
        assert!(progress.rejected.contains("exec-b"));
    }

    #[tokio::test]
    async fn bids_after_cancel_are_rejected() {
        let (requester, _own, mut compute) = setup(Arc::new(NoopVerifier)).await;
        let job_id = requester.submit(job(2)).await.unwrap();
        requester.cancel(&job_id, "changed my mind").await.unwrap();
        compute.next().await.unwrap();
        assert!(matches!(compute.next().await.unwrap().event, JobEvent::JobCancelled { .. }));

        requester.handle_envelope(&bid(&job_id, "exec-late")).await;
        match compute.next().await.unwrap().event {
            JobEvent::BidRejected { reason, .. } => assert_eq!(reason, REASON_JOB_CANCELLED),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_unknown_job_is_an_error() {
        let (requester, _own, _compute) = setup(Arc::new(NoopVerifier)).await;
        assert!(matches!(
            requester.cancel("job-nope", "x").await,
            Err(NodeError::UnknownJob(_))
        ));
    }

    #[tokio::test]
    async fn results_are_verified_once() {
        let (requester, _own, mut compute) = setup(Arc::new(ExitCodeVerifier)).await;
        let job_id = requester.submit(job(2)).await.unwrap();
        compute.next().await.unwrap();
        requester.handle_envelope(&bid(&job_id, "exec-ok")).await;
        requester.handle_envelope(&bid(&job_id, "exec-bad")).await;
        compute.next().await.unwrap();
        compute.next().await.unwrap();

        requester.handle_envelope(&proposal(&job_id, "exec-ok", 0)).await;
        requester.handle_envelope(&proposal(&job_id, "exec-ok", 0)).await;
        requester.handle_envelope(&proposal(&job_id, "exec-bad", 2)).await;

        assert!(matches!(compute.next().await.unwrap().event, JobEvent::ResultAccepted { .. }));
        match compute.next().await.unwrap().event {
            JobEvent::ResultRejected { execution_id, reason, .. } => {
                assert_eq!(execution_id, "exec-bad");
                assert_eq!(reason, "exit code 2");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(compute.try_next().is_none());
    }

    #[tokio::test]
    async fn proposals_from_unaccepted_executions_are_ignored() {
        let (requester, _own, mut compute) = setup(Arc::new(NoopVerifier)).await;
        let job_id = requester.submit(job(1)).await.unwrap();
        compute.next().await.unwrap();

        requester.handle_envelope(&proposal(&job_id, "exec-stranger", 0)).await;
        assert!(compute.try_next().is_none());
    }

    #[tokio::test]
    async fn final_outcomes_settle_the_job() {
        let (requester, _own, mut compute) = setup(Arc::new(NoopVerifier)).await;
        let job_id = requester.submit(job(1)).await.unwrap();
        compute.next().await.unwrap();
        requester.handle_envelope(&bid(&job_id, "exec-a")).await;
        assert!(!requester.job(&job_id).await.unwrap().is_settled());

        let published = Envelope {
            from: "compute".to_string(),
            to: None,
            event: JobEvent::ExecutionPublished {
                job_id: job_id.clone(),
                execution_id: "exec-a".to_string(),
                result: PublishedResult {
                    publisher: PublisherType::Noop,
                    uri: "noop://x".to_string(),
                    digest: None,
                },
            },
        };
        requester.handle_envelope(&published).await;
        requester.handle_envelope(&published).await;

        let progress = requester.job(&job_id).await.unwrap();
        assert!(progress.is_settled());
        assert_eq!(progress.published.len(), 1);
    }
}
