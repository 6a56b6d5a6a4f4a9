//! Admission of announced jobs and the bid window.

use tracing::{debug, error, info, warn};

use jobgrid_admission::{AdmissionError, BidRequest};
use jobgrid_core::{JobSpec, ResourceUsageData, convert, epoch_millis, generate_id};
use jobgrid_state::{Execution, ExecutionEvent};
use jobgrid_transport::JobEvent;

use crate::node::ComputeNode;

impl ComputeNode {
    /// Decide on an announced job and, if accepted, reserve, record and bid.
    pub(crate) async fn admit(&self, job: JobSpec) {
        let inner = &self.inner;
        let job_id = job.id.clone();

        if inner.cancelled_jobs.read().await.contains(&job_id) {
            debug!(%job_id, "ignoring announcement for cancelled job");
            return;
        }
        match inner.store.find_execution(&job_id, &inner.node_id) {
            Ok(Some(_)) => {
                debug!(%job_id, "duplicate announcement ignored");
                return;
            }
            Ok(None) => {}
            Err(e) => {
                error!(%job_id, error = %e, "failed to read execution store");
                return;
            }
        }

        let required = match self.required_resources(&job).await {
            Some(r) => r,
            None => return,
        };

        let inputs_local = match inner.storages.all_local(&job.inputs).await {
            Ok(local) => local,
            Err(e) => {
                warn!(%job_id, error = %e, "not bidding: inputs unavailable");
                return;
            }
        };

        let committed = inner.ledger.lock().await.committed();
        let request = BidRequest {
            job: &job,
            required,
            inputs_local,
        };
        let decision = inner
            .admission
            .should_bid(&request, &inner.settings.capacity, &committed)
            .await;
        if !decision.accept {
            info!(%job_id, node_id = %inner.node_id, reason = %decision.reason, "not bidding");
            return;
        }

        let Some(execution) = self.reserve_and_record(&job, required).await else {
            return;
        };

        inner
            .jobs
            .write()
            .await
            .insert(job_id.clone(), job.clone());

        let bid = JobEvent::BidPlaced {
            job_id: job_id.clone(),
            execution_id: execution.id.clone(),
        };
        if let Err(e) = inner.transport.send(&job.requester_node_id, bid).await {
            warn!(%job_id, execution_id = %execution.id, error = %e, "failed to send bid");
        } else {
            info!(%job_id, execution_id = %execution.id, node_id = %inner.node_id, "bid placed");
        }

        self.start_bid_timer(&job_id, &execution.id);
    }

    /// Convert the job's declared resources; a zero disk is sized from the inputs.
    async fn required_resources(&self, job: &JobSpec) -> Option<ResourceUsageData> {
        let mut required = match convert(&job.resources) {
            Ok(r) => r,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "not bidding: invalid resources");
                return None;
            }
        };

        if required.disk == 0 && !job.inputs.is_empty() {
            match self
                .inner
                .storages
                .total_volume_size(&job.inputs, self.inner.settings.storage_timeout)
                .await
            {
                Ok(size) => required.disk = size,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "not bidding: cannot size inputs");
                    return None;
                }
            }
        }
        Some(required)
    }

    /// Reserve resources and create the execution in one critical section.
    async fn reserve_and_record(&self, job: &JobSpec, required: ResourceUsageData) -> Option<Execution> {
        let inner = &self.inner;
        let mut ledger = inner.ledger.lock().await;

        // Re-check under the lock: a concurrent copy of this announcement or
        // a cancel may have landed since the unlocked checks.
        if inner.cancelled_jobs.read().await.contains(&job.id) {
            return None;
        }
        match inner.store.find_execution(&job.id, &inner.node_id) {
            Ok(None) => {}
            Ok(Some(_)) => return None,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "failed to read execution store");
                return None;
            }
        }

        let execution_id = generate_id("exec", &format!("{}:{}", inner.node_id, job.id));
        match ledger.try_reserve(&execution_id, required) {
            Ok(()) => {}
            Err(AdmissionError::InsufficientResources { remaining, .. }) => {
                info!(job_id = %job.id, %remaining, "not bidding: capacity taken by a concurrent bid");
                return None;
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "reservation failed");
                return None;
            }
        }

        let execution = Execution::new(
            execution_id.clone(),
            job.id.clone(),
            inner.node_id.clone(),
            required,
            epoch_millis(),
        );
        if let Err(e) = inner.store.create_execution(&execution) {
            ledger.release(&execution_id);
            error!(job_id = %job.id, error = %e, "failed to record execution");
            return None;
        }
        Some(execution)
    }

    /// Withdraw the bid if the requester has not answered in time.
    fn start_bid_timer(&self, job_id: &str, execution_id: &str) {
        let node = self.clone();
        let job_id = job_id.to_string();
        let execution_id = execution_id.to_string();
        let timeout = self.inner.settings.bid_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            node.post(&job_id, Some(&execution_id), ExecutionEvent::BidTimedOut);
        });
    }
}
