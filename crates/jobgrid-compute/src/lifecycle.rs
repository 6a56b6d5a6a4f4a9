//! Applying events to executions and triggering their side effects.

use std::path::PathBuf;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use jobgrid_core::{PublishedResult, PublisherType, RunOutput};
use jobgrid_providers::{ProviderError, ProviderResult};
use jobgrid_state::{Execution, ExecutionEvent, ExecutionState, StateError, transition};
use jobgrid_transport::JobEvent;

use crate::node::{ComputeNode, Dispatch};

impl ComputeNode {
    /// Apply one event to this node's execution of a job.
    ///
    /// Returns `true` once the execution is terminal, or if this node has
    /// no execution for the job.
    pub(crate) async fn process(&self, dispatch: Dispatch) -> bool {
        let inner = &self.inner;
        let Dispatch {
            job_id,
            execution_id,
            mut event,
        } = dispatch;

        let found = match inner.store.find_execution(&job_id, &inner.node_id) {
            Ok(found) => found,
            Err(e) => {
                error!(%job_id, error = %e, "failed to read execution store");
                return false;
            }
        };
        let found = match found {
            // An admission may be recording this job right now. Creation
            // happens under the ledger lock, so look again holding it.
            None if matches!(event, ExecutionEvent::Cancel { .. }) => {
                let _ledger = inner.ledger.lock().await;
                inner.store.find_execution(&job_id, &inner.node_id).ok().flatten()
            }
            found => found,
        };
        let Some(execution) = found else {
            debug!(%job_id, event = event.name(), "no execution on this node; event dropped");
            return true;
        };
        if let Some(expected) = &execution_id {
            if expected != &execution.id {
                debug!(%job_id, %expected, "event for another execution dropped");
                return execution.state.is_terminal();
            }
        }

        if let ExecutionEvent::Cancel { reason } = &event {
            if self.defer_cancel(&execution, reason).await {
                return false;
            }
        }
        if is_completion(&event) {
            if let Some(reason) = inner.pending_cancel.lock().await.remove(&execution.id) {
                debug!(execution_id = %execution.id, "in-flight work returned; applying cancel");
                event = ExecutionEvent::Cancel { reason };
            }
        }

        let to = match transition(&execution, &event) {
            Ok(to) => to,
            Err(e) => {
                debug!(execution_id = %execution.id, error = %e, "event dropped");
                return execution.state.is_terminal();
            }
        };

        let applied = if to.is_terminal() {
            let mut ledger = inner.ledger.lock().await;
            let applied = inner.store.apply_event(&job_id, &execution.id, &event);
            if applied.is_ok() {
                ledger.release(&execution.id);
            }
            applied
        } else {
            inner.store.apply_event(&job_id, &execution.id, &event)
        };

        let (execution, record) = match applied {
            Ok(r) => r,
            Err(StateError::InvalidTransition { .. }) => {
                debug!(execution_id = %execution.id, event = event.name(), "event dropped");
                return execution.state.is_terminal();
            }
            Err(e) => {
                error!(execution_id = %execution.id, error = %e, "failed to apply event");
                return false;
            }
        };
        debug!(
            %job_id,
            execution_id = %execution.id,
            from = %record.from,
            to = %record.to,
            "execution advanced"
        );

        self.on_entered(&execution).await;
        execution.state.is_terminal()
    }

    /// Running and Publishing have work in flight; a cancel there waits
    /// for that work to return. Returns `true` if the cancel was deferred.
    async fn defer_cancel(&self, execution: &Execution, reason: &str) -> bool {
        if !matches!(
            execution.state,
            ExecutionState::Running | ExecutionState::Publishing
        ) {
            return false;
        }
        self.inner
            .pending_cancel
            .lock()
            .await
            .insert(execution.id.clone(), reason.to_string());
        if let Some(signal) = self.inner.running.lock().await.get(&execution.id) {
            let _ = signal.send(true);
        }
        info!(execution_id = %execution.id, state = %execution.state, "cancel requested for in-flight execution");
        true
    }

    /// Side effects of entering a state.
    async fn on_entered(&self, execution: &Execution) {
        let inner = &self.inner;
        let job_id = execution.job_id.as_str();
        let execution_id = execution.id.as_str();

        match execution.state {
            ExecutionState::BidAccepted => {
                self.post(job_id, Some(execution_id), ExecutionEvent::RunStarted);
            }
            ExecutionState::Running => self.spawn_run(execution).await,
            ExecutionState::WaitingVerification => {
                let Some(output) = execution.result.clone() else {
                    return;
                };
                let requester = self.requester_of(job_id).await;
                let event = JobEvent::ResultProposed {
                    job_id: job_id.to_string(),
                    execution_id: execution_id.to_string(),
                    output,
                };
                if let Err(e) = inner.transport.send(&requester, event).await {
                    warn!(%job_id, %execution_id, error = %e, "failed to propose result");
                }
            }
            ExecutionState::ResultAccepted => {
                self.post(job_id, Some(execution_id), ExecutionEvent::PublishStarted);
            }
            ExecutionState::Publishing => self.spawn_publish(execution).await,
            ExecutionState::Completed | ExecutionState::Failed | ExecutionState::Cancelled => {
                self.on_terminal(execution).await;
            }
            ExecutionState::Undefined | ExecutionState::Created => {}
        }
    }

    async fn on_terminal(&self, execution: &Execution) {
        let inner = &self.inner;
        inner.pending_cancel.lock().await.remove(&execution.id);
        inner.running.lock().await.remove(&execution.id);
        inner.jobs.write().await.remove(&execution.job_id);

        let job_id = execution.job_id.clone();
        let execution_id = execution.id.clone();
        let event = match execution.state {
            ExecutionState::Completed => {
                info!(%job_id, %execution_id, "execution completed");
                let result = execution.published.clone().unwrap_or_else(|| PublishedResult {
                    publisher: PublisherType::Noop,
                    uri: String::new(),
                    digest: None,
                });
                JobEvent::ExecutionPublished {
                    job_id,
                    execution_id,
                    result,
                }
            }
            ExecutionState::Failed => {
                let error = execution.last_error.clone().unwrap_or_default();
                warn!(%job_id, %execution_id, %error, "execution failed");
                JobEvent::ExecutionFailed {
                    job_id,
                    execution_id,
                    error,
                }
            }
            _ => {
                let reason = execution
                    .history
                    .last()
                    .and_then(|t| t.detail.clone())
                    .unwrap_or_else(|| "cancelled".to_string());
                info!(%job_id, %execution_id, %reason, "execution cancelled");
                JobEvent::ExecutionCancelled {
                    job_id,
                    execution_id,
                    reason,
                }
            }
        };

        if let Err(e) = inner.transport.broadcast(event).await {
            warn!(execution_id = %execution.id, error = %e, "failed to announce final state");
        }
    }

    async fn requester_of(&self, job_id: &str) -> String {
        self.inner
            .jobs
            .read()
            .await
            .get(job_id)
            .map(|job| job.requester_node_id.clone())
            .unwrap_or_default()
    }

    fn output_dir(&self, execution: &Execution) -> PathBuf {
        self.inner
            .workdir
            .join("executions")
            .join(&execution.id)
            .join("outputs")
    }

    /// Prepare inputs and run the job off the event path.
    async fn spawn_run(&self, execution: &Execution) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.inner
            .running
            .lock()
            .await
            .insert(execution.id.clone(), cancel_tx);

        let node = self.clone();
        let job_id = execution.job_id.clone();
        let execution_id = execution.id.clone();
        let output_dir = self.output_dir(execution);
        tokio::spawn(async move {
            let event = match node.run_job(&job_id, &execution_id, output_dir, cancel_rx).await {
                Ok(output) => ExecutionEvent::RunCompleted { output },
                Err(e) => ExecutionEvent::RunFailed {
                    error: e.to_string(),
                },
            };
            node.inner.running.lock().await.remove(&execution_id);
            node.post(&job_id, Some(&execution_id), event);
        });
    }

    async fn run_job(
        &self,
        job_id: &str,
        execution_id: &str,
        output_dir: PathBuf,
        cancel: watch::Receiver<bool>,
    ) -> ProviderResult<RunOutput> {
        let inner = &self.inner;
        let job = inner
            .jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("job spec {job_id}")))?;

        let inputs = inner
            .storages
            .prepare_all(&job.inputs, inner.settings.storage_timeout)
            .await?;
        info!(%job_id, %execution_id, inputs = inputs.len(), "run started");
        let result = inner
            .executor
            .run(&job, execution_id, &inputs, &output_dir, cancel)
            .await;
        inner.storages.cleanup_all(&inputs).await;
        result
    }

    /// Publish results off the event path.
    async fn spawn_publish(&self, execution: &Execution) {
        let node = self.clone();
        let execution = execution.clone();
        tokio::spawn(async move {
            let event = match node.publish(&execution).await {
                Ok(result) => ExecutionEvent::PublishSucceeded { result },
                Err(e) => ExecutionEvent::PublishFailed {
                    error: e.to_string(),
                },
            };
            node.post(&execution.job_id, Some(&execution.id), event);
        });
    }

    async fn publish(&self, execution: &Execution) -> ProviderResult<PublishedResult> {
        let inner = &self.inner;
        let publisher_type = inner
            .jobs
            .read()
            .await
            .get(&execution.job_id)
            .map(|job| job.publisher)
            .ok_or_else(|| ProviderError::NotFound(format!("job spec {}", execution.job_id)))?;
        let publisher = inner.publishers.get(publisher_type)?;
        let result_dir = execution
            .result
            .as_ref()
            .map(|r| PathBuf::from(&r.output_dir))
            .unwrap_or_else(|| self.output_dir(execution));
        publisher
            .publish(execution, &result_dir, inner.settings.publish_timeout)
            .await
    }
}

/// Events that report the end of in-flight work.
fn is_completion(event: &ExecutionEvent) -> bool {
    matches!(
        event,
        ExecutionEvent::RunCompleted { .. }
            | ExecutionEvent::RunFailed { .. }
            | ExecutionEvent::PublishSucceeded { .. }
            | ExecutionEvent::PublishFailed { .. }
    )
}
