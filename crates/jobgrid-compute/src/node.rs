//! ComputeNode: construction, event routing, and the public surface.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use jobgrid_admission::{AdmissionControl, CapacityLedger};
use jobgrid_core::{ExecutionId, JobId, JobSpec, NodeId, ResourceUsageData};
use jobgrid_providers::{Executor, PublisherRegistry, StorageRegistry};
use jobgrid_state::{Execution, ExecutionEvent, ExecutionStore};
use jobgrid_transport::{Envelope, JobEvent, Transport};

use crate::error::{ComputeError, ComputeResult};
use crate::settings::ComputeSettings;

/// Collaborators a compute node is assembled from.
#[derive(Clone)]
pub struct ComputeDependencies {
    pub transport: Arc<dyn Transport>,
    pub store: ExecutionStore,
    pub storages: StorageRegistry,
    pub publishers: PublisherRegistry,
    pub executor: Arc<dyn Executor>,
    /// Scratch space for execution outputs.
    pub workdir: PathBuf,
}

/// One event bound for a job's worker.
#[derive(Debug, Clone)]
pub(crate) struct Dispatch {
    pub job_id: JobId,
    /// When set, the event only applies to this execution.
    pub execution_id: Option<ExecutionId>,
    pub event: ExecutionEvent,
}

/// How many cancelled job ids a node remembers.
const CANCELLED_JOBS_RETAINED: usize = 4096;

/// Recently cancelled job ids. The oldest are forgotten first.
#[derive(Debug)]
pub(crate) struct CancelledJobs {
    order: VecDeque<JobId>,
    ids: HashSet<JobId>,
    capacity: usize,
}

impl CancelledJobs {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&mut self, job_id: &str) {
        if self.ids.contains(job_id) {
            return;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(job_id.to_string());
        self.ids.insert(job_id.to_string());
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.ids.contains(job_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
}

pub(crate) struct ComputeInner {
    pub node_id: NodeId,
    pub settings: ComputeSettings,
    pub admission: AdmissionControl,
    pub transport: Arc<dyn Transport>,
    pub store: ExecutionStore,
    pub storages: StorageRegistry,
    pub publishers: PublisherRegistry,
    pub executor: Arc<dyn Executor>,
    pub workdir: PathBuf,
    /// Committed usage. Also serializes execution creation.
    pub ledger: Mutex<CapacityLedger>,
    /// Specs of jobs this node has a live execution for.
    pub jobs: RwLock<HashMap<JobId, JobSpec>>,
    pub cancelled_jobs: RwLock<CancelledJobs>,
    /// Cancel signals for in-flight runs.
    pub running: Mutex<HashMap<ExecutionId, watch::Sender<bool>>>,
    /// Cancel reasons waiting for an in-flight run or publish to return.
    pub pending_cancel: Mutex<HashMap<ExecutionId, String>>,
    pub events_tx: mpsc::UnboundedSender<Dispatch>,
    live_workers: AtomicUsize,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<Dispatch>>>,
    shutdown_tx: watch::Sender<bool>,
}

/// The compute role of a node. Cheap to clone.
#[derive(Clone)]
pub struct ComputeNode {
    pub(crate) inner: Arc<ComputeInner>,
}

impl ComputeNode {
    pub fn new(node_id: NodeId, settings: ComputeSettings, deps: ComputeDependencies) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        let admission = AdmissionControl::from_policy(settings.policy.clone());
        let ledger = CapacityLedger::new(settings.capacity);

        Self {
            inner: Arc::new(ComputeInner {
                node_id,
                settings,
                admission,
                transport: deps.transport,
                store: deps.store,
                storages: deps.storages,
                publishers: deps.publishers,
                executor: deps.executor,
                workdir: deps.workdir,
                ledger: Mutex::new(ledger),
                jobs: RwLock::new(HashMap::new()),
                cancelled_jobs: RwLock::new(CancelledJobs::with_capacity(CANCELLED_JOBS_RETAINED)),
                running: Mutex::new(HashMap::new()),
                pending_cancel: Mutex::new(HashMap::new()),
                events_tx,
                live_workers: AtomicUsize::new(0),
                events_rx: Mutex::new(Some(events_rx)),
                shutdown_tx,
            }),
        }
    }

    /// Replace the admission control, e.g. to install custom probes.
    ///
    /// Only valid before the node is shared.
    pub fn with_admission(mut self, admission: AdmissionControl) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.admission = admission;
        }
        self
    }

    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    pub fn store(&self) -> &ExecutionStore {
        &self.inner.store
    }

    pub fn capacity(&self) -> ResourceUsageData {
        self.inner.settings.capacity
    }

    pub async fn committed_usage(&self) -> ResourceUsageData {
        self.inner.ledger.lock().await.committed()
    }

    pub async fn reservation_count(&self) -> usize {
        self.inner.ledger.lock().await.reservation_count()
    }

    /// Job workers currently alive.
    pub fn active_workers(&self) -> usize {
        self.inner.live_workers.load(Ordering::SeqCst)
    }

    /// Jobs whose spec is held for a live execution.
    pub async fn tracked_jobs(&self) -> usize {
        self.inner.jobs.read().await.len()
    }

    /// Cancelled job ids still remembered.
    pub async fn remembered_cancellations(&self) -> usize {
        self.inner.cancelled_jobs.read().await.len()
    }

    /// This node's execution for a job, if it bid on it.
    pub fn execution(&self, job_id: &str) -> ComputeResult<Option<Execution>> {
        Ok(self.inner.store.find_execution(job_id, &self.inner.node_id)?)
    }

    /// Start the event dispatcher. Call once.
    pub async fn start(&self) -> ComputeResult<JoinHandle<()>> {
        let rx = self
            .inner
            .events_rx
            .lock()
            .await
            .take()
            .ok_or(ComputeError::AlreadyStarted)?;
        let node = self.clone();
        let shutdown = self.inner.shutdown_tx.subscribe();
        info!(node_id = %self.inner.node_id, capacity = %self.inner.settings.capacity, "compute node started");
        Ok(tokio::spawn(async move { node.dispatch_loop(rx, shutdown).await }))
    }

    pub fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
    }

    /// Feed one inbound envelope to the compute role.
    pub async fn handle_envelope(&self, envelope: &Envelope) {
        if let Some(to) = &envelope.to {
            if to != &self.inner.node_id {
                return;
            }
        }

        match &envelope.event {
            JobEvent::JobAnnounced { job } => {
                let node = self.clone();
                let job = job.clone();
                tokio::spawn(async move { node.admit(job).await });
            }
            JobEvent::BidAccepted {
                job_id,
                execution_id,
            } => self.post(job_id, Some(execution_id), ExecutionEvent::BidAccepted),
            JobEvent::BidRejected {
                job_id,
                execution_id,
                reason,
            } => self.post(
                job_id,
                Some(execution_id),
                ExecutionEvent::BidRejected {
                    reason: reason.clone(),
                },
            ),
            JobEvent::ResultAccepted {
                job_id,
                execution_id,
            } => self.post(job_id, Some(execution_id), ExecutionEvent::VerificationPassed),
            JobEvent::ResultRejected {
                job_id,
                execution_id,
                reason,
            } => self.post(
                job_id,
                Some(execution_id),
                ExecutionEvent::VerificationFailed {
                    reason: reason.clone(),
                },
            ),
            JobEvent::JobCancelled { job_id, reason } => {
                self.cancel(job_id, reason).await;
            }
            _ => {}
        }
    }

    /// Cancel this node's execution of a job, now or once in-flight work returns.
    pub async fn cancel(&self, job_id: &str, reason: &str) {
        self.inner
            .cancelled_jobs
            .write()
            .await
            .insert(job_id);
        self.post(
            job_id,
            None,
            ExecutionEvent::Cancel {
                reason: reason.to_string(),
            },
        );
    }

    /// Queue an event on the ordered channel.
    pub(crate) fn post(&self, job_id: &str, execution_id: Option<&str>, event: ExecutionEvent) {
        let dispatch = Dispatch {
            job_id: job_id.to_string(),
            execution_id: execution_id.map(str::to_string),
            event,
        };
        if self.inner.events_tx.send(dispatch).is_err() {
            debug!(%job_id, "event channel closed; dropping event");
        }
    }

    async fn dispatch_loop(
        &self,
        mut rx: mpsc::UnboundedReceiver<Dispatch>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut workers: HashMap<JobId, mpsc::UnboundedSender<Dispatch>> = HashMap::new();

        loop {
            let dispatch = tokio::select! {
                next = rx.recv() => match next {
                    Some(d) => d,
                    None => break,
                },
                _ = shutdown.changed() => {
                    info!(node_id = %self.inner.node_id, "compute node shutting down");
                    break;
                }
            };

            workers.retain(|_, tx| !tx.is_closed());
            let job_id = dispatch.job_id.clone();
            let tx = workers
                .entry(job_id.clone())
                .or_insert_with(|| self.spawn_worker(&job_id));
            if let Err(mpsc::error::SendError(dispatch)) = tx.send(dispatch) {
                // The worker finished between the prune and the send.
                let tx = self.spawn_worker(&job_id);
                let _ = tx.send(dispatch);
                workers.insert(job_id, tx);
            }
        }
    }

    /// One sequential worker per job.
    ///
    /// It exits once the job's execution on this node is terminal, or when
    /// the node has no execution for the job at all.
    fn spawn_worker(&self, job_id: &str) -> mpsc::UnboundedSender<Dispatch> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Dispatch>();
        let node = self.clone();
        let job_id = job_id.to_string();
        self.inner.live_workers.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            debug!(%job_id, "job worker started");
            while let Some(dispatch) = rx.recv().await {
                if node.process(dispatch).await {
                    break;
                }
            }
            // Anything routed here after the last event goes back through
            // the dispatcher, which starts a fresh worker for it.
            rx.close();
            while let Ok(dispatch) = rx.try_recv() {
                let _ = node.inner.events_tx.send(dispatch);
            }
            node.inner.live_workers.fetch_sub(1, Ordering::SeqCst);
            debug!(%job_id, "job worker stopped");
        });
        tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_jobs_forget_the_oldest_first() {
        let mut cancelled = CancelledJobs::with_capacity(3);
        for id in ["a", "b", "c", "d"] {
            cancelled.insert(id);
        }
        assert_eq!(cancelled.len(), 3);
        assert!(!cancelled.contains("a"));
        assert!(cancelled.contains("b"));
        assert!(cancelled.contains("d"));
    }

    #[test]
    fn cancelled_jobs_ignore_repeats() {
        let mut cancelled = CancelledJobs::with_capacity(2);
        cancelled.insert("a");
        cancelled.insert("a");
        cancelled.insert("b");
        assert_eq!(cancelled.len(), 2);
        assert!(cancelled.contains("a"));
        assert!(cancelled.contains("b"));
    }
}
