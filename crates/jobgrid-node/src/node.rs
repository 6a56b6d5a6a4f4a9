//! A node: compute and requester roles sharing one transport and store.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use jobgrid_compute::{ComputeNode, ComputeSettings};
use jobgrid_core::NodeConfig;
use jobgrid_state::ExecutionStore;
use jobgrid_transport::{Subscription, Transport};

use crate::deps::NodeDependencies;
use crate::error::{NodeError, NodeResult};
use crate::requester::RequesterNode;

pub struct Node {
    id: String,
    config: NodeConfig,
    transport: Arc<dyn Transport>,
    store: ExecutionStore,
    compute: Option<ComputeNode>,
    requester: Option<RequesterNode>,
    subscription: Mutex<Option<Subscription>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Node {
    /// Assemble a node. Its id is the transport's host id.
    ///
    /// The node subscribes here, before [`start`](Self::start), so nothing
    /// sent after construction is missed.
    pub async fn new(config: NodeConfig, deps: NodeDependencies) -> NodeResult<Self> {
        config.validate()?;
        let id = deps.transport.host_id().to_string();

        let compute = if config.compute.enabled {
            let settings = ComputeSettings::from_config(&config.compute)?;
            Some(ComputeNode::new(id.clone(), settings, deps.compute()))
        } else {
            None
        };
        let requester = config.requester.enabled.then(|| {
            RequesterNode::new(id.clone(), deps.transport.clone(), deps.verifier.clone())
        });

        let subscription = deps.transport.subscribe().await?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            id,
            config,
            transport: deps.transport,
            store: deps.store,
            compute,
            requester,
            subscription: Mutex::new(Some(subscription)),
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn store(&self) -> &ExecutionStore {
        &self.store
    }

    pub fn compute(&self) -> Option<&ComputeNode> {
        self.compute.as_ref()
    }

    pub fn requester(&self) -> Option<&RequesterNode> {
        self.requester.as_ref()
    }

    /// The requester role, or an error if it is disabled.
    pub fn requester_or_err(&self) -> NodeResult<&RequesterNode> {
        self.requester
            .as_ref()
            .ok_or_else(|| NodeError::RequesterDisabled(self.id.clone()))
    }

    /// Start routing inbound envelopes to the enabled roles.
    pub async fn start(&self) -> NodeResult<()> {
        let mut subscription = self
            .subscription
            .lock()
            .await
            .take()
            .ok_or(NodeError::AlreadyStarted)?;

        let mut tasks = self.tasks.lock().await;
        if let Some(compute) = &self.compute {
            tasks.push(compute.start().await?);
        }

        let compute = self.compute.clone();
        let requester = self.requester.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        let node_id = self.id.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                let envelope = tokio::select! {
                    next = subscription.next() => match next {
                        Some(envelope) => envelope,
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                };
                debug!(%node_id, from = %envelope.from, kind = envelope.event.kind(), "envelope received");
                if let Some(compute) = &compute {
                    compute.handle_envelope(&envelope).await;
                }
                if let Some(requester) = &requester {
                    requester.handle_envelope(&envelope).await;
                }
            }
            debug!(%node_id, "envelope router stopped");
        }));

        info!(
            node_id = %self.id,
            compute = self.compute.is_some(),
            requester = self.requester.is_some(),
            "node started"
        );
        Ok(())
    }

    /// Stop routing and wait for the node's tasks to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(compute) = &self.compute {
            compute.shutdown();
        }
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        info!(node_id = %self.id, "node stopped");
    }
}
