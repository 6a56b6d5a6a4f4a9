//! In-process network connecting nodes through unbounded queues.
//!
//! Each subscriber owns a FIFO queue, so a single sender's messages reach
//! every receiver in the order they were sent. Nothing is buffered for
//! nodes that have not subscribed yet.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, trace};

use jobgrid_core::NodeId;

use crate::error::{TransportError, TransportResult};
use crate::event::{Envelope, JobEvent};
use crate::{Subscription, Transport};

#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkOptions {
    /// Deliver every message twice.
    pub duplicate_delivery: bool,
}

#[derive(Default)]
struct NetworkInner {
    options: NetworkOptions,
    peers: RwLock<BTreeSet<NodeId>>,
    subscribers: RwLock<HashMap<NodeId, Vec<mpsc::UnboundedSender<Envelope>>>>,
}

/// Shared in-process network; clone freely.
#[derive(Clone, Default)]
pub struct InMemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: NetworkOptions) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                options,
                ..Default::default()
            }),
        }
    }

    /// Register a node and hand back its transport.
    pub async fn join(&self, node_id: &str) -> InMemoryTransport {
        self.inner.peers.write().await.insert(node_id.to_string());
        debug!(%node_id, "node joined in-memory network");
        InMemoryTransport {
            node_id: node_id.to_string(),
            network: self.clone(),
        }
    }

    pub async fn peers(&self) -> Vec<NodeId> {
        self.inner.peers.read().await.iter().cloned().collect()
    }

    async fn deliver(&self, envelope: Envelope) -> TransportResult<()> {
        let copies = if self.inner.options.duplicate_delivery { 2 } else { 1 };
        let mut subscribers = self.inner.subscribers.write().await;

        let targets: Vec<NodeId> = match &envelope.to {
            Some(to) => {
                if !self.inner.peers.read().await.contains(to) {
                    return Err(TransportError::UnknownPeer(to.clone()));
                }
                vec![to.clone()]
            }
            None => subscribers.keys().cloned().collect(),
        };

        for target in targets {
            if let Some(queues) = subscribers.get_mut(&target) {
                // Dropped subscriptions are pruned on the next delivery.
                queues.retain(|tx| {
                    (0..copies).all(|_| tx.send(envelope.clone()).is_ok())
                });
            }
        }
        trace!(
            from = %envelope.from,
            to = ?envelope.to,
            kind = envelope.event.kind(),
            "envelope delivered"
        );
        Ok(())
    }
}

/// One node's handle on an [`InMemoryNetwork`].
#[derive(Clone)]
pub struct InMemoryTransport {
    node_id: NodeId,
    network: InMemoryNetwork,
}

impl InMemoryTransport {
    pub fn network(&self) -> &InMemoryNetwork {
        &self.network
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn host_id(&self) -> &str {
        &self.node_id
    }

    async fn broadcast(&self, event: JobEvent) -> TransportResult<()> {
        self.network
            .deliver(Envelope {
                from: self.node_id.clone(),
                to: None,
                event,
            })
            .await
    }

    async fn send(&self, to: &str, event: JobEvent) -> TransportResult<()> {
        self.network
            .deliver(Envelope {
                from: self.node_id.clone(),
                to: Some(to.to_string()),
                event,
            })
            .await
    }

    async fn subscribe(&self) -> TransportResult<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.network
            .inner
            .subscribers
            .write()
            .await
            .entry(self.node_id.clone())
            .or_default()
            .push(tx);
        Ok(Subscription::new(self.node_id.clone(), rx))
    }
}
