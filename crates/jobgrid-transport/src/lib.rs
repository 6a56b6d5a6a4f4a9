//! jobgrid-transport: how nodes talk to each other.
//!
//! The core only needs three operations from the network: broadcast an
//! event, send one to a specific node, and subscribe to what arrives.
//! [`Transport`] captures exactly that. Subscriptions are live only: an
//! event published before `subscribe` is never seen.
//!
//! [`InMemoryNetwork`] connects in-process nodes for tests and the
//! devstack. It can deliver every message twice to exercise idempotent
//! handling.

pub mod error;
pub mod event;
pub mod memory;

pub use error::{TransportError, TransportResult};
pub use event::{Envelope, JobEvent};
pub use memory::{InMemoryNetwork, InMemoryTransport, NetworkOptions};

use async_trait::async_trait;
use tokio::sync::mpsc;

use jobgrid_core::NodeId;

#[async_trait]
pub trait Transport: Send + Sync {
    fn host_id(&self) -> &str;

    /// Deliver to every subscribed node, including this one.
    async fn broadcast(&self, event: JobEvent) -> TransportResult<()>;

    /// Deliver to one node.
    async fn send(&self, to: &str, event: JobEvent) -> TransportResult<()>;

    async fn subscribe(&self) -> TransportResult<Subscription>;
}

/// A live, ordered feed of envelopes addressed to one node.
pub struct Subscription {
    node_id: NodeId,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Subscription {
    pub fn new(node_id: NodeId, rx: mpsc::UnboundedReceiver<Envelope>) -> Self {
        Self { node_id, rx }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Next inbound envelope; `None` once the network has shut down.
    pub async fn next(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Next envelope if one is already queued.
    pub fn try_next(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}
