//! Several in-process nodes on one in-memory network.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use jobgrid_core::NodeConfig;
use jobgrid_state::{ExecutionSource, ExecutionState, JobState, ResolverPolicy, StateResolver};
use jobgrid_transport::{InMemoryNetwork, NetworkOptions, Transport};

use crate::deps::NodeDependencies;
use crate::error::{NodeError, NodeResult};
use crate::node::Node;

#[derive(Debug, Clone)]
pub struct DevStackOptions {
    pub nodes: usize,
    /// Applied to every node; each gets its own id `node-<i>`.
    pub config: NodeConfig,
    pub network: NetworkOptions,
}

impl Default for DevStackOptions {
    fn default() -> Self {
        Self {
            nodes: 3,
            config: NodeConfig::default(),
            network: NetworkOptions::default(),
        }
    }
}

pub struct DevStack {
    network: InMemoryNetwork,
    nodes: Vec<Node>,
}

impl DevStack {
    /// Build and start the stack. `inject` supplies each node's
    /// dependencies from its index and transport.
    pub async fn new<F>(options: DevStackOptions, mut inject: F) -> NodeResult<Self>
    where
        F: FnMut(usize, Arc<dyn Transport>) -> NodeResult<NodeDependencies>,
    {
        let network = InMemoryNetwork::with_options(options.network);
        let mut nodes = Vec::with_capacity(options.nodes);

        // Every node subscribes before any starts, so no announcement is lost.
        for i in 0..options.nodes {
            let node_id = format!("node-{i}");
            let transport: Arc<dyn Transport> = Arc::new(network.join(&node_id).await);
            let mut config = options.config.clone();
            config.node.id = Some(node_id);
            nodes.push(Node::new(config, inject(i, transport)?).await?);
        }
        for node in &nodes {
            node.start().await?;
        }

        info!(nodes = nodes.len(), "devstack started");
        Ok(Self { network, nodes })
    }

    /// Noop backends and in-memory stores on every node.
    pub async fn noop(options: DevStackOptions) -> NodeResult<Self> {
        Self::new(options, |_, transport| NodeDependencies::noop(transport)).await
    }

    /// Standard backends, node `i` rooted at `root/node-<i>`.
    pub async fn standard(options: DevStackOptions, root: &Path) -> NodeResult<Self> {
        Self::new(options, |i, transport| {
            NodeDependencies::standard(transport, &root.join(format!("node-{i}")))
        })
        .await
    }

    pub fn network(&self) -> &InMemoryNetwork {
        &self.network
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.id().to_string()).collect()
    }

    pub fn get_node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id() == node_id)
    }

    /// The first node with the requester role enabled.
    pub fn requester_node(&self) -> NodeResult<&Node> {
        self.nodes
            .iter()
            .find(|n| n.requester().is_some())
            .ok_or_else(|| NodeError::RequesterDisabled("devstack".to_string()))
    }

    /// A resolver reading every node's store.
    pub fn resolver(&self, policy: ResolverPolicy) -> StateResolver {
        let sources: Vec<Arc<dyn ExecutionSource>> = self
            .nodes
            .iter()
            .map(|n| Arc::new(n.store().clone()) as Arc<dyn ExecutionSource>)
            .collect();
        StateResolver::new(sources, policy)
    }

    /// Poll the resolver until the job reaches a terminal state.
    pub async fn wait_for_job(
        &self,
        job_id: &str,
        policy: ResolverPolicy,
        timeout: Duration,
    ) -> NodeResult<JobState> {
        let resolver = self.resolver(policy);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let state = resolver.resolve(job_id)?;
            if state.state.is_terminal() {
                return Ok(state);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(NodeError::JobTimeout {
                    job_id: job_id.to_string(),
                    state: state.state,
                });
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// One line per node: roles, capacity and committed usage.
    pub async fn node_info(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            let _ = write!(out, "{}", node.id());
            match node.compute() {
                Some(compute) => {
                    let _ = write!(
                        out,
                        "  compute capacity=[{}] committed=[{}]",
                        compute.capacity(),
                        compute.committed_usage().await
                    );
                }
                None => out.push_str("  compute=off"),
            }
            out.push_str(if node.requester().is_some() {
                "  requester=on"
            } else {
                "  requester=off"
            });
            out.push('\n');
        }
        out
    }

    pub async fn print_node_info(&self) {
        for line in self.node_info().await.lines() {
            info!("{line}");
        }
    }

    pub async fn shutdown(&self) {
        for node in &self.nodes {
            node.shutdown().await;
        }
        info!("devstack stopped");
    }

    /// How many executions of the job each state holds, across all nodes.
    pub fn state_counts(&self, job_id: &str) -> NodeResult<Vec<(ExecutionState, usize)>> {
        let state = self.resolver(ResolverPolicy::default()).resolve(job_id)?;
        let mut counts: Vec<(ExecutionState, usize)> = Vec::new();
        for summary in &state.executions {
            match counts.iter_mut().find(|(s, _)| *s == summary.state) {
                Some((_, n)) => *n += 1,
                None => counts.push((summary.state, 1)),
            }
        }
        counts.sort();
        Ok(counts)
    }
}
