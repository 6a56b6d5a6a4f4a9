//! Local devstack commands.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use jobgrid_core::{JobSpec, NodeConfig};
use jobgrid_node::{DevStack, DevStackOptions};
use jobgrid_state::{JobState, ResolverPolicy};

async fn start(nodes: usize, config: NodeConfig, data_dir: Option<&Path>) -> anyhow::Result<DevStack> {
    let options = DevStackOptions {
        nodes,
        config,
        ..DevStackOptions::default()
    };
    let stack = match data_dir {
        Some(root) => {
            std::fs::create_dir_all(root)?;
            info!(path = ?root, "devstack using standard backends");
            DevStack::standard(options, root).await?
        }
        None => DevStack::noop(options).await?,
    };
    Ok(stack)
}

/// Run a devstack until Ctrl-C.
pub async fn run_devstack(
    nodes: usize,
    config: NodeConfig,
    data_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!(nodes, "JobGrid devstack starting");
    let stack = start(nodes, config, data_dir.as_deref()).await?;
    print!("{}", stack.node_info().await);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown signal received");

    stack.print_node_info().await;
    stack.shutdown().await;
    Ok(())
}

/// Submit one job and wait for its resolved final state.
pub async fn run_job(
    job_path: &Path,
    nodes: usize,
    config: NodeConfig,
    data_dir: Option<PathBuf>,
    timeout: Duration,
) -> anyhow::Result<JobState> {
    let text = std::fs::read_to_string(job_path)
        .with_context(|| format!("failed to read job spec {}", job_path.display()))?;
    let job = JobSpec::from_toml_str(&text)
        .with_context(|| format!("invalid job spec {}", job_path.display()))?;
    let policy = ResolverPolicy {
        min_successes: config.requester.min_successes,
    };

    let stack = start(nodes, config, data_dir.as_deref()).await?;
    let requester = stack.requester_node()?.requester_or_err()?.clone();
    let job_id = requester.submit(job).await?;
    info!(%job_id, "job submitted, waiting for a final state");

    let result = stack.wait_for_job(&job_id, policy, timeout).await;
    stack.shutdown().await;
    Ok(result?)
}
