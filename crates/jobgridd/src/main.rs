//! jobgridd: the JobGrid daemon.
//!
//! Runs nodes in-process over the in-memory network:
//! - `devstack` keeps N nodes up until Ctrl-C
//! - `run` submits one job to a fresh devstack and prints its resolved state
//! - `config scaffold` writes a node configuration file
//! - `id` prints the configured node id, or a fresh one
//!
//! # Usage
//!
//! ```text
//! jobgridd devstack --nodes 3 --config node.toml
//! jobgridd run --job job.toml --nodes 2 --data-dir /tmp/jobgrid
//! jobgridd config scaffold --cpu 2 --memory 4Gi --disk 20Gi
//! ```

mod local;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use jobgrid_core::{NodeConfig, generate_id};

#[derive(Parser)]
#[command(name = "jobgridd", about = "JobGrid daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run N in-process nodes until interrupted.
    Devstack {
        #[arg(long, default_value = "3")]
        nodes: usize,

        /// Node configuration applied to every node.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Use real processes and on-disk stores rooted here instead of
        /// noop backends.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Submit one job to a local devstack and print its resolved state.
    Run {
        /// Job spec (TOML).
        #[arg(long)]
        job: PathBuf,

        #[arg(long, default_value = "1")]
        nodes: usize,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// How long to wait for a final state, e.g. "30s".
        #[arg(long, default_value = "60s")]
        timeout: String,
    },

    /// Node configuration helpers.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Print the node id from the config, or generate one.
    Id {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print (or write) a configuration file with the given capacity.
    Scaffold {
        #[arg(long)]
        node_id: Option<String>,

        #[arg(long, default_value = "1")]
        cpu: String,

        #[arg(long, default_value = "1Gi")]
        memory: String,

        #[arg(long, default_value = "10Gi")]
        disk: String,

        /// Write here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,jobgridd=debug,jobgrid=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<NodeConfig> {
    match path {
        Some(path) => Ok(NodeConfig::from_file(path)?),
        None => Ok(NodeConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Devstack {
            nodes,
            config,
            data_dir,
        } => {
            let config = load_config(config.as_ref())?;
            local::run_devstack(nodes, config, data_dir).await
        }
        Command::Run {
            job,
            nodes,
            config,
            data_dir,
            timeout,
        } => {
            let config = load_config(config.as_ref())?;
            let timeout = jobgrid_core::config::parse_duration(&timeout)
                .ok_or_else(|| anyhow::anyhow!("invalid timeout: {timeout}"))?;
            let state = local::run_job(&job, nodes, config, data_dir, timeout).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        Command::Config {
            command:
                ConfigCommand::Scaffold {
                    node_id,
                    cpu,
                    memory,
                    disk,
                    output,
                },
        } => {
            let node_id = node_id.unwrap_or_else(|| generate_id("node", "scaffold"));
            let config = NodeConfig::scaffold(&node_id, &cpu, &memory, &disk);
            config.validate()?;
            let text = config.to_toml_string()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, text)?;
                    tracing::info!(path = ?path, "config written");
                }
                None => print!("{text}"),
            }
            Ok(())
        }
        Command::Id { config } => {
            let config = load_config(config.as_ref())?;
            let id = config
                .node
                .id
                .unwrap_or_else(|| generate_id("node", &std::process::id().to_string()));
            println!("{id}");
            Ok(())
        }
    }
}
