//! Shared types used across JobGrid crates.
//!
//! These describe what a requester asks for (a [`JobSpec`] with its
//! inputs and publisher) and what a compute node produces for it
//! ([`RunOutput`], [`PublishedResult`]). All types are serializable so
//! they can travel over the transport as JSON.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::resources::{ResourceUsageConfig, ResourceUsageData};

/// Unique identifier for a job, assigned by the requester.
pub type JobId = String;

/// Unique identifier for a node on the network.
pub type NodeId = String;

/// Unique identifier for one node's attempt at one job.
pub type ExecutionId = String;

// ── Storage ───────────────────────────────────────────────────────

/// Where a job's input data comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageSourceType {
    /// Content-addressed network storage, identified by CID.
    Ipfs,
    /// Content embedded directly in the job spec.
    Inline,
    /// A directory or file already present on the compute host.
    LocalDirectory,
}

impl StorageSourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageSourceType::Ipfs => "ipfs",
            StorageSourceType::Inline => "inline",
            StorageSourceType::LocalDirectory => "local_directory",
        }
    }
}

impl fmt::Display for StorageSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single input volume declared by a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSpec {
    pub source: StorageSourceType,
    /// Content identifier for `ipfs` sources.
    #[serde(default)]
    pub cid: Option<String>,
    /// Host path for `local_directory` sources.
    #[serde(default)]
    pub source_path: Option<String>,
    /// Embedded content for `inline` sources.
    #[serde(default)]
    pub inline: Option<String>,
    /// Name the volume is exposed under inside the job.
    pub path: String,
}

impl StorageSpec {
    pub fn inline(content: &str, path: &str) -> Self {
        Self {
            source: StorageSourceType::Inline,
            cid: None,
            source_path: None,
            inline: Some(content.to_string()),
            path: path.to_string(),
        }
    }

    pub fn local_directory(source_path: &str, path: &str) -> Self {
        Self {
            source: StorageSourceType::LocalDirectory,
            cid: None,
            source_path: Some(source_path.to_string()),
            inline: None,
            path: path.to_string(),
        }
    }

    pub fn ipfs(cid: &str, path: &str) -> Self {
        Self {
            source: StorageSourceType::Ipfs,
            cid: Some(cid.to_string()),
            source_path: None,
            inline: None,
            path: path.to_string(),
        }
    }
}

// ── Publisher ─────────────────────────────────────────────────────

/// Where a completed execution's results are uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublisherType {
    /// Discard results; used in tests and dry runs.
    Noop,
    /// Content-addressed network storage.
    Ipfs,
    /// A directory on the compute host.
    Local,
}

impl PublisherType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublisherType::Noop => "noop",
            PublisherType::Ipfs => "ipfs",
            PublisherType::Local => "local",
        }
    }
}

impl fmt::Display for PublisherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Job selection policy ──────────────────────────────────────────

/// Whether a compute node only bids on jobs whose data it already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locality {
    #[default]
    Anywhere,
    Local,
}

/// Node-local acceptance policy, independent of resource fit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobSelectionPolicy {
    #[serde(default)]
    pub locality: Locality,
    /// Refuse jobs that declare no input data.
    #[serde(default)]
    pub reject_stateless_jobs: bool,
    /// URL that receives the job as JSON and answers whether to bid.
    #[serde(default)]
    pub probe_http: Option<String>,
    /// Command that receives the job as JSON on stdin; exit 0 means bid.
    #[serde(default)]
    pub probe_exec: Option<String>,
}

// ── Job ───────────────────────────────────────────────────────────

fn default_concurrency() -> u32 {
    1
}

/// A unit of work announced to the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Assigned by the requester on submission.
    #[serde(default)]
    pub id: JobId,
    /// Node that submitted the job and collects bids and results.
    #[serde(default)]
    pub requester_node_id: NodeId,
    /// Command and arguments to run.
    pub entrypoint: Vec<String>,
    /// Environment variables for the job.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Resources each execution needs.
    #[serde(default)]
    pub resources: ResourceUsageConfig,
    /// Input volumes.
    #[serde(default)]
    pub inputs: Vec<StorageSpec>,
    /// Destination for results.
    pub publisher: PublisherType,
    /// How many nodes should run the job.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
    /// Unix timestamp (milliseconds) when the job was submitted.
    #[serde(default)]
    pub created_at: u64,
}

impl JobSpec {
    /// Build a job with default resources and no inputs.
    pub fn new(entrypoint: &[&str], publisher: PublisherType) -> Self {
        Self {
            id: String::new(),
            requester_node_id: String::new(),
            entrypoint: entrypoint.iter().map(|s| s.to_string()).collect(),
            env: HashMap::new(),
            resources: ResourceUsageConfig::default(),
            inputs: Vec::new(),
            publisher,
            concurrency: default_concurrency(),
            created_at: 0,
        }
    }

    /// A job is stateless when it declares no input data.
    pub fn is_stateless(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Read a job spec from a TOML file.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

// ── Results ───────────────────────────────────────────────────────

/// What an executor reports after running a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    pub exit_code: i32,
    /// Captured standard output, possibly truncated.
    #[serde(default)]
    pub stdout: String,
    /// Captured standard error, possibly truncated.
    #[serde(default)]
    pub stderr: String,
    /// Local directory holding the result files.
    pub output_dir: String,
    /// Resources the run actually used, for executors that measure them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResourceUsageData>,
}

/// Where a publisher put an execution's results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedResult {
    pub publisher: PublisherType,
    pub uri: String,
    /// Hex sha256 over the published files, when the publisher computes one.
    #[serde(default)]
    pub digest: Option<String>,
}
