//! jobgrid.toml node configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resources::{ResourceError, ResourceUsageConfig, ResourceUsageData, convert};
use crate::types::JobSelectionPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("invalid capacity: {0}")]
    Capacity(#[from] ResourceError),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub compute: ComputeConfig,
    #[serde(default)]
    pub requester: RequesterConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSection {
    /// Fixed node ID; generated at startup when absent.
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeConfig {
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Total resources this node offers to the network.
    #[serde(default = "default_capacity")]
    pub capacity: ResourceUsageConfig,
    #[serde(default)]
    pub policy: JobSelectionPolicy,
    /// How long a bid may wait for the requester's answer.
    #[serde(default = "default_bid_timeout")]
    pub bid_timeout: String,
    /// Deadline for preparing or sizing input volumes.
    #[serde(default = "default_provider_timeout")]
    pub storage_timeout: String,
    /// Deadline for publishing results.
    #[serde(default = "default_provider_timeout")]
    pub publish_timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequesterConfig {
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Completed executions needed before a job reports completed.
    #[serde(default = "default_min_successes")]
    pub min_successes: u32,
}

fn enabled() -> bool {
    true
}

fn default_capacity() -> ResourceUsageConfig {
    ResourceUsageConfig::new("1", "1Gi", "10Gi")
}

fn default_bid_timeout() -> String {
    "30s".to_string()
}

fn default_provider_timeout() -> String {
    "2m".to_string()
}

fn default_min_successes() -> u32 {
    1
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_capacity(),
            policy: JobSelectionPolicy::default(),
            bid_timeout: default_bid_timeout(),
            storage_timeout: default_provider_timeout(),
            publish_timeout: default_provider_timeout(),
        }
    }
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_successes: default_min_successes(),
        }
    }
}

impl ComputeConfig {
    pub fn capacity(&self) -> ConfigResult<ResourceUsageData> {
        Ok(convert(&self.capacity)?)
    }

    pub fn bid_timeout(&self) -> ConfigResult<Duration> {
        duration_field("compute.bid_timeout", &self.bid_timeout)
    }

    pub fn storage_timeout(&self) -> ConfigResult<Duration> {
        duration_field("compute.storage_timeout", &self.storage_timeout)
    }

    pub fn publish_timeout(&self) -> ConfigResult<Duration> {
        duration_field("compute.publish_timeout", &self.publish_timeout)
    }
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: NodeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every string-typed value eagerly so a bad file fails at startup.
    pub fn validate(&self) -> ConfigResult<()> {
        self.compute.capacity()?;
        self.compute.bid_timeout()?;
        self.compute.storage_timeout()?;
        self.compute.publish_timeout()?;
        Ok(())
    }

    /// Scaffold a config for a single node with the given capacity.
    pub fn scaffold(node_id: &str, cpu: &str, memory: &str, disk: &str) -> Self {
        NodeConfig {
            node: NodeSection {
                id: Some(node_id.to_string()),
            },
            compute: ComputeConfig {
                capacity: ResourceUsageConfig::new(cpu, memory, disk),
                ..ComputeConfig::default()
            },
            requester: RequesterConfig::default(),
        }
    }
}

fn duration_field(field: &'static str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
    })
}

/// Parse a duration string like "500ms", "30s", "5m", "1h", or bare seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok()?.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Locality;

    #[test]
    fn test_scaffold_round_trips() {
        let config = NodeConfig::scaffold("node-0", "2", "4Gi", "20Gi");
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("node-0"));
        assert!(toml_str.contains("4Gi"));

        let parsed = NodeConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(parsed.node.id.as_deref(), Some("node-0"));
        assert_eq!(parsed.compute.capacity().unwrap().cpu, 2.0);
    }

    #[test]
    fn test_parse_minimal() {
        let config = NodeConfig::from_toml_str("").unwrap();
        assert!(config.compute.enabled);
        assert!(config.requester.enabled);
        assert_eq!(config.requester.min_successes, 1);
        assert_eq!(config.compute.bid_timeout().unwrap(), Duration::from_secs(30));
        assert_eq!(config.compute.storage_timeout().unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn test_parse_policy_and_capacity() {
        let config = NodeConfig::from_toml_str(
            r#"
[compute]
bid_timeout = "500ms"

[compute.capacity]
cpu = "4"
memory = "8Gi"
disk = "100Gi"
gpu = "1"

[compute.policy]
locality = "local"
reject_stateless_jobs = true
"#,
        )
        .unwrap();

        assert_eq!(config.compute.policy.locality, Locality::Local);
        assert!(config.compute.policy.reject_stateless_jobs);
        assert_eq!(config.compute.bid_timeout().unwrap(), Duration::from_millis(500));
        let capacity = config.compute.capacity().unwrap();
        assert_eq!(capacity.gpu, 1);
        assert_eq!(capacity.memory, 8 << 30);
    }

    #[test]
    fn bad_capacity_fails_validation() {
        let err = NodeConfig::from_toml_str(
            r#"
[compute.capacity]
cpu = "many"
memory = "1Gi"
disk = "1Gi"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Capacity(_)));
    }

    #[test]
    fn bad_duration_fails_validation() {
        let err = NodeConfig::from_toml_str("[compute]\nbid_timeout = \"soon\"\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidDuration { field: "compute.bid_timeout", .. }
        ));
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobgrid.toml");
        std::fs::write(&path, "[node]\nid = \"node-7\"\n").unwrap();

        let config = NodeConfig::from_file(&path).unwrap();
        assert_eq!(config.node.id.as_deref(), Some("node-7"));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("10s"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_duration("abc"), None);
    }

    #[test]
    fn parse_duration_rejects_overflow() {
        assert_eq!(parse_duration("18446744073709551615m"), None);
        assert_eq!(parse_duration("18446744073709551615h"), None);
        assert_eq!(
            parse_duration("18446744073709551615s"),
            Some(Duration::from_secs(u64::MAX))
        );

        let err = NodeConfig::from_toml_str("[compute]\nbid_timeout = \"18446744073709551615m\"\n")
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidDuration { field: "compute.bid_timeout", .. }
        ));
    }
}
