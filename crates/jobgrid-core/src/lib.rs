//! jobgrid-core: shared types for the JobGrid compute marketplace.
//!
//! Everything here is plain data: job and storage specs, typed resource
//! quantities with their string conversion, the node configuration file,
//! and ID generation. No I/O beyond reading a config file.

pub mod config;
pub mod ids;
pub mod resources;
pub mod types;

pub use config::{ComputeConfig, ConfigError, ConfigResult, NodeConfig, RequesterConfig};
pub use ids::{epoch_millis, generate_id};
pub use resources::{ResourceError, ResourceResult, ResourceUsageConfig, ResourceUsageData, convert, fits};
pub use types::*;
