//! Runtime settings derived from the `[compute]` config section.

use std::time::Duration;

use jobgrid_core::{ComputeConfig, JobSelectionPolicy, ResourceUsageData};

use crate::error::ComputeResult;

#[derive(Debug, Clone)]
pub struct ComputeSettings {
    pub capacity: ResourceUsageData,
    pub policy: JobSelectionPolicy,
    /// How long a bid waits for the requester before it is withdrawn.
    pub bid_timeout: Duration,
    pub storage_timeout: Duration,
    pub publish_timeout: Duration,
}

impl ComputeSettings {
    pub fn from_config(config: &ComputeConfig) -> ComputeResult<Self> {
        Ok(Self {
            capacity: config.capacity()?,
            policy: config.policy.clone(),
            bid_timeout: config.bid_timeout()?,
            storage_timeout: config.storage_timeout()?,
            publish_timeout: config.publish_timeout()?,
        })
    }
}
