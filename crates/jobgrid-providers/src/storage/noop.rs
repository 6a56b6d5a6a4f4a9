//! Storage test double.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use jobgrid_core::StorageSpec;

use super::{PreparedStorage, StorageProvider};
use crate::deadline::with_deadline;
use crate::error::ProviderResult;

/// Reports a fixed size and locality, and "prepares" volumes at their
/// declared path after an optional delay.
#[derive(Debug, Clone, Default)]
pub struct NoopStorage {
    local: bool,
    size: u64,
    delay: Duration,
}

impl NoopStorage {
    pub fn with_local(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl StorageProvider for NoopStorage {
    async fn is_installed(&self) -> ProviderResult<bool> {
        Ok(true)
    }

    async fn has_storage_locally(&self, _spec: &StorageSpec) -> ProviderResult<bool> {
        Ok(self.local)
    }

    async fn get_volume_size(&self, _spec: &StorageSpec, deadline: Duration) -> ProviderResult<u64> {
        with_deadline("get_volume_size", deadline, async {
            self.pause().await;
            Ok(self.size)
        })
        .await
    }

    async fn prepare(&self, spec: &StorageSpec, deadline: Duration) -> ProviderResult<PreparedStorage> {
        with_deadline("prepare", deadline, async {
            self.pause().await;
            Ok(PreparedStorage {
                spec: spec.clone(),
                local_path: PathBuf::from(&spec.path),
            })
        })
        .await
    }

    async fn cleanup(&self, _prepared: &PreparedStorage) -> ProviderResult<()> {
        Ok(())
    }
}
