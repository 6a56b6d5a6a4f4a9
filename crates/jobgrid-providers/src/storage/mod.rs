//! Storage capability trait and the registry that maps source types to it.

mod inline;
mod local;
mod noop;

pub use inline::InlineStorage;
pub use local::LocalDirectoryStorage;
pub use noop::NoopStorage;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use jobgrid_core::{StorageSourceType, StorageSpec};

use crate::error::{ProviderError, ProviderResult};

/// An input volume made available on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStorage {
    pub spec: StorageSpec,
    pub local_path: PathBuf,
}

#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Whether the backend can be used on this host at all.
    async fn is_installed(&self) -> ProviderResult<bool>;

    /// Whether the volume is already on this host, without fetching it.
    async fn has_storage_locally(&self, spec: &StorageSpec) -> ProviderResult<bool>;

    /// Size of the volume in bytes.
    async fn get_volume_size(&self, spec: &StorageSpec, deadline: Duration) -> ProviderResult<u64>;

    /// Make the volume available locally.
    async fn prepare(&self, spec: &StorageSpec, deadline: Duration) -> ProviderResult<PreparedStorage>;

    /// Release anything `prepare` created.
    async fn cleanup(&self, prepared: &PreparedStorage) -> ProviderResult<()>;
}

#[derive(Clone, Default)]
pub struct StorageRegistry {
    providers: HashMap<StorageSourceType, Arc<dyn StorageProvider>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every source type served by a [`NoopStorage`].
    pub fn noop() -> Self {
        Self::noop_with(NoopStorage::default())
    }

    pub fn noop_with(storage: NoopStorage) -> Self {
        let storage: Arc<dyn StorageProvider> = Arc::new(storage);
        let mut registry = Self::new();
        for source in [
            StorageSourceType::Ipfs,
            StorageSourceType::Inline,
            StorageSourceType::LocalDirectory,
        ] {
            registry.register(source, storage.clone());
        }
        registry
    }

    /// Inline content materialized under `root`, plus host directories.
    pub fn standard(root: &Path) -> Self {
        let mut registry = Self::new();
        registry.register(
            StorageSourceType::Inline,
            Arc::new(InlineStorage::new(root.join("inline"))),
        );
        registry.register(
            StorageSourceType::LocalDirectory,
            Arc::new(LocalDirectoryStorage::new()),
        );
        registry
    }

    pub fn register(&mut self, source: StorageSourceType, provider: Arc<dyn StorageProvider>) {
        self.providers.insert(source, provider);
    }

    pub fn get(&self, source: StorageSourceType) -> ProviderResult<Arc<dyn StorageProvider>> {
        self.providers
            .get(&source)
            .cloned()
            .ok_or(ProviderError::UnknownStorageSource(source))
    }

    /// True when every input is already on this host.
    pub async fn all_local(&self, specs: &[StorageSpec]) -> ProviderResult<bool> {
        for spec in specs {
            if !self.get(spec.source)?.has_storage_locally(spec).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Sum of all input volume sizes, each sized under `deadline`.
    pub async fn total_volume_size(&self, specs: &[StorageSpec], deadline: Duration) -> ProviderResult<u64> {
        let mut total = 0u64;
        for spec in specs {
            let size = self.get(spec.source)?.get_volume_size(spec, deadline).await?;
            total = total.saturating_add(size);
        }
        Ok(total)
    }

    /// Prepare every input. On failure, already prepared volumes are cleaned up.
    pub async fn prepare_all(
        &self,
        specs: &[StorageSpec],
        deadline: Duration,
    ) -> ProviderResult<Vec<PreparedStorage>> {
        let mut prepared = Vec::with_capacity(specs.len());
        for spec in specs {
            let result = match self.get(spec.source) {
                Ok(provider) => provider.prepare(spec, deadline).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(volume) => prepared.push(volume),
                Err(e) => {
                    self.cleanup_all(&prepared).await;
                    return Err(e);
                }
            }
        }
        Ok(prepared)
    }

    /// Best-effort cleanup; failures are logged.
    pub async fn cleanup_all(&self, prepared: &[PreparedStorage]) {
        for volume in prepared {
            let result = match self.get(volume.spec.source) {
                Ok(provider) => provider.cleanup(volume).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                debug!(path = %volume.local_path.display(), error = %e, "storage cleanup failed");
            }
        }
    }
}
