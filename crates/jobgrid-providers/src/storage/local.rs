//! Directories and files already present on the compute host.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use walkdir::WalkDir;

use jobgrid_core::StorageSpec;

use super::{PreparedStorage, StorageProvider};
use crate::deadline::with_deadline;
use crate::error::{ProviderError, ProviderResult};

/// Serves `local_directory` volumes in place. Nothing is copied, so
/// cleanup leaves the host path alone.
#[derive(Debug, Clone, Default)]
pub struct LocalDirectoryStorage;

impl LocalDirectoryStorage {
    pub fn new() -> Self {
        Self
    }

    fn source_path(spec: &StorageSpec) -> ProviderResult<PathBuf> {
        spec.source_path
            .as_deref()
            .map(PathBuf::from)
            .ok_or_else(|| {
                ProviderError::InvalidSpec(format!("local volume {} has no source path", spec.path))
            })
    }
}

/// Total size of every regular file under `path`.
fn directory_size(path: &Path) -> ProviderResult<u64> {
    let mut total = 0u64;
    for entry in WalkDir::new(path) {
        let entry = entry.map_err(|e| ProviderError::Io(e.into()))?;
        if entry.file_type().is_file() {
            let metadata = entry.metadata().map_err(|e| ProviderError::Io(e.into()))?;
            total = total.saturating_add(metadata.len());
        }
    }
    Ok(total)
}

#[async_trait]
impl StorageProvider for LocalDirectoryStorage {
    async fn is_installed(&self) -> ProviderResult<bool> {
        Ok(true)
    }

    async fn has_storage_locally(&self, spec: &StorageSpec) -> ProviderResult<bool> {
        let path = Self::source_path(spec)?;
        Ok(tokio::fs::metadata(&path).await.is_ok())
    }

    async fn get_volume_size(&self, spec: &StorageSpec, deadline: Duration) -> ProviderResult<u64> {
        let path = Self::source_path(spec)?;
        with_deadline("get_volume_size", deadline, async move {
            if tokio::fs::metadata(&path).await.is_err() {
                return Err(ProviderError::NotFound(path.display().to_string()));
            }
            tokio::task::spawn_blocking(move || directory_size(&path))
                .await
                .map_err(|e| ProviderError::Execution(format!("size task failed: {e}")))?
        })
        .await
    }

    async fn prepare(&self, spec: &StorageSpec, deadline: Duration) -> ProviderResult<PreparedStorage> {
        let path = Self::source_path(spec)?;
        let local_path = with_deadline("prepare", deadline, async move {
            match tokio::fs::metadata(&path).await {
                Ok(_) => Ok(path),
                Err(_) => Err(ProviderError::NotFound(path.display().to_string())),
            }
        })
        .await?;

        Ok(PreparedStorage {
            spec: spec.clone(),
            local_path,
        })
    }

    async fn cleanup(&self, _prepared: &PreparedStorage) -> ProviderResult<()> {
        Ok(())
    }
}
