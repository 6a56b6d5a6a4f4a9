//! Content embedded directly in the job spec.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use jobgrid_core::StorageSpec;

use super::{PreparedStorage, StorageProvider};
use crate::deadline::with_deadline;
use crate::error::{ProviderError, ProviderResult};

/// Writes inline content to `<root>/<sha256>/<n>`, one file per prepare, so
/// executions with identical inputs never share a file.
#[derive(Debug, Clone)]
pub struct InlineStorage {
    root: PathBuf,
    next: Arc<AtomicU64>,
}

impl InlineStorage {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            next: Arc::new(AtomicU64::new(0)),
        }
    }

    fn content<'a>(&self, spec: &'a StorageSpec) -> ProviderResult<&'a str> {
        spec.inline
            .as_deref()
            .ok_or_else(|| ProviderError::InvalidSpec(format!("inline volume {} has no content", spec.path)))
    }

    fn content_path(&self, content: &str) -> PathBuf {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(hex::encode(Sha256::digest(content.as_bytes())))
            .join(format!("{}-{n}", std::process::id()))
    }
}

#[async_trait]
impl StorageProvider for InlineStorage {
    async fn is_installed(&self) -> ProviderResult<bool> {
        Ok(true)
    }

    async fn has_storage_locally(&self, _spec: &StorageSpec) -> ProviderResult<bool> {
        Ok(false)
    }

    async fn get_volume_size(&self, spec: &StorageSpec, deadline: Duration) -> ProviderResult<u64> {
        let content = self.content(spec)?;
        with_deadline("get_volume_size", deadline, async { Ok(content.len() as u64) }).await
    }

    async fn prepare(&self, spec: &StorageSpec, deadline: Duration) -> ProviderResult<PreparedStorage> {
        let content = self.content(spec)?;
        let local_path = self.content_path(content);
        with_deadline("prepare", deadline, async {
            if let Some(dir) = local_path.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }
            tokio::fs::write(&local_path, content.as_bytes()).await?;
            debug!(path = %local_path.display(), bytes = content.len(), "inline volume written");
            Ok(())
        })
        .await?;

        Ok(PreparedStorage {
            spec: spec.clone(),
            local_path,
        })
    }

    async fn cleanup(&self, prepared: &PreparedStorage) -> ProviderResult<()> {
        match tokio::fs::remove_file(&prepared.local_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        // Fails while other copies of the same content remain.
        if let Some(dir) = prepared.local_path.parent() {
            let _ = tokio::fs::remove_dir(dir).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prepare_writes_content_addressed_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = InlineStorage::new(dir.path().to_path_buf());
        let spec = StorageSpec::inline("line one\nline two\n", "/inputs/data");

        let prepared = storage.prepare(&spec, Duration::from_secs(1)).await.unwrap();
        let written = std::fs::read_to_string(&prepared.local_path).unwrap();
        assert_eq!(written, "line one\nline two\n");
        let digest = prepared.local_path.parent().unwrap().file_name().unwrap();
        assert_eq!(digest.to_str().unwrap().len(), 64);

        storage.cleanup(&prepared).await.unwrap();
        assert!(!prepared.local_path.exists());
        assert!(!prepared.local_path.parent().unwrap().exists());
        // Cleaning up twice is fine.
        storage.cleanup(&prepared).await.unwrap();
    }

    #[tokio::test]
    async fn identical_content_is_not_shared_between_prepares() {
        let dir = tempfile::tempdir().unwrap();
        let storage = InlineStorage::new(dir.path().to_path_buf());
        let first = StorageSpec::inline("same", "/inputs/a");
        let second = StorageSpec::inline("same", "/inputs/b");

        let a = storage.prepare(&first, Duration::from_secs(1)).await.unwrap();
        let b = storage.prepare(&second, Duration::from_secs(1)).await.unwrap();
        assert_ne!(a.local_path, b.local_path);

        storage.cleanup(&a).await.unwrap();
        assert!(!a.local_path.exists());
        assert_eq!(std::fs::read_to_string(&b.local_path).unwrap(), "same");

        storage.cleanup(&b).await.unwrap();
        assert!(!b.local_path.exists());
    }

    #[tokio::test]
    async fn size_is_content_length() {
        let storage = InlineStorage::new(PathBuf::from("/tmp/unused"));
        let spec = StorageSpec::inline("12345", "/x");
        assert_eq!(
            storage.get_volume_size(&spec, Duration::from_secs(1)).await.unwrap(),
            5
        );
    }

    #[tokio::test]
    async fn zero_deadline_never_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let storage = InlineStorage::new(dir.path().to_path_buf());
        let spec = StorageSpec::inline("x", "/x");

        assert!(matches!(
            storage.get_volume_size(&spec, Duration::ZERO).await,
            Err(ProviderError::Timeout { .. })
        ));
        assert!(matches!(
            storage.prepare(&spec, Duration::ZERO).await,
            Err(ProviderError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn missing_content_is_invalid() {
        let storage = InlineStorage::new(PathBuf::from("/tmp/unused"));
        let mut spec = StorageSpec::inline("x", "/x");
        spec.inline = None;
        assert!(matches!(
            storage.prepare(&spec, Duration::from_secs(1)).await,
            Err(ProviderError::InvalidSpec(_))
        ));
    }
}
