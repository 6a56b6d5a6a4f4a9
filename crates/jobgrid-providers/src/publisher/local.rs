use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::info;
use walkdir::WalkDir;

use jobgrid_core::{PublishedResult, PublisherType};
use jobgrid_state::Execution;

use super::Publisher;
use crate::deadline::with_deadline;
use crate::error::{ProviderError, ProviderResult};

/// Copies results to `<root>/<job_id>/<execution_id>` on this host.
#[derive(Debug, Clone)]
pub struct LocalPublisher {
    root: PathBuf,
}

impl LocalPublisher {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn destination(&self, execution: &Execution) -> PathBuf {
        self.root.join(&execution.job_id).join(&execution.id)
    }
}

/// Copy `src` into `dest` and return a sha256 over the relative paths and
/// contents of every file, visited in sorted order.
fn copy_and_digest(src: &Path, dest: &Path) -> ProviderResult<String> {
    std::fs::create_dir_all(dest)?;
    let mut hasher = Sha256::new();

    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.map_err(|e| ProviderError::Io(e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| ProviderError::Execution(format!("bad result path: {e}")))?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            let bytes = std::fs::read(entry.path())?;
            hasher.update(relative.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            hasher.update(&bytes);
            std::fs::write(&target, &bytes)?;
        }
    }

    Ok(hex::encode(hasher.finalize()))
}

#[async_trait]
impl Publisher for LocalPublisher {
    async fn is_installed(&self) -> ProviderResult<bool> {
        Ok(true)
    }

    async fn publish(
        &self,
        execution: &Execution,
        result_dir: &Path,
        deadline: Duration,
    ) -> ProviderResult<PublishedResult> {
        let src = result_dir.to_path_buf();
        let dest = self.destination(execution);
        let digest = with_deadline("publish", deadline, async {
            if tokio::fs::metadata(&src).await.is_err() {
                return Err(ProviderError::NotFound(src.display().to_string()));
            }
            let (src, dest) = (src.clone(), dest.clone());
            tokio::task::spawn_blocking(move || copy_and_digest(&src, &dest))
                .await
                .map_err(|e| ProviderError::Execution(format!("publish task failed: {e}")))?
        })
        .await?;

        info!(
            job_id = %execution.job_id,
            execution_id = %execution.id,
            dest = %dest.display(),
            "results published locally"
        );
        Ok(PublishedResult {
            publisher: PublisherType::Local,
            uri: format!("file://{}", dest.display()),
            digest: Some(digest),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobgrid_core::ResourceUsageData;

    fn execution() -> Execution {
        Execution::new(
            "exec-1".to_string(),
            "job-1".to_string(),
            "node-1".to_string(),
            ResourceUsageData::default(),
            0,
        )
    }

    #[tokio::test]
    async fn copies_results_and_digests() {
        let results = tempfile::tempdir().unwrap();
        std::fs::write(results.path().join("stdout"), "hello\n").unwrap();
        std::fs::create_dir(results.path().join("out")).unwrap();
        std::fs::write(results.path().join("out/data.csv"), "a,b\n").unwrap();

        let root = tempfile::tempdir().unwrap();
        let publisher = LocalPublisher::new(root.path().to_path_buf());
        let published = publisher
            .publish(&execution(), results.path(), Duration::from_secs(5))
            .await
            .unwrap();

        let dest = root.path().join("job-1/exec-1");
        assert_eq!(std::fs::read_to_string(dest.join("stdout")).unwrap(), "hello\n");
        assert_eq!(std::fs::read_to_string(dest.join("out/data.csv")).unwrap(), "a,b\n");
        assert_eq!(published.publisher, PublisherType::Local);
        assert!(published.uri.starts_with("file://"));
        assert_eq!(published.digest.as_ref().map(|d| d.len()), Some(64));

        // Same content, same digest.
        let again = publisher
            .publish(&execution(), results.path(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(again.digest, published.digest);
    }

    #[tokio::test]
    async fn missing_result_dir_fails() {
        let root = tempfile::tempdir().unwrap();
        let publisher = LocalPublisher::new(root.path().to_path_buf());
        let err = publisher
            .publish(&execution(), Path::new("/no/such/results"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn zero_deadline_never_succeeds() {
        let results = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let publisher = LocalPublisher::new(root.path().to_path_buf());
        let err = publisher
            .publish(&execution(), results.path(), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout { operation: "publish", .. }));
    }
}
