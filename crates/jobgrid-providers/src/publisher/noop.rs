use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use jobgrid_core::{PublishedResult, PublisherType};
use jobgrid_state::Execution;

use super::Publisher;
use crate::deadline::with_deadline;
use crate::error::ProviderResult;

/// Discards results and reports a `noop://` URI.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

#[async_trait]
impl Publisher for NoopPublisher {
    async fn is_installed(&self) -> ProviderResult<bool> {
        Ok(true)
    }

    async fn publish(
        &self,
        execution: &Execution,
        _result_dir: &Path,
        deadline: Duration,
    ) -> ProviderResult<PublishedResult> {
        with_deadline("publish", deadline, async {
            Ok(PublishedResult {
                publisher: PublisherType::Noop,
                uri: format!("noop://{}/{}", execution.job_id, execution.id),
                digest: None,
            })
        })
        .await
    }
}
