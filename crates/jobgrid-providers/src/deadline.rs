//! Deadline enforcement shared by every provider call.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProviderError, ProviderResult};

/// Run `fut` under `deadline`.
///
/// A zero deadline has already expired and fails without polling `fut`.
pub async fn with_deadline<T, F>(operation: &'static str, deadline: Duration, fut: F) -> ProviderResult<T>
where
    F: Future<Output = ProviderResult<T>>,
{
    if deadline.is_zero() {
        return Err(ProviderError::Timeout { operation, deadline });
    }
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| ProviderError::Timeout { operation, deadline })?
}
