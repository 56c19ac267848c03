//! Bounded waits on external dependencies.

use std::time::Duration;

use tracing::warn;

use crate::error::{GatehouseError, GatehouseResult};

/// Run `fut` with a deadline. A timeout surfaces as a retryable
/// `DependencyUnavailable`, never as success.
pub async fn with_deadline<T, F>(
    dependency: &'static str,
    limit: Duration,
    fut: F,
) -> GatehouseResult<T>
where
    F: Future<Output = GatehouseResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(dependency, timeout_ms = limit.as_millis() as u64, "dependency call timed out");
            Err(GatehouseError::unavailable(
                dependency,
                format!("timed out after {}ms", limit.as_millis()),
            ))
        }
    }
}
