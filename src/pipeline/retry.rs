//! Bounded retry for transient failures.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::IngestError;

/// Run `op` up to `attempts` times, sleeping `backoff * attempt` between
/// tries. Only transient errors are retried; a permanent error returns
/// immediately.
pub async fn with_retry<T, F, Fut>(
    attempts: u32,
    backoff: Duration,
    mut op: F,
) -> Result<T, IngestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, IngestError>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(attempt, attempts, error = %e, "transient failure, retrying");
                tokio::time::sleep(backoff * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
