use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;

const MAX_ATTEMPTS: u32 = 8;
const BASE_DELAY_MS: u64 = 100;
const MAX_DELAY: Duration = Duration::from_secs(15);

/// Retry a store operation with exponential backoff while the failure is a
/// recognized retryable code (busy/locked/pool-timeout). Anything else
/// surfaces immediately.
pub async fn with_backoff<T, F, Fut>(op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                let delay = Duration::from_millis(
                    BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(10)),
                )
                .min(MAX_DELAY);
                warn!(
                    "{op_name}: retryable store failure (attempt {}): {err}; backing off {:?}",
                    attempt + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WarehouseError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn non_retryable_errors_surface_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_backoff("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(WarehouseError::Internal("boom".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_passes_through() {
        let result = with_backoff("test", || async { Ok(41 + 1) }).await.unwrap();
        assert_eq!(result, 42);
    }
}
