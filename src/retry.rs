//! Bounded retry with exponential backoff for resolve/acquire.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{PipelineError, PipelineResult};

/// Backoff before retry number `attempt` (0-based): base * 2^attempt, capped
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt);
    let delay = config.backoff_base_ms.saturating_mul(factor);
    Duration::from_millis(delay.min(config.backoff_max_ms.max(config.backoff_base_ms)))
}

/// Execute an async operation, retrying only retryable errors.
///
/// Non-retryable errors are returned immediately. The backoff sleep is
/// abandoned as soon as `cancel` fires.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    operation: &str,
    mut op: F,
) -> PipelineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PipelineResult<T>>,
{
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                let delay = backoff_delay(config, attempt);
                warn!(
                    operation = %operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying: {}",
                    e
                );

                tokio::select! {
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            backoff_base_ms: 1,
            backoff_max_ms: 4,
        }
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let config = RetryConfig {
            max_retries: 5,
            backoff_base_ms: 100,
            backoff_max_ms: 500,
        };
        assert_eq!(backoff_delay(&config, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(200));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(400));
        assert_eq!(backoff_delay(&config, 3), Duration::from_millis(500));
        assert_eq!(backoff_delay(&config, 40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();

        let result = with_retry(&fast_config(3), &token, "fetch", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(PipelineError::transient("http://x", "connection reset"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();

        let result: PipelineResult<()> = with_retry(&fast_config(2), &token, "fetch", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PipelineError::transient("http://x", "timeout")) }
        })
        .await;

        assert!(matches!(result, Err(PipelineError::TransientFetch { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();

        let result: PipelineResult<()> = with_retry(&fast_config(5), &token, "fetch", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PipelineError::Download("HTTP 404".into())) }
        })
        .await;

        assert!(matches!(result, Err(PipelineError::Download(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_retrying() {
        let token = CancellationToken::new();
        token.cancel();

        let result: PipelineResult<()> =
            with_retry(&fast_config(5), &token, "fetch", || async { Ok(()) }).await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }
}
