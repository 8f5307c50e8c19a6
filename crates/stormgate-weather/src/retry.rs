//! Retry executor with exponential backoff, jitter and per-attempt timeout.
//!
//! This module retries transient provider failures:
//! - Network errors
//! - Timeouts (including the executor's own per-attempt timeout)
//! - HTTP 429, 502, 503, 504
//!
//! It does NOT retry:
//! - Any other HTTP status
//! - Malformed responses
//!
//! The executor knows nothing about providers or circuits; the fallback
//! orchestrator decides what an exhausted retry budget means.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use stormgate_core::{ProviderError, RetryConfig};

/// Error classification for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Should retry the request
    Retry,
    /// Should not retry - permanent failure
    NoRetry,
}

/// Classify a provider error
pub fn retry_decision(error: &ProviderError) -> RetryDecision {
    if error.is_retryable() {
        RetryDecision::Retry
    } else {
        RetryDecision::NoRetry
    }
}

/// Exponential part of the delay: `min(max_delay, base_delay * 2^attempt)`
pub fn exponential_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt);
    let delay_ms = config.base_delay_ms.saturating_mul(factor);
    Duration::from_millis(delay_ms.min(config.max_delay_ms))
}

/// Delay to wait after failed attempt `attempt` (0 is the first try).
///
/// Adds uniform jitter in `[0, jitter_ms]`, so the result never exceeds
/// `max_delay_ms + jitter_ms`.
pub fn calculate_backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let jitter = if config.jitter_ms > 0 {
        rand::thread_rng().gen_range(0..=config.jitter_ms)
    } else {
        0
    };
    exponential_delay(config, attempt) + Duration::from_millis(jitter)
}

/// Execute a provider operation with retry logic.
///
/// # Arguments
/// * `config` - Retry configuration
/// * `operation` - Closure producing a fresh attempt future each call
///
/// # Returns
/// The first successful value, the first non-retryable error, or the last
/// retryable error once `max_retries` additional attempts are spent.
///
/// # Example
/// ```ignore
/// let reading = with_retry(&RetryConfig::default(), || provider.fetch(coords)).await?;
/// ```
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let timeout = Duration::from_millis(config.request_timeout_ms);
    let mut attempt: u32 = 0;

    loop {
        let result = match tokio::time::timeout(timeout, operation()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!("Attempt {} exceeded {:?} timeout", attempt + 1, timeout);
                Err(ProviderError::Timeout)
            }
        };

        let error = match result {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!("Request succeeded after {} retries", attempt);
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if retry_decision(&error) == RetryDecision::NoRetry {
            tracing::debug!("Non-retryable error ({}): {}", error.kind(), error);
            return Err(error);
        }

        if attempt >= config.max_retries {
            tracing::warn!(
                "All {} attempts exhausted, last error: {}",
                attempt + 1,
                error
            );
            return Err(error);
        }

        let delay = calculate_backoff_delay(config, attempt);
        tracing::warn!(
            "Retryable error on attempt {} of {}: {}, waiting {:?}",
            attempt + 1,
            config.max_retries + 1,
            error,
            delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn config(max_retries: u32, base: u64, max: u64, jitter: u64) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay_ms: base,
            max_delay_ms: max,
            jitter_ms: jitter,
            request_timeout_ms: 1_000,
        }
    }

    #[test]
    fn test_delay_calculation() {
        let config = config(3, 100, 5000, 0);

        assert_eq!(calculate_backoff_delay(&config, 0), Duration::from_millis(100));
        assert_eq!(calculate_backoff_delay(&config, 1), Duration::from_millis(200));
        assert_eq!(calculate_backoff_delay(&config, 2), Duration::from_millis(400));
        assert_eq!(calculate_backoff_delay(&config, 3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = config(10, 100, 1000, 0);

        assert_eq!(calculate_backoff_delay(&config, 4), Duration::from_millis(1000));
        assert_eq!(calculate_backoff_delay(&config, 10), Duration::from_millis(1000));
        assert_eq!(calculate_backoff_delay(&config, 200), Duration::from_millis(1000));
    }

    #[test]
    fn test_delay_bounded_with_jitter() {
        let config = config(10, 100, 1000, 250);

        for attempt in 0..20 {
            let delay = calculate_backoff_delay(&config, attempt);
            let floor = exponential_delay(&config, attempt);
            assert!(delay >= floor);
            assert!(delay <= floor + Duration::from_millis(250));
            assert!(delay <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn test_exponential_part_non_decreasing() {
        let config = config(10, 150, 4000, 0);
        let mut previous = Duration::ZERO;
        for attempt in 0..16 {
            let delay = exponential_delay(&config, attempt);
            assert!(delay >= previous);
            previous = delay;
        }
    }

    #[test]
    fn test_retry_decisions() {
        assert_eq!(retry_decision(&ProviderError::Timeout), RetryDecision::Retry);
        assert_eq!(
            retry_decision(&ProviderError::http(503, "unavailable")),
            RetryDecision::Retry
        );
        assert_eq!(
            retry_decision(&ProviderError::http(401, "bad key")),
            RetryDecision::NoRetry
        );
        assert_eq!(
            retry_decision(&ProviderError::InvalidResponse("truncated".into())),
            RetryDecision::NoRetry
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = with_retry(&config(3, 100, 1000, 0), || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ProviderError>(42)
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = with_retry(&config(3, 100, 1000, 0), || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(ProviderError::http(503, "busy"))
                } else {
                    Ok("reading")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("reading"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let started = tokio::time::Instant::now();
        let result: Result<(), _> = with_retry(&config(3, 100, 1000, 0), || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::http(404, "not found"))
            }
        })
        .await;

        assert_eq!(result, Err(ProviderError::http(404, "not found")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let started = tokio::time::Instant::now();
        let result: Result<(), _> = with_retry(&config(2, 100, 1000, 0), || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Network(format!("reset {}", n)))
            }
        })
        .await;

        assert_eq!(result, Err(ProviderError::Network("reset 2".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms of backoff
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(310), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retryable() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = with_retry(&config(1, 100, 1000, 0), || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok::<_, ProviderError>(n)
            }
        })
        .await;

        assert_eq!(result, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_means_single_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), _> = with_retry(&config(0, 100, 1000, 0), || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Timeout)
            }
        })
        .await;

        assert_eq!(result, Err(ProviderError::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
