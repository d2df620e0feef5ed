use async_trait::async_trait;
use roundtable_common::{Result, RoundtableError};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::client::{LlmClient, LlmRequest, LlmResponse};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Retries transient provider failures (rate limits, 5xx) with exponential backoff.
pub struct RetryingClient<T: LlmClient> {
    inner: T,
    config: RetryConfig,
}

impl<T: LlmClient> RetryingClient<T> {
    pub fn new(inner: T, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    fn is_retryable(error: &RoundtableError) -> bool {
        let RoundtableError::Completion(message) = error else {
            return false;
        };
        let lower = message.to_lowercase();
        const MARKERS: [&str; 9] = [
            "429",
            "rate limit",
            "500",
            "502",
            "503",
            "504",
            "bad gateway",
            "service unavailable",
            "gateway timeout",
        ];
        MARKERS.iter().any(|marker| lower.contains(marker))
    }

    /// Extracts a `Retry-After: N` hint (seconds) from a provider error body.
    fn parse_retry_after(message: &str) -> Option<u64> {
        let lower = message.to_lowercase();
        let pos = lower.find("retry-after")?;
        message[pos..]
            .split_whitespace()
            .skip(1)
            .find_map(|word| {
                word.trim_end_matches(|c: char| !c.is_ascii_digit())
                    .parse::<u64>()
                    .ok()
            })
            .map(|secs| secs * 1000)
    }

    fn compute_delay(&self, attempt: u32) -> u64 {
        let base = self.config.initial_delay_ms as f64
            * self.config.backoff_multiplier.powi(attempt as i32);
        let jitter = (base * 0.1 * jitter_fraction(attempt)) as u64;
        (base as u64)
            .saturating_add(jitter)
            .min(self.config.max_delay_ms)
    }
}

/// Deterministic jitter in `[0, 1)` derived from the attempt number.
fn jitter_fraction(attempt: u32) -> f64 {
    let x = attempt.wrapping_mul(2_654_435_761);
    (x % 100) as f64 / 100.0
}

#[async_trait]
impl<T: LlmClient> LlmClient for RetryingClient<T> {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let mut attempt = 0;
        loop {
            let error = match self.inner.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if attempt >= self.config.max_retries || !Self::is_retryable(&error) {
                return Err(error);
            }

            let message = error.to_string();
            let delay = Self::parse_retry_after(&message)
                .map(|ms| ms.min(self.config.max_delay_ms))
                .unwrap_or_else(|| self.compute_delay(attempt));

            warn!(
                model = self.inner.model_name(),
                attempt = attempt + 1,
                max_retries = self.config.max_retries,
                delay_ms = delay,
                error = %message,
                "Retrying completion request"
            );

            tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
            attempt += 1;
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyClient {
        failures_left: AtomicU32,
        calls: Arc<AtomicU32>,
        error: &'static str,
    }

    #[async_trait]
    impl LlmClient for FlakyClient {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(RoundtableError::Completion(self.error.to_string()));
            }
            Ok(LlmResponse {
                content: "ok".to_string(),
                model: "flaky".to_string(),
                usage: None,
                finish_reason: None,
            })
        }
        fn model_name(&self) -> &str {
            "flaky"
        }
    }

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn retryable_error_detection() {
        let retryable = |msg: &str| {
            RetryingClient::<FlakyClient>::is_retryable(&RoundtableError::Completion(
                msg.to_string(),
            ))
        };
        assert!(retryable("OpenAI API error 429 Too Many Requests: rate limit exceeded"));
        assert!(retryable("Anthropic API error 500 Internal Server Error"));
        assert!(retryable("503 Service Unavailable"));
        assert!(!retryable("OpenAI API error 401 Unauthorized"));
        assert!(!retryable("Invalid request: missing model field"));
        assert!(!RetryingClient::<FlakyClient>::is_retryable(
            &RoundtableError::Config("500".to_string())
        ));
    }

    #[test]
    fn parse_retry_after_from_error() {
        let delay = RetryingClient::<FlakyClient>::parse_retry_after(
            "429 Too Many Requests, Retry-After: 5",
        );
        assert_eq!(delay, Some(5000));
        assert_eq!(
            RetryingClient::<FlakyClient>::parse_retry_after("429 Too Many Requests"),
            None
        );
    }

    #[test]
    fn compute_delay_respects_max() {
        let client = RetryingClient::new(
            FlakyClient {
                failures_left: AtomicU32::new(0),
                calls: Arc::new(AtomicU32::new(0)),
                error: "",
            },
            RetryConfig {
                max_retries: 5,
                initial_delay_ms: 500,
                max_delay_ms: 2000,
                backoff_multiplier: 10.0,
            },
        );
        assert!(client.compute_delay(5) <= 2000);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let client = RetryingClient::new(
            FlakyClient {
                failures_left: AtomicU32::new(1),
                calls: calls.clone(),
                error: "OpenAI API error 503 Service Unavailable",
            },
            fast_config(2),
        );

        let response = client.complete(LlmRequest::default()).await.unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let client = RetryingClient::new(
            FlakyClient {
                failures_left: AtomicU32::new(5),
                calls: calls.clone(),
                error: "OpenAI API error 401 Unauthorized",
            },
            fast_config(3),
        );

        assert!(client.complete(LlmRequest::default()).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let client = RetryingClient::new(
            FlakyClient {
                failures_left: AtomicU32::new(10),
                calls: calls.clone(),
                error: "429 rate limit",
            },
            fast_config(2),
        );

        assert!(client.complete(LlmRequest::default()).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
