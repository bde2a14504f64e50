use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the second attempt, doubled for every attempt after it.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.embedding_max_attempts.max(1),
            backoff: Duration::from_millis(config.embedding_retry_backoff_ms),
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

/// An embedder that retries transient failures of the wrapped one.
///
/// Invalid input and malformed responses are returned immediately.
pub struct Retrying<E> {
    inner: E,
    policy: RetryPolicy,
}

impl<E: Embedder> Retrying<E> {
    pub fn new(inner: E, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<E: Embedder> Embedder for Retrying<E> {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 1;
        loop {
            match self.inner.embed(texts).await {
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        "Embedding attempt {}/{} failed ({}), retrying in {:?}",
                        attempt, self.policy.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        calls: AtomicU32,
        failures: u32,
        error: fn() -> Error,
    }

    #[async_trait]
    impl Embedder for Flaky {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err((self.error)());
            }
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let flaky = Flaky {
            calls: AtomicU32::new(0),
            failures: 2,
            error: || Error::UpstreamStatus(503),
        };
        let embedder = Retrying::new(flaky, policy(3));
        let result = embedder.embed(&["hi".to_string()]).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(embedder.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let flaky = Flaky {
            calls: AtomicU32::new(0),
            failures: 10,
            error: || Error::UpstreamStatus(502),
        };
        let embedder = Retrying::new(flaky, policy(2));
        assert!(embedder.embed(&["hi".to_string()]).await.is_err());
        assert_eq!(embedder.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shape_errors_are_not_retried() {
        let flaky = Flaky {
            calls: AtomicU32::new(0),
            failures: 10,
            error: || Error::UpstreamShape("expected 1 embeddings, got 0".into()),
        };
        let embedder = Retrying::new(flaky, policy(5));
        assert!(embedder.embed(&["hi".to_string()]).await.is_err());
        assert_eq!(embedder.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(RetryPolicy::none().max_attempts, 1);
    }
}
