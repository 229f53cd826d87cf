//! Bounded fixed-delay retry decorator

use crate::pipeline::{PipelineResult, Processing};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Retry policy: bounded attempts with a fixed delay between them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    #[serde(alias = "maxAttempts", alias = "maxattempts")]
    pub max_attempts: u32,
    /// Fixed delay between attempts
    #[serde(deserialize_with = "crate::config::duration_string::deserialize")]
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Retries the inner processing while it keeps failing with errors carrying
/// the retryable marker. Non-retryable errors and exhausted attempts are
/// returned as-is; the delay between attempts races cancellation so a
/// shutdown is never held up by a sleeping retry loop.
pub struct Retry<T> {
    inner: T,
    config: RetryConfig,
    cancel: CancellationToken,
}

impl<T> Retry<T> {
    /// Wrap the inner processing with the given retry policy.
    pub fn new(inner: T, config: RetryConfig, cancel: CancellationToken) -> Self {
        Self {
            inner,
            config,
            cancel,
        }
    }
}

#[async_trait]
impl<P, T> Processing<P> for Retry<T>
where
    P: Send + Sync,
    T: Processing<P>,
{
    async fn process(&self, payload: &P) -> PipelineResult {
        let mut attempt = 1u32;

        loop {
            let err = match self.inner.process(payload).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= self.config.max_attempts.max(1) {
                return Err(err);
            }

            warn!(
                attempt,
                max_attempts = self.config.max_attempts,
                error = %err,
                "processing failed, retrying after delay",
            );

            tokio::select! {
                _ = tokio::time::sleep(self.config.delay) => {}
                _ = self.cancel.cancelled() => return Err(err),
            }

            attempt += 1;
        }
    }
}
