//! Retry policy for transient protocol errors

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::warn;

use crate::config::RetryConfig;
use crate::provider::{ProviderError, ProviderResult};

/// Exponential backoff with a hard ceiling.
///
/// A `FLOOD_WAIT` longer than `max_delay` is not waited out; the error is
/// returned right away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            min_delay: Duration::from_millis(config.min_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries)
            .with_jitter()
    }

    /// Run `call`, retrying transient failures
    pub async fn run<T, F, Fut>(&self, operation: &str, call: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let max_wait = self.max_delay;
        call.retry(self.backoff())
            .when(|e: &ProviderError| e.is_retryable_within(max_wait))
            .adjust(|e: &ProviderError, delay| {
                // Honour the server's FLOOD_WAIT when it asks for longer.
                delay.map(|d| e.retry_after().map_or(d, |wait| wait.max(d)))
            })
            .notify(|e: &ProviderError, delay: Duration| {
                warn!("{} failed ({}), retrying in {:?}", operation, e, delay);
            })
            .await
    }
}
