//! Retry logic with exponential backoff for inbound backend calls.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::debug;

use crate::Error;
use crate::config::RetryConfig;

/// Retry policy configuration
#[derive(Clone)]
pub struct RetryPolicy {
    /// Whether retries are enabled
    pub enabled: bool,
    /// Maximum attempts
    pub max_attempts: u32,
    /// Initial backoff
    pub initial_backoff: Duration,
    /// Maximum backoff
    pub max_backoff: Duration,
    /// Backoff multiplier
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Create from config
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_attempts: config.max_attempts,
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            multiplier: config.multiplier,
        }
    }

    /// Build a `backon` exponential-backoff builder from this policy. Retries are capped
    /// at `max_attempts` additional attempts after the first.
    #[must_use]
    pub fn builder(&self) -> ExponentialBuilder {
        #[allow(clippy::cast_possible_truncation)]
        ExponentialBuilder::default()
            .with_min_delay(self.initial_backoff)
            .with_max_delay(self.max_backoff)
            .with_factor(self.multiplier as f32)
            .with_max_times(self.max_attempts as usize)
    }
}

/// Execute a future with retry logic
///
/// # Errors
///
/// Returns the last error from `f` if all retry attempts are exhausted or
/// the error is not retryable.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, name: &str, f: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    if !policy.enabled {
        let mut f = f;
        return f().await;
    }

    let operation = name.to_string();
    f.retry(policy.builder())
        .when(is_retryable)
        .notify(move |err: &Error, dur: Duration| {
            debug!(
                operation = %operation,
                delay_ms = dur.as_millis(),
                error = %err,
                "Retrying after backoff"
            );
        })
        .await
}

/// Check if an error is retryable
fn is_retryable(error: &Error) -> bool {
    matches!(
        error,
        Error::Transport(_) | Error::BackendTimeout(_) | Error::Http(_) | Error::Io(_)
    )
}
