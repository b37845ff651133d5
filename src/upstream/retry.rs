//! Exponential backoff and retryable-error classification shared by the HTTP/GraphQL
//! upstream adapters (§4.5) and the gRPC retry interceptor ([`crate::grpc`]).
//!
//! Built on `backon`, the crate the workspace actually depends on (the teacher's
//! `src/failsafe/retry.rs` imports the separate, undeclared `backoff` crate — see
//! `DESIGN.md`). Randomization factor 0.5 and multiplier 1.5 are fixed per §4.5; only the
//! initial delay, cap, elapsed-time ceiling, and retry count come from configuration.

use std::time::{Duration, Instant};

use backon::{BackoffBuilder, ExponentialBuilder};
use tokio_util::sync::CancellationToken;

use crate::upstream::config::UpstreamRetryConfig;
use crate::Error;

/// HTTP statuses the spec names as retryable (§4.2.3).
pub const RETRYABLE_HTTP_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

/// gRPC status codes the spec names as retryable (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrpcRetryableCode {
    /// `RESOURCE_EXHAUSTED`
    ResourceExhausted,
    /// `UNAVAILABLE`
    Unavailable,
    /// `INTERNAL`
    Internal,
}

/// Whether an HTTP status code should be retried.
#[must_use]
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_HTTP_STATUSES.contains(&status)
}

/// Whether a `tonic::Code` (represented here as its numeric value to avoid a hard
/// `tonic` dependency in this module's signature) should be retried. 8 =
/// `RESOURCE_EXHAUSTED`, 14 = `UNAVAILABLE`, 13 = `INTERNAL`, matching `tonic::Code`'s
/// `i32` repr.
#[must_use]
pub fn is_retryable_grpc_code(code: i32) -> bool {
    matches!(code, 8 | 14 | 13)
}

/// Exponential backoff with jitter, matching §4.5: randomization 0.5, multiplier 1.5,
/// attempt cap, per-attempt cap, and wall-clock ceiling, all cancellation-aware.
pub struct RetryPolicy {
    number_of_retries: u32,
    base_backoff: Duration,
    max_backoff: Duration,
    max_elapsed_time: Duration,
}

impl RetryPolicy {
    /// Build from an [`UpstreamRetryConfig`], normalizing a negative-looking
    /// `number_of_retries` to zero (it is `u32` here so the normalization is a no-op in
    /// this representation, but callers loading from a source format that allows
    /// negative integers must clamp before constructing the config).
    #[must_use]
    pub fn new(config: &UpstreamRetryConfig) -> Self {
        Self {
            number_of_retries: config.number_of_retries,
            base_backoff: config.base_backoff,
            max_backoff: config.max_backoff,
            max_elapsed_time: config.max_elapsed_time,
        }
    }

    fn builder(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_backoff)
            .with_max_delay(self.max_backoff)
            .with_factor(1.5)
            .with_jitter()
            .with_max_times(self.number_of_retries as usize)
    }

    /// Run `f`, retrying per `should_retry` until `number_of_retries` is exhausted,
    /// `max_elapsed_time` is reached, or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns the last error from `f` once retries are exhausted, the elapsed-time
    /// ceiling is reached, or `should_retry` returns `false`. Returns
    /// [`Error::Internal`] if `cancel` fires while waiting for a backoff timer.
    pub async fn run<F, Fut, T, R>(
        &self,
        cancel: &CancellationToken,
        should_retry: R,
        f: F,
    ) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
        R: Fn(&Error) -> bool,
    {
        self.run_with(cancel, should_retry, || Error::Internal("retry cancelled".to_string()), f)
            .await
    }

    /// Transport-agnostic counterpart to [`RetryPolicy::run`]: identical backoff
    /// schedule and cancellation semantics, but generic over the call's error type `E`
    /// so non-[`Error`] callers (the gRPC interceptor's `tonic::Status`) can reuse the
    /// same schedule without round-tripping through [`Error`].
    ///
    /// # Errors
    ///
    /// Returns the last error from `f` once retries are exhausted, the elapsed-time
    /// ceiling is reached, or `should_retry` returns `false`. Returns `on_cancel()` if
    /// `cancel` fires while waiting for a backoff timer.
    pub async fn run_with<F, Fut, T, E, R, C>(
        &self,
        cancel: &CancellationToken,
        should_retry: R,
        on_cancel: C,
        mut f: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        C: Fn() -> E,
    {
        let start = Instant::now();
        let mut backoff = self.builder().build();

        loop {
            if cancel.is_cancelled() {
                return Err(on_cancel());
            }

            match f().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if !should_retry(&e) {
                        return Err(e);
                    }
                    if start.elapsed() >= self.max_elapsed_time {
                        return Err(e);
                    }
                    let Some(delay) = backoff.next() else {
                        return Err(e);
                    };
                    let remaining = self.max_elapsed_time.saturating_sub(start.elapsed());
                    let delay = delay.min(remaining);
                    tokio::select! {
                        () = cancel.cancelled() => {
                            return Err(on_cancel());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn config(retries: u32, base: Duration, max: Duration, elapsed: Duration) -> UpstreamRetryConfig {
        UpstreamRetryConfig {
            number_of_retries: retries,
            base_backoff: base,
            max_backoff: max,
            max_elapsed_time: elapsed,
        }
    }

    #[test]
    fn status_classification() {
        for s in [429, 500, 502, 503, 504] {
            assert!(is_retryable_status(s), "{s} should be retryable");
        }
        for s in [200, 201, 400, 401, 404] {
            assert!(!is_retryable_status(s), "{s} should not be retryable");
        }
    }

    #[test]
    fn grpc_code_classification() {
        assert!(is_retryable_grpc_code(8));
        assert!(is_retryable_grpc_code(14));
        assert!(is_retryable_grpc_code(13));
        assert!(!is_retryable_grpc_code(0));
        assert!(!is_retryable_grpc_code(5));
    }

    #[tokio::test]
    async fn s7_total_attempts_bounded_by_retries_plus_one() {
        // Mirrors §8 S7: retries=20, base=10ms, max_backoff=100ms, max_elapsed=100ms,
        // against an always-unavailable server.
        let policy = RetryPolicy::new(&config(
            20,
            Duration::from_millis(10),
            Duration::from_millis(100),
            Duration::from_millis(100),
        ));
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts2 = Arc::clone(&attempts);
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let result: Result<(), Error> = policy
            .run(
                &cancel,
                |_| true,
                || {
                    let attempts = Arc::clone(&attempts2);
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        Err(Error::Transport("unavailable".to_string()))
                    }
                },
            )
            .await;
        assert!(result.is_err());
        assert!(start.elapsed() < Duration::from_millis(400));
        assert!(attempts.load(Ordering::SeqCst) <= 21);
    }

    #[tokio::test]
    async fn non_retryable_predicate_stops_immediately() {
        let policy = RetryPolicy::new(&config(
            5,
            Duration::from_millis(1),
            Duration::from_millis(5),
            Duration::from_secs(1),
        ));
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts2 = Arc::clone(&attempts);
        let cancel = CancellationToken::new();
        let _: Result<(), Error> = policy
            .run(
                &cancel,
                |_| false,
                || {
                    let attempts = Arc::clone(&attempts2);
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        Err(Error::Transport("nope".to_string()))
                    }
                },
            )
            .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_aborts_wait() {
        let policy = RetryPolicy::new(&config(
            10,
            Duration::from_secs(5),
            Duration::from_secs(10),
            Duration::from_secs(30),
        ));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), Error> = policy
            .run(&cancel, |_| true, || async { Err(Error::Transport("x".to_string())) })
            .await;
        assert!(result.is_err());
    }
}
