//! gRPC retry interceptor (§4.5): a unary-call wrapper that retries on
//! `RESOURCE_EXHAUSTED`/`UNAVAILABLE`/`INTERNAL`, sharing the HTTP path's exponential
//! backoff schedule via [`RetryPolicy::run_with`].
//!
//! `tonic::service::Interceptor` is a synchronous, per-request metadata hook — it has no
//! way to re-issue a call after the first attempt fails. So instead of implementing that
//! trait, this wraps the unary call itself: construct once per service with its
//! `RetryPolicy`, then call [`GrpcRetryInterceptor::call`] with a closure that performs one
//! attempt. This is deliberately transport-agnostic, matching the teacher's `RetryPolicy`
//! being shared rather than duplicated between the HTTP and gRPC paths.

use tokio_util::sync::CancellationToken;
use tonic::{Code, Status};

use crate::upstream::retry::{is_retryable_grpc_code, RetryPolicy};

/// Wraps a unary gRPC call in the shared retry/backoff schedule.
pub struct GrpcRetryInterceptor {
    policy: RetryPolicy,
}

impl GrpcRetryInterceptor {
    /// Wrap `policy` as a gRPC call retrier.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Run `f`, retrying while its error is a retryable gRPC status code, until the
    /// policy's retry budget or wall-clock ceiling is exhausted, or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns the last `Status` from `f` once retries are exhausted or the status code
    /// is not retryable. Returns `Status::cancelled` if `cancel` fires while waiting for
    /// a backoff timer.
    pub async fn call<F, Fut, T>(&self, cancel: &CancellationToken, f: F) -> Result<T, Status>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, Status>>,
    {
        self.policy
            .run_with(
                cancel,
                |status: &Status| is_retryable_grpc_code(status.code() as i32),
                || Status::new(Code::Cancelled, "retry cancelled"),
                f,
            )
            .await
    }
}
