//! gRPC client-side plumbing: retry/backoff shared with the HTTP upstream path (§4.5).

pub mod retry_interceptor;

pub use retry_interceptor::GrpcRetryInterceptor;
