//! Upstream service registration and invocation: the adapters that turn a configured
//! HTTP/GraphQL/bundle service into live MCP tools, plus the shared plumbing
//! (credentials, retry/backoff, call policy) they all build on.
//!
//! # Modules
//!
//! - [`config`] — declarative per-service configuration types
//! - [`registry`] — [`registry::ServiceRegistry`], the `UpstreamAdapter` trait
//! - [`auth`] — [`auth::Authenticator`], outbound credential application
//! - [`retry`] — [`retry::RetryPolicy`], exponential backoff with retryable-code classification
//! - [`policy`] — [`policy::ExportPolicy`]/[`policy::CallPolicy`] regex gating
//! - [`http`] — the HTTP/REST upstream adapter
//! - [`graphql`] — the GraphQL upstream adapter

pub mod auth;
pub mod config;
pub mod graphql;
pub mod http;
pub mod policy;
pub mod registry;
pub mod retry;

pub use auth::Authenticator;
pub use graphql::GraphqlUpstream;
pub use http::HttpUpstream;
pub use policy::{CallPolicy, ExportPolicy};
pub use registry::{ServiceInfo, ServiceRegistry, UpstreamAdapter};
pub use retry::RetryPolicy;
