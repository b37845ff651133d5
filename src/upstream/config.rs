//! Declarative configuration for registered upstream services.
//!
//! Mirrors the shape of [`crate::config::Config`]'s ambient sections: figment-compatible,
//! `#[serde(default)]` everywhere, durations via [`crate::config::humantime_serde`].

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::humantime_serde;

/// Top-level configuration for one registered service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Human-assigned name. Non-empty; the registry derives `sanitized_name` and `id` from it.
    pub name: String,

    /// Server-computed sanitized name, filled in by the registry on registration.
    #[serde(default)]
    pub sanitized_name: Option<String>,

    /// Server-computed id (SHA-256 of `name`), filled in by the registry on registration.
    #[serde(default)]
    pub id: Option<String>,

    /// Exactly one of the three upstream kinds.
    #[serde(flatten)]
    pub upstream: UpstreamKind,

    /// Credentials applied to every outgoing request for this service.
    #[serde(default)]
    pub upstream_auth: Option<UpstreamAuthConfig>,

    /// Connection-pool sizing for this service's upstream client.
    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,

    /// Per-call timeout and retry policy.
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Visibility gate applied to generated tools.
    #[serde(default)]
    pub tool_export_policy: ExportPolicyConfig,

    /// Visibility gate applied to generated resources.
    #[serde(default)]
    pub resource_export_policy: ExportPolicyConfig,

    /// Visibility gate applied to generated prompts.
    #[serde(default)]
    pub prompt_export_policy: ExportPolicyConfig,

    /// Invocation-time allow/deny rules, evaluated in order, first compiled set wins.
    #[serde(default)]
    pub call_policies: Vec<CallPolicyConfig>,
}

impl ServiceConfig {
    /// Lowercase the name, replace non-alphanumerics with `-`, and ensure it matches
    /// `^[a-z0-9][a-z0-9-]*$`. Used as the registry's map key.
    #[must_use]
    pub fn sanitize_name(name: &str) -> String {
        let mut out = String::with_capacity(name.len());
        for c in name.chars() {
            if c.is_ascii_alphanumeric() {
                out.push(c.to_ascii_lowercase());
            } else {
                out.push('-');
            }
        }
        // Enforce a leading alphanumeric by trimming leading dashes; an all-dash name
        // collapses to a single dash so the id is never empty.
        let trimmed = out.trim_start_matches('-');
        if trimmed.is_empty() {
            "-".to_string()
        } else {
            trimmed.to_string()
        }
    }

    /// SHA-256 of the (un-sanitized) service name, hex-encoded.
    #[must_use]
    pub fn compute_id(name: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Exactly one of the three upstream service kinds a [`ServiceConfig`] may describe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UpstreamKind {
    /// REST/HTTP upstream.
    #[serde(rename = "http_service")]
    Http(HttpServiceConfig),
    /// GraphQL upstream.
    #[serde(rename = "graphql_service")]
    Graphql(GraphqlServiceConfig),
    /// Bundled MCP-native server (container runtime is out of core scope; only the
    /// manifest reference is modeled here).
    #[serde(rename = "bundle_service")]
    Bundle(BundleServiceConfig),
}

/// HTTP/REST upstream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpServiceConfig {
    /// Base address, e.g. `https://api.example.com/v1`.
    pub address: String,
    /// TLS behavior for this upstream.
    pub tls_config: TlsConfig,
    /// Outbound proxy, if any.
    pub proxy_config: Option<ProxyConfig>,
    /// Tool definitions, in configuration order (registration sorts by call id, not this order).
    pub tools: Vec<ToolDefinition>,
    /// Call definitions keyed by call id.
    pub calls: HashMap<String, CallDefinition>,
    /// Static or tool-linked resources.
    pub resources: Vec<ResourceDefinition>,
    /// Prompt definitions.
    pub prompts: Vec<PromptDefinition>,
    /// If set, synthesize a tool for every call that has no explicit `ToolDefinition`.
    pub auto_discover_tool: bool,
}

impl Default for HttpServiceConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            tls_config: TlsConfig::default(),
            proxy_config: None,
            tools: Vec::new(),
            calls: HashMap::new(),
            resources: Vec::new(),
            prompts: Vec::new(),
            auto_discover_tool: false,
        }
    }
}

/// TLS behavior for an HTTP upstream's connection pool.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// Skip certificate verification. Never set true outside local development.
    pub insecure_skip_verify: bool,
}

/// Outbound proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy URL, e.g. `http://proxy.internal:3128`.
    pub url: String,
    /// Optional basic-auth username.
    #[serde(default)]
    pub username: Option<String>,
    /// Optional basic-auth password (or `secret:` reference — resolved by the
    /// [`crate::secrets`] pull-through cache).
    #[serde(default)]
    pub password: Option<String>,
}

/// GraphQL upstream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphqlServiceConfig {
    /// GraphQL endpoint address.
    pub address: String,
    /// TLS behavior.
    pub tls_config: TlsConfig,
    /// Per-field selection-set overrides, keyed by field name.
    pub selection_sets: HashMap<String, String>,
}

impl Default for GraphqlServiceConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            tls_config: TlsConfig::default(),
            selection_sets: HashMap::new(),
        }
    }
}

/// Reference to a bundled MCP-native server. The container runtime that executes it is
/// out of the core's scope; the core only needs the manifest path to satisfy `Register`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BundleServiceConfig {
    /// Path to the bundle manifest.
    pub manifest_path: String,
}

/// HTTP method, restricted to the set the spec allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
    /// PATCH
    Patch,
}

impl HttpMethod {
    /// The `reqwest::Method` this corresponds to.
    #[must_use]
    pub fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
            Self::Patch => reqwest::Method::PATCH,
        }
    }
}

/// Description of one backend HTTP operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallDefinition {
    /// Unique id within the service; used as the map key too, duplicated here for
    /// convenience once looked up.
    #[serde(default)]
    pub id: String,
    /// HTTP method for this call.
    pub method: HttpMethod,
    /// Path (and optional query/fragment), relative to the service address. May contain
    /// `{{param}}` placeholders.
    pub endpoint_path: String,
    /// Parameters substituted into path, query, or body.
    #[serde(default)]
    pub parameters: Vec<ParameterDef>,
    /// Pre-built input schema; if absent one is synthesized from `parameters`.
    #[serde(default)]
    pub input_schema: Option<serde_json::Value>,
    /// Pre-built output schema (advisory; not enforced by the core).
    #[serde(default)]
    pub output_schema: Option<serde_json::Value>,
    /// GraphQL-only: explicit selection set overriding the introspected default.
    #[serde(default)]
    pub selection_set: Option<String>,
}

/// A single call parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter schema (name/type/required/default).
    pub schema: ParameterSchema,
    /// If true, reject values containing `?`, `#`, or `&` instead of percent-encoding them.
    #[serde(default)]
    pub disable_escape: bool,
}

/// JSON-Schema-ish description of one parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name, also the `{{placeholder}}` token and JSON body key.
    pub name: String,
    /// JSON-Schema type name (`string`, `integer`, `number`, `boolean`, `object`, `array`).
    #[serde(rename = "type")]
    pub schema_type: String,
    /// Whether omitting this parameter is an error.
    #[serde(default)]
    pub is_required: bool,
    /// Default value used when the argument is absent.
    #[serde(default)]
    pub default_value: Option<serde_json::Value>,
}

/// Declares one tool over a call definition.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ToolDefinition {
    /// Tool name; empty falls back to `sanitize(description)` then `"op_" + call_id`.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Reference into the service's `calls` map. Duplicate `call_id`s across tools are
    /// permitted and produce distinct tools.
    pub call_id: String,
    /// If true, this tool (and the resources/prompts that reference it) is not registered.
    pub disable: bool,
    /// MCP tool hints.
    #[serde(default)]
    pub hints: ToolHints,
}

/// MCP tool annotation hints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ToolHints {
    /// The tool only reads state.
    pub read_only_hint: bool,
    /// The tool may irreversibly change state.
    pub destructive_hint: bool,
    /// Repeated calls with the same arguments have no additional effect.
    pub idempotent_hint: bool,
    /// The tool interacts with an open-ended external world (vs. a closed domain).
    pub open_world_hint: bool,
}

/// A resource, static or linked to a tool's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDefinition {
    /// Resource URI.
    pub uri: String,
    /// Human-readable name.
    pub name: String,
    /// If set, the resource's content comes from invoking this tool/call id.
    #[serde(default)]
    pub linked_call_id: Option<String>,
    /// If true, this resource is not registered.
    #[serde(default)]
    pub disable: bool,
}

/// A prompt template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDefinition {
    /// Prompt name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// If true, this prompt is not registered.
    #[serde(default)]
    pub disable: bool,
}

/// Credentials applied to every outgoing request for a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UpstreamAuthConfig {
    /// A named query or header parameter carrying an API key.
    #[serde(rename = "api_key")]
    ApiKey {
        /// Parameter (header or query) name the key is sent under.
        param_name: String,
        /// The key's value source.
        value: SecretSource,
    },
    /// HTTP Basic authentication.
    #[serde(rename = "basic_auth")]
    Basic {
        /// Username.
        username: SecretSource,
        /// Password.
        password: SecretSource,
    },
    /// Bearer token in the `Authorization` header.
    #[serde(rename = "bearer")]
    Bearer {
        /// Token value source.
        token: SecretSource,
    },
    /// Mutual TLS using a client certificate for the connection pool.
    #[serde(rename = "mtls")]
    Mtls {
        /// Path to the client certificate (PEM).
        client_cert_path: String,
        /// Path to the client private key (PEM).
        client_key_path: String,
        /// Path to the CA bundle used to verify the server (PEM).
        ca_cert_path: String,
    },
}

/// A credential value: either supplied directly or indirectly via the secrets manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SecretSource {
    /// Literal value, taken verbatim.
    #[serde(rename = "plain_text")]
    PlainText(String),
    /// Indirect reference resolved through [`crate::secrets::SecretsCache`].
    #[serde(rename = "secret_ref")]
    SecretRef(String),
}

/// Connection-pool sizing for one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionPoolConfig {
    /// Maximum total connections.
    pub max_connections: usize,
    /// Maximum idle connections retained between uses.
    pub max_idle_connections: usize,
    /// How long an idle connection may sit before eviction.
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_idle_connections: 10,
            idle_timeout: Duration::from_secs(90),
        }
    }
}

/// Per-call timeout and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Overall request timeout. Zero means use the default (30s).
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Retry behavior for this service's calls.
    pub retry: UpstreamRetryConfig,
}

impl ResilienceConfig {
    /// Effective timeout, substituting the 30s default for an unset (zero) value.
    #[must_use]
    pub fn effective_timeout(&self) -> Duration {
        if self.timeout.is_zero() {
            Duration::from_secs(30)
        } else {
            self.timeout
        }
    }
}

/// Exponential-backoff retry parameters, distinct from [`crate::failsafe::RetryConfig`]
/// (that one drives the inbound backend failsafe; this one drives outbound upstream calls
/// and the gRPC retry interceptor, matching the field names in the wire configuration).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamRetryConfig {
    /// Maximum retry attempts after the first. Negative values in the source
    /// configuration are normalized to zero at load time.
    pub number_of_retries: u32,
    /// Initial backoff before the first retry.
    #[serde(with = "humantime_serde")]
    pub base_backoff: Duration,
    /// Per-attempt backoff ceiling.
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Total wall-clock ceiling across all attempts.
    #[serde(with = "humantime_serde")]
    pub max_elapsed_time: Duration,
}

impl Default for UpstreamRetryConfig {
    fn default() -> Self {
        Self {
            number_of_retries: 3,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            max_elapsed_time: Duration::from_secs(60),
        }
    }
}

/// Export (visibility) gating action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExportAction {
    /// Advertise the named item.
    Export,
    /// Hide the named item.
    Unexport,
}

/// One export rule: names matching `name_regex` get `action`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRule {
    /// Regex matched against the candidate name.
    pub name_regex: String,
    /// Action applied on match.
    pub action: ExportAction,
}

/// Tool/resource/prompt visibility policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportPolicyConfig {
    /// Rules evaluated in order; first match wins.
    pub rules: Vec<ExportRule>,
    /// Action when no rule matches.
    pub default_action: ExportAction,
}

impl Default for ExportPolicyConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default_action: ExportAction::Export,
        }
    }
}

/// Invocation-time allow/deny action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallAction {
    /// Permit the call.
    Allow,
    /// Refuse the call.
    Deny,
}

/// One call-policy rule: a tool-name regex and, optionally, an argument regex (matched
/// against the JSON-encoded argument map); both must match for the rule to apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRule {
    /// Regex matched against the tool name.
    pub name_regex: String,
    /// Regex matched against the JSON-encoded arguments; absent means "always matches".
    #[serde(default)]
    pub argument_regex: Option<String>,
    /// Action applied on match.
    pub action: CallAction,
}

/// One compiled-from-config call policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallPolicyConfig {
    /// Rules evaluated in order; first match wins.
    pub rules: Vec<CallRule>,
    /// Action when no rule matches.
    pub default_action: CallAction,
}

impl Default for CallPolicyConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default_action: CallAction::Allow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_name_lowercases_and_replaces() {
        assert_eq!(ServiceConfig::sanitize_name("My Service!"), "my-service-");
    }

    #[test]
    fn sanitize_name_strips_leading_dashes() {
        assert_eq!(ServiceConfig::sanitize_name("  leading"), "leading");
    }

    #[test]
    fn sanitize_name_never_empty() {
        assert_eq!(ServiceConfig::sanitize_name("---"), "-");
    }

    #[test]
    fn compute_id_is_stable() {
        let a = ServiceConfig::compute_id("svc");
        let b = ServiceConfig::compute_id("svc");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
