//! HTTP upstream adapter (§4.2) — the hardest component: URL composition, query-parameter
//! merging, tool synthesis, and tool execution with retry/backoff.
//!
//! Credential injection and response handling are grounded on
//! [`crate::capability::executor::CapabilityExecutor`]'s `substitute_*`/`inject_auth`
//! helpers, retargeted from that executor's static capability-YAML model onto
//! [`crate::upstream::config::ServiceConfig`]. URL composition and query merging have no
//! teacher analog; both are built directly against the algorithm this crate's
//! configuration model exists to serve.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::doctor::Doctor;
use crate::managers::{PromptManager, RegisteredTool, ResourceManager, ToolInvoker, ToolManager};
use crate::mtls::outbound::OutboundMtls;
use crate::pool::{ConnectionPool, Factory};
use crate::protocol::types::{Prompt, Resource, Tool, ToolAnnotations};
use crate::secrets::SecretsCache;
use crate::security::ssrf::{SafeDialer, SafeResolve};
use crate::upstream::auth::Authenticator;
use crate::upstream::config::{
    CallDefinition, HttpServiceConfig, ParameterDef, PromptDefinition, ResourceDefinition,
    ServiceConfig, ToolDefinition, UpstreamKind,
};
use crate::upstream::policy::{CallPolicy, ExportPolicy};
use crate::upstream::registry::UpstreamAdapter;
use crate::upstream::retry::{is_retryable_status, RetryPolicy};
use crate::{Error, Result};

/// Characters that must always be percent-encoded in a path segment, beyond what
/// `NON_ALPHANUMERIC` would already cover, kept narrow since most readable ASCII should
/// pass through untouched.
const PATH_SEGMENT: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'<').add(b'>').add(b'`');

/// Redact these field names (recursively) from ≥400 response bodies, per §4.2.3.
const REDACTED_FIELDS: &[&str] = &["stackTrace", "stack_trace", "traceback"];

/// Everything a registered service's tools need at execution time, built once in
/// `register` and shared by every [`HttpTool`] for that service.
struct HttpUpstreamState {
    service_id: String,
    base_address: String,
    pool: ConnectionPool<reqwest::Client>,
    authenticator: Arc<Authenticator>,
    secrets: Arc<SecretsCache>,
    timeout: Duration,
    retry: RetryPolicy,
    dialer: SafeDialer,
}

/// One executable HTTP-backed tool.
struct HttpTool {
    state: Arc<HttpUpstreamState>,
    url_template: String,
    method: reqwest::Method,
    call: CallDefinition,
    policies: Arc<Vec<CallPolicy>>,
    tool_name: String,
}

#[async_trait]
impl ToolInvoker for HttpTool {
    async fn invoke(&self, arguments: Value) -> Result<Value> {
        CallPolicy::check_all(&self.policies, &self.tool_name, Some(&arguments))?;

        let (url, body_fields) = substitute_placeholders(&self.url_template, &self.call, &arguments)?;

        let body = if self.method == reqwest::Method::GET || body_fields.is_empty() {
            None
        } else {
            Some(Value::Object(body_fields))
        };

        let client = self.state.pool.get(self.state.timeout).await?;
        let cancel = CancellationToken::new();
        let state = Arc::clone(&self.state);
        let method = self.method.clone();

        let should_retry = |e: &Error| {
            matches!(e, Error::Transport(_))
                || matches!(e, Error::UpstreamStatus { status, .. } if is_retryable_status(*status))
        };

        self.state
            .retry
            .run(&cancel, should_retry, || {
                let state = Arc::clone(&state);
                let method = method.clone();
                let url = url.clone();
                let body = body.clone();
                let client = &*client;
                async move { execute_once(client, &state, method, &url, body.as_ref()).await }
            })
            .await
    }
}

async fn execute_once(
    client: &reqwest::Client,
    state: &HttpUpstreamState,
    method: reqwest::Method,
    url: &str,
    body: Option<&Value>,
) -> Result<Value> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(body);
    }
    request = state
        .authenticator
        .apply(request, &state.secrets)
        .await?;

    let response = request
        .send()
        .await
        .map_err(|e| Error::Transport(e.to_string()))?;

    let status = response.status();
    if status.as_u16() >= 400 {
        let body: Value = response
            .json()
            .await
            .unwrap_or_else(|_| Value::String("<non-json error body>".to_string()));
        let redacted = redact_fields(body);
        return Err(Error::UpstreamStatus {
            status: status.as_u16(),
            body: redacted,
        });
    }

    response
        .json::<Value>()
        .await
        .or_else(|_| Ok(Value::Null))
}

fn redact_fields(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                if REDACTED_FIELDS.contains(&k.as_str()) {
                    out.insert(k, Value::String("[REDACTED]".to_string()));
                } else {
                    out.insert(k, redact_fields(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(redact_fields).collect()),
        other => other,
    }
}

/// Substitute `{{name}}` placeholders in `template` with values from `arguments`,
/// returning the final URL and the leftover (non-placeholder) arguments for the request
/// body.
///
/// # Errors
///
/// Returns [`Error::PathInjection`]/[`Error::ParameterPollution`] if a parameter marked
/// `disable_escape` contains `?`, `#`, or `&`.
fn substitute_placeholders(
    template: &str,
    call: &CallDefinition,
    arguments: &Value,
) -> Result<(String, Map<String, Value>)> {
    let path_len = template.find('?').unwrap_or(template.len());
    let mut url = template.to_string();
    let mut leftover = Map::new();

    for param in &call.parameters {
        let name = &param.schema.name;
        let placeholder = format!("{{{{{name}}}}}");
        let Some(value) = arguments.get(name).or(param.schema.default_value.as_ref()) else {
            continue;
        };

        if !url.contains(&placeholder) {
            leftover.insert(name.clone(), value.clone());
            continue;
        }

        let raw = value_to_plain_string(value);
        let dangerous = raw.contains('?') || raw.contains('#') || raw.contains('&');
        if dangerous && param.disable_escape {
            let in_path = url.find(&placeholder).is_some_and(|idx| idx < path_len);
            return Err(if in_path {
                Error::PathInjection
            } else {
                Error::ParameterPollution
            });
        }

        let occurrence = url.find(&placeholder);
        let encoded = if occurrence.is_some_and(|idx| idx < path_len) {
            utf8_percent_encode(&raw, PATH_SEGMENT).to_string()
        } else {
            utf8_percent_encode(&raw, percent_encoding::NON_ALPHANUMERIC).to_string()
        };
        url = url.replace(&placeholder, &encoded);
    }

    Ok((url, leftover))
}

fn value_to_plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Merge a base query string with an endpoint query string per §4.2.1b.
///
/// Base parts keep their exact raw bytes unless their decoded key is also present on the
/// endpoint side, in which case every endpoint part with that key replaces the base part
/// (override). Endpoint parts whose key never matched a base key are appended, in order,
/// after all base parts. An endpoint query that is empty once `&` is trimmed leaves the
/// base query untouched.
#[must_use]
pub fn merge_query(base_query: Option<&str>, endpoint_query: Option<&str>) -> Option<String> {
    let ep_trimmed = endpoint_query.unwrap_or("").trim_matches('&');
    if ep_trimmed.is_empty() {
        return base_query.map(str::to_string);
    }

    struct Part {
        raw: String,
        key: Option<String>,
    }

    fn parse_parts(q: &str) -> Vec<Part> {
        q.split('&')
            .filter(|s| !s.is_empty())
            .map(|part| {
                let key_raw = part.split_once('=').map_or(part, |(k, _)| k);
                let key = percent_encoding::percent_decode_str(key_raw)
                    .decode_utf8()
                    .ok()
                    .map(|s| s.into_owned());
                Part {
                    raw: part.to_string(),
                    key,
                }
            })
            .collect()
    }

    let base_parts = base_query.map(parse_parts).unwrap_or_default();
    let ep_parts = parse_parts(ep_trimmed);

    let mut overridden: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut output = Vec::with_capacity(base_parts.len() + ep_parts.len());

    for bp in &base_parts {
        if let Some(k) = &bp.key {
            if overridden.contains(k) {
                continue;
            }
            let matches: Vec<&Part> = ep_parts.iter().filter(|ep| ep.key.as_deref() == Some(k.as_str())).collect();
            if !matches.is_empty() {
                for m in matches {
                    output.push(m.raw.clone());
                }
                overridden.insert(k.clone());
                continue;
            }
        }
        output.push(bp.raw.clone());
    }

    for ep in &ep_parts {
        if let Some(k) = &ep.key {
            if overridden.contains(k) {
                continue;
            }
        }
        output.push(ep.raw.clone());
    }

    Some(output.join("&"))
}

/// Compose the full URL for a tool call from the service's base address and the call's
/// `endpoint_path`, per §4.2.1.
///
/// # Errors
///
/// Returns [`Error::InvalidAddress`] if `base_address` does not parse as an absolute URI.
pub fn compose_url(base_address: &str, endpoint_path: &str) -> Result<String> {
    let base = url::Url::parse(base_address).map_err(|_| Error::InvalidAddress)?;

    let (path_and_query, fragment) = match endpoint_path.split_once('#') {
        Some((pq, f)) => (pq, Some(f)),
        None => (endpoint_path, None),
    };
    let (ep_path, ep_query) = match path_and_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_and_query, None),
    };

    let base_path = base.path();
    let combined_path = if ep_path.is_empty() {
        base_path.to_string()
    } else if ep_path.starts_with("//") {
        // Scheme-relative pathological case: keep the literal "//host/path" text as the
        // path itself rather than letting it be read as a new authority, but still join
        // it under base_path like any other endpoint path (§4.2.1 step 2).
        format!("{base_path}{ep_path}")
    } else {
        let mut base_dir = base_path.to_string();
        if !base_dir.ends_with('/') {
            base_dir.push('/');
        }
        let ep_trimmed = ep_path.trim_start_matches('/');
        format!("{base_dir}{ep_trimmed}")
    };

    let merged_query = merge_query(base.query(), ep_query);
    let final_fragment = fragment.or_else(|| base.fragment());

    let mut result = format!("{}://{}", base.scheme(), base.host_str().unwrap_or_default());
    if let Some(port) = base.port() {
        result.push(':');
        result.push_str(&port.to_string());
    }
    result.push_str(&combined_path);
    if let Some(q) = merged_query {
        if !q.is_empty() {
            result.push('?');
            result.push_str(&q);
        }
    }
    if let Some(f) = final_fragment {
        result.push('#');
        result.push_str(f);
    }

    Ok(result)
}

/// HTTP upstream adapter: builds a connection pool and executable tools from a
/// [`ServiceConfig`] whose `upstream` is [`UpstreamKind::Http`].
#[derive(Default)]
pub struct HttpUpstream {
    state: RwLock<Option<Arc<HttpUpstreamState>>>,
}

impl HttpUpstream {
    /// Construct an unregistered adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn build_client(
        http: &HttpServiceConfig,
        service_name: &str,
        pool_cfg: &crate::upstream::config::ConnectionPoolConfig,
        timeout: Duration,
        mtls: Option<&OutboundMtls>,
        dialer: SafeDialer,
    ) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(pool_cfg.max_idle_connections)
            .pool_idle_timeout(pool_cfg.idle_timeout)
            .timeout(timeout)
            .danger_accept_invalid_certs(http.tls_config.insecure_skip_verify)
            .dns_resolver(Arc::new(SafeResolve::new(dialer)))
            .redirect(reqwest::redirect::Policy::custom(move |attempt| {
                // Redirect targets that are IP literals bypass the DNS resolver above, so
                // they still need a direct check here; hostname targets go through
                // `SafeResolve` when the redirect is actually followed.
                if let Some(host) = attempt.url().host_str() {
                    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
                        if dialer.check_ip(ip).is_err() {
                            return attempt.stop();
                        }
                    }
                }
                attempt.follow()
            }));

        if let Some(proxy_cfg) = &http.proxy_config {
            let mut proxy = reqwest::Proxy::all(&proxy_cfg.url)
                .map_err(|e| Error::PoolCreate { service: service_name.to_string(), source: e.to_string() })?;
            if let (Some(user), Some(pass)) = (&proxy_cfg.username, &proxy_cfg.password) {
                proxy = proxy.basic_auth(user, pass);
            }
            builder = builder.proxy(proxy);
        }

        if let Some(mtls) = mtls {
            builder = builder.use_preconfigured_tls((*mtls.client_config).clone());
        }

        builder
            .build()
            .map_err(|e| Error::PoolCreate { service: service_name.to_string(), source: e.to_string() })
    }
}

#[async_trait]
impl UpstreamAdapter for HttpUpstream {
    async fn register(
        &self,
        config: &ServiceConfig,
        tool_manager: &dyn ToolManager,
        resource_manager: &dyn ResourceManager,
        prompt_manager: &dyn PromptManager,
        _is_reload: bool,
    ) -> Result<Vec<String>> {
        let UpstreamKind::Http(http) = &config.upstream else {
            return Err(Error::ServiceConfigNil);
        };

        let service_id = config.id.clone().ok_or(Error::ServiceConfigNil)?;

        if http.address.trim().is_empty() {
            return Err(Error::AddressRequired);
        }
        let base_url = url::Url::parse(&http.address).map_err(|_| Error::InvalidAddress)?;
        match base_url.scheme() {
            "http" | "https" => {}
            other => return Err(Error::InvalidAddressScheme(other.to_string())),
        }

        let mtls = OutboundMtls::from_auth_config(&config.name, config.upstream_auth.as_ref())?;
        let timeout = config.resilience.effective_timeout();
        let dialer = SafeDialer::from_env();
        let client = Self::build_client(http, &config.name, &config.connection_pool, timeout, mtls.as_ref(), dialer)?;

        let pool_client = client.clone();
        let factory: Factory<reqwest::Client> = Arc::new(move || {
            let pool_client = pool_client.clone();
            Box::pin(async move { Ok(pool_client) })
        });
        let pool = ConnectionPool::new(
            factory,
            config.connection_pool.max_connections,
            config.connection_pool.max_idle_connections,
            config.connection_pool.idle_timeout,
        );

        // Early diagnostic only: `client` itself enforces the same policy on every dial
        // (including ones made after a redirect or a DNS change) via the `dns_resolver`
        // installed in `build_client`, so a blocked address here never reaches the network
        // regardless of whether this probe ran or what it found.
        let ssrf_check = check_address_ssrf(&base_url, &dialer).await;
        let connect_check = if ssrf_check.is_ok() {
            check_connection(&client, &http.address).await
        } else {
            Ok(())
        };
        if ssrf_check.is_err() || connect_check.is_err() {
            let report = Doctor::diagnose(&http.address, &ssrf_check, &connect_check);
            warn!(service = %config.name, "{}", report.report);
        }

        let secrets = Arc::new(SecretsCache::new(Arc::new(crate::secrets::KeychainEnvProvider)));
        let authenticator = Arc::new(Authenticator::from_config(config.upstream_auth.as_ref()));
        let retry = RetryPolicy::new(&config.resilience.retry);

        let state = Arc::new(HttpUpstreamState {
            service_id: service_id.clone(),
            base_address: http.address.clone(),
            pool,
            authenticator,
            secrets,
            timeout,
            retry,
            dialer,
        });
        *self.state.write() = Some(Arc::clone(&state));

        let mut http = http.clone();
        if http.auto_discover_tool {
            for call_id in http.calls.keys().cloned().collect::<Vec<_>>() {
                if !http.tools.iter().any(|t| t.call_id == call_id) {
                    http.tools.push(ToolDefinition {
                        name: call_id.clone(),
                        call_id,
                        ..ToolDefinition::default()
                    });
                }
            }
        }

        let export_policy = ExportPolicy::compile(&config.tool_export_policy)?;
        let resource_export_policy = ExportPolicy::compile(&config.resource_export_policy)?;
        let prompt_export_policy = ExportPolicy::compile(&config.prompt_export_policy)?;
        let call_policies = match CallPolicy::compile_all(&config.call_policies) {
            Ok(p) => Arc::new(p),
            Err(e) => {
                warn!(service = %config.name, error = %e, "call policy compile failed; registering no tools");
                return Ok(Vec::new());
            }
        };

        register_resources(&http.resources, &service_id, &resource_export_policy, resource_manager);
        register_prompts(&http.prompts, &service_id, &prompt_export_policy, prompt_manager);

        let mut call_ids: Vec<&String> = http.calls.keys().collect();
        call_ids.sort();

        let mut registered = Vec::new();
        for call_id in call_ids {
            let call = &http.calls[call_id];
            for tool_def in http.tools.iter().filter(|t| &t.call_id == call_id) {
                match create_tool(
                    &state,
                    &service_id,
                    call,
                    tool_def,
                    &export_policy,
                    Arc::clone(&call_policies),
                    tool_manager,
                ) {
                    Ok(Some(name)) => registered.push(name),
                    Ok(None) => {}
                    Err(e) => warn!(service = %config.name, call_id = %call_id, error = %e, "skipping tool"),
                }
            }
        }

        info!(service = %config.name, tools = registered.len(), "HTTP service registered");
        Ok(registered)
    }

    async fn shutdown(&self) -> Result<()> {
        if let Some(state) = self.state.write().take() {
            state.pool.close();
        }
        Ok(())
    }

    async fn check_health(&self) -> Result<()> {
        let state = self.state.read().clone();
        let Some(state) = state else { return Ok(()) };
        let client = state.pool.get(state.timeout).await?;
        check_connection(&client, &state.base_address).await
    }
}

async fn check_address_ssrf(base_url: &url::Url, dialer: &SafeDialer) -> Result<()> {
    let Some(host) = base_url.host_str() else {
        return Err(Error::InvalidAddress);
    };
    let port = base_url
        .port_or_known_default()
        .unwrap_or(if base_url.scheme() == "https" { 443 } else { 80 });
    dialer.resolve(host, port).await.map(|_| ())
}

async fn check_connection(client: &reqwest::Client, address: &str) -> Result<()> {
    client
        .get(address)
        .send()
        .await
        .map(|_| ())
        .map_err(|_| Error::ConnectFailed)
}

/// Register `definitions` (§4.2 step 9: static or tool-linked resources), each gated by
/// its own `disable` flag and `export_policy`.
fn register_resources(
    definitions: &[ResourceDefinition],
    service_id: &str,
    export_policy: &ExportPolicy,
    resource_manager: &dyn ResourceManager,
) {
    for def in definitions {
        if def.disable || !export_policy.is_exported(&def.name) {
            continue;
        }
        let resource = Resource {
            uri: def.uri.clone(),
            name: def.name.clone(),
            title: None,
            description: None,
            mime_type: None,
            size: None,
        };
        let id = format!("{service_id}.{}", ServiceConfig::sanitize_name(&def.name));
        resource_manager.add_resource(id, service_id.to_string(), resource);
    }
}

/// Register `definitions` (§4.2 step 9), each gated by its own `disable` flag and
/// `export_policy`.
fn register_prompts(
    definitions: &[PromptDefinition],
    service_id: &str,
    export_policy: &ExportPolicy,
    prompt_manager: &dyn PromptManager,
) {
    for def in definitions {
        if def.disable || !export_policy.is_exported(&def.name) {
            continue;
        }
        let prompt = Prompt {
            name: def.name.clone(),
            title: None,
            description: Some(def.description.clone()).filter(|d| !d.is_empty()),
            arguments: Vec::new(),
        };
        let id = format!("{service_id}.{}", ServiceConfig::sanitize_name(&def.name));
        prompt_manager.add_prompt(id, service_id.to_string(), prompt);
    }
}

fn create_tool(
    state: &Arc<HttpUpstreamState>,
    service_id: &str,
    call: &CallDefinition,
    tool_def: &ToolDefinition,
    export_policy: &ExportPolicy,
    call_policies: Arc<Vec<CallPolicy>>,
    tool_manager: &dyn ToolManager,
) -> Result<Option<String>> {
    if tool_def.disable {
        return Ok(None);
    }

    let name_part = if !tool_def.name.is_empty() {
        ServiceConfig::sanitize_name(&tool_def.name)
    } else if !tool_def.description.is_empty() {
        ServiceConfig::sanitize_name(&tool_def.description)
    } else {
        format!("op_{}", call.id)
    };

    if !export_policy.is_exported(&name_part) {
        return Ok(None);
    }
    if CallPolicy::check_all(&call_policies, &name_part, None).is_err() {
        return Ok(None);
    }

    let method = call.method.as_reqwest();
    let url_template = compose_url(&state.base_address, &call.endpoint_path)?;

    let input_schema = build_input_schema(call);

    let tool_id = format!("{service_id}.{name_part}");
    let tool = Tool {
        name: name_part.clone(),
        title: None,
        description: Some(tool_def.description.clone()).filter(|d| !d.is_empty()),
        input_schema,
        output_schema: call.output_schema.clone(),
        annotations: Some(ToolAnnotations {
            title: None,
            read_only_hint: Some(tool_def.hints.read_only_hint),
            destructive_hint: Some(tool_def.hints.destructive_hint),
            idempotent_hint: Some(tool_def.hints.idempotent_hint),
            open_world_hint: Some(tool_def.hints.open_world_hint),
        }),
    };

    let invoker = Arc::new(HttpTool {
        state: Arc::clone(state),
        url_template,
        method,
        call: call.clone(),
        policies: call_policies,
        tool_name: name_part.clone(),
    });

    tool_manager.add_tool(
        tool_id,
        RegisteredTool {
            tool,
            service_id: service_id.to_string(),
            invoker,
        },
    )?;

    Ok(Some(name_part))
}

/// Build/merge a tool's JSON-Schema input shape from its call's parameters and (if
/// present) pre-built `input_schema`, per §4.2.2.
fn build_input_schema(call: &CallDefinition) -> Value {
    let mut properties = Map::new();
    let mut required: Vec<String> = Vec::new();
    for param in &call.parameters {
        properties.insert(
            param.schema.name.clone(),
            serde_json::json!({ "type": param.schema.schema_type }),
        );
        if param.schema.is_required {
            required.push(param.schema.name.clone());
        }
    }

    let Some(existing) = &call.input_schema else {
        return serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        });
    };

    let mut merged = existing.clone();
    if !merged.is_object() {
        merged = Value::Object(Map::new());
    }
    let obj = merged.as_object_mut().expect("ensured object above");

    obj.entry("type").or_insert_with(|| Value::String("object".to_string()));

    let props_entry = obj.entry("properties").or_insert_with(|| Value::Object(Map::new()));
    if !props_entry.is_object() {
        *props_entry = Value::Object(Map::new());
    }
    let props_map = props_entry.as_object_mut().expect("just ensured object");
    for (name, schema) in properties {
        props_map.entry(name).or_insert(schema);
    }

    let mut merged_required: Vec<String> = obj
        .get("required")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    for r in required {
        if !merged_required.contains(&r) {
            merged_required.push(r);
        }
    }
    obj.insert(
        "required".to_string(),
        Value::Array(merged_required.into_iter().map(Value::String).collect()),
    );

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::config::{ParameterSchema, HttpMethod};

    #[test]
    fn query_merge_overrides_invalid_base_value() {
        let merged = merge_query(Some("q=invalid%"), Some("q=valid"));
        assert_eq!(merged.as_deref(), Some("q=valid"));
    }

    #[test]
    fn query_merge_preserves_flag_without_equals() {
        let merged = merge_query(Some("flag"), Some("foo=bar"));
        assert_eq!(merged.as_deref(), Some("flag&foo=bar"));
    }

    #[test]
    fn query_merge_preserves_raw_encoding_when_no_endpoint_query() {
        let merged = merge_query(Some("a%20b"), None);
        assert_eq!(merged.as_deref(), Some("a%20b"));
    }

    #[test]
    fn query_merge_preserves_literal_semicolon() {
        let merged = merge_query(None, Some("q=hello;world"));
        assert_eq!(merged.as_deref(), Some("q=hello;world"));
    }

    #[test]
    fn compose_url_preserves_base_when_endpoint_empty() {
        let url = compose_url("http://host/api", "").unwrap();
        assert_eq!(url, "http://host/api");
    }

    #[test]
    fn compose_url_joins_relative_path() {
        let url = compose_url("http://host/api", "/users/1").unwrap();
        assert_eq!(url, "http://host/api/users/1");
    }

    #[test]
    fn compose_url_preserves_base_for_scheme_relative_endpoint() {
        let url = compose_url("http://example.com/api", "//foo/bar").unwrap();
        assert_eq!(url, "http://example.com/api//foo/bar");
    }

    #[test]
    fn compose_url_merges_queries() {
        let url = compose_url("http://host/api?tenant=acme", "/users?active=true").unwrap();
        assert_eq!(url, "http://host/api/users?tenant=acme&active=true");
    }

    #[test]
    fn substitute_placeholders_rejects_path_injection_when_disabled_escape() {
        let call = CallDefinition {
            id: "c1".to_string(),
            method: HttpMethod::Get,
            endpoint_path: "/users/{{id}}".to_string(),
            parameters: vec![ParameterDef {
                schema: ParameterSchema {
                    name: "id".to_string(),
                    schema_type: "string".to_string(),
                    is_required: true,
                    default_value: None,
                },
                disable_escape: true,
            }],
            input_schema: None,
            output_schema: None,
            selection_set: None,
        };
        let template = compose_url("http://host/api", &call.endpoint_path).unwrap();
        let args = serde_json::json!({"id": "a&b"});
        let err = substitute_placeholders(&template, &call, &args).unwrap_err();
        assert!(matches!(err, Error::PathInjection | Error::ParameterPollution));
    }

    #[test]
    fn substitute_placeholders_encodes_safe_values() {
        let call = CallDefinition {
            id: "c1".to_string(),
            method: HttpMethod::Get,
            endpoint_path: "/users/{{id}}".to_string(),
            parameters: vec![ParameterDef {
                schema: ParameterSchema {
                    name: "id".to_string(),
                    schema_type: "string".to_string(),
                    is_required: true,
                    default_value: None,
                },
                disable_escape: false,
            }],
            input_schema: None,
            output_schema: None,
            selection_set: None,
        };
        let template = compose_url("http://host/api", &call.endpoint_path).unwrap();
        let args = serde_json::json!({"id": "hello world"});
        let (url, _) = substitute_placeholders(&template, &call, &args).unwrap();
        assert!(url.contains("hello%20world"));
    }

    #[test]
    fn build_input_schema_synthesizes_from_parameters() {
        let call = CallDefinition {
            id: "c1".to_string(),
            method: HttpMethod::Post,
            endpoint_path: "/x".to_string(),
            parameters: vec![ParameterDef {
                schema: ParameterSchema {
                    name: "name".to_string(),
                    schema_type: "string".to_string(),
                    is_required: true,
                    default_value: None,
                },
                disable_escape: false,
            }],
            input_schema: None,
            output_schema: None,
            selection_set: None,
        };
        let schema = build_input_schema(&call);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"][0], "name");
    }

    #[test]
    fn build_input_schema_clones_and_never_mutates_source() {
        let source = serde_json::json!({"type": "object", "properties": {"existing": {"type": "string"}}});
        let call = CallDefinition {
            id: "c1".to_string(),
            method: HttpMethod::Post,
            endpoint_path: "/x".to_string(),
            parameters: vec![ParameterDef {
                schema: ParameterSchema {
                    name: "extra".to_string(),
                    schema_type: "number".to_string(),
                    is_required: false,
                    default_value: None,
                },
                disable_escape: false,
            }],
            input_schema: Some(source.clone()),
            output_schema: None,
            selection_set: None,
        };
        let merged = build_input_schema(&call);
        assert_eq!(source["properties"].as_object().unwrap().len(), 1);
        assert_eq!(merged["properties"].as_object().unwrap().len(), 2);
    }
}
