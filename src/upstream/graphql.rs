//! GraphQL upstream adapter (§4.3): introspection, GraphQL-type → JSON-Schema projection,
//! query synthesis.
//!
//! Shares its connection-pool/auth/retry/policy plumbing with
//! [`crate::upstream::http`] — the same `ConnectionPool<reqwest::Client>`,
//! `Authenticator`, `RetryPolicy`, `ExportPolicy`/`CallPolicy` — since a GraphQL endpoint
//! is, underneath, a single `POST` HTTP call. Introspection parsing and the
//! type-to-schema projection have no teacher analog; both are built directly against
//! the GraphQL introspection response shape.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::doctor::Doctor;
use crate::managers::{PromptManager, RegisteredTool, ResourceManager, ToolInvoker, ToolManager};
use crate::mtls::outbound::OutboundMtls;
use crate::pool::{ConnectionPool, Factory};
use crate::protocol::types::Tool;
use crate::secrets::SecretsCache;
use crate::security::ssrf::{SafeDialer, SafeResolve};
use crate::upstream::auth::Authenticator;
use crate::upstream::config::{GraphqlServiceConfig, ServiceConfig, UpstreamKind};
use crate::upstream::policy::{CallPolicy, ExportPolicy};
use crate::upstream::registry::UpstreamAdapter;
use crate::upstream::retry::{is_retryable_status, RetryPolicy};
use crate::{Error, Result};

const INTROSPECTION_QUERY: &str = r"
query IntrospectionQuery {
  __schema {
    queryType { name }
    mutationType { name }
    types {
      name
      kind
      fields {
        name
        args { name type { ...TypeRef } }
        type { ...TypeRef }
      }
    }
  }
}
fragment TypeRef on __Type {
  kind
  name
  ofType {
    kind
    name
    ofType {
      kind
      name
      ofType {
        kind
        name
      }
    }
  }
}
";

#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    data: Option<IntrospectionData>,
}

#[derive(Debug, Deserialize)]
struct IntrospectionData {
    __schema: Schema,
}

#[derive(Debug, Deserialize)]
struct Schema {
    #[serde(rename = "queryType")]
    query_type: Option<NamedRef>,
    #[serde(rename = "mutationType")]
    mutation_type: Option<NamedRef>,
    types: Vec<GqlType>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GqlType {
    name: Option<String>,
    kind: String,
    #[serde(default)]
    fields: Option<Vec<Field>>,
}

#[derive(Debug, Clone, Deserialize)]
struct Field {
    name: String,
    #[serde(default)]
    args: Vec<Arg>,
    #[serde(rename = "type")]
    field_type: TypeRef,
}

#[derive(Debug, Clone, Deserialize)]
struct Arg {
    name: String,
    #[serde(rename = "type")]
    arg_type: TypeRef,
}

/// A (possibly `NON_NULL`/`LIST`-wrapped) reference to a named GraphQL type.
#[derive(Debug, Clone, Deserialize)]
struct TypeRef {
    kind: String,
    name: Option<String>,
    #[serde(rename = "ofType")]
    of_type: Option<Box<TypeRef>>,
}

/// Unwrap `NON_NULL`, note `LIST`, and return the innermost named type.
fn unwrap_type(type_ref: &TypeRef) -> (bool, String) {
    match type_ref.kind.as_str() {
        "NON_NULL" => type_ref.of_type.as_ref().map_or((false, "object".to_string()), |inner| {
            let (_, name) = unwrap_type(inner);
            (false, name)
        }),
        "LIST" => {
            let inner = type_ref
                .of_type
                .as_ref()
                .map_or((false, "object".to_string()), |i| unwrap_type(i));
            (true, inner.1)
        }
        _ => (false, type_ref.name.clone().unwrap_or_else(|| "object".to_string())),
    }
}

/// Map a GraphQL scalar/type name to its JSON-Schema equivalent, per §4.3.
fn scalar_to_json_type(name: &str) -> &'static str {
    match name {
        "String" | "ID" => "string",
        "Int" | "Float" => "number",
        "Boolean" => "boolean",
        _ => "object",
    }
}

fn type_ref_to_schema(type_ref: &TypeRef) -> Value {
    let (is_list, name) = unwrap_type(type_ref);
    let scalar = serde_json::json!({ "type": scalar_to_json_type(&name) });
    if is_list {
        serde_json::json!({ "type": "array", "items": scalar })
    } else {
        scalar
    }
}

/// Build the input schema for a field's arguments.
fn build_input_schema(field: &Field) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for arg in &field.args {
        properties.insert(arg.name.clone(), type_ref_to_schema(&arg.arg_type));
        if arg.arg_type.kind == "NON_NULL" {
            required.push(Value::String(arg.name.clone()));
        }
    }
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Default selection set: the field's innermost named type's immediate scalar-ish
/// sub-fields (`name` only, one level), or empty for scalar-returning fields.
fn default_selection_set(field: &Field, types_by_name: &HashMap<String, &GqlType>) -> String {
    let (_, type_name) = unwrap_type(&field.field_type);
    let Some(gql_type) = types_by_name.get(&type_name) else {
        return String::new();
    };
    let Some(sub_fields) = &gql_type.fields else {
        return String::new();
    };
    let names: Vec<&str> = sub_fields.iter().map(|f| f.name.as_str()).collect();
    if names.is_empty() {
        String::new()
    } else {
        format!("{{ {} }}", names.join(" "))
    }
}

/// Synthesize the GraphQL document for one field, per §4.3:
/// `{op} ({vars}) { field({args}) {selectionSet} }`.
fn synthesize_query(op: &str, field: &Field, selection_set: &str) -> String {
    let vars: Vec<String> = field
        .args
        .iter()
        .map(|a| format!("${}: {}", a.name, type_name_string(&a.arg_type)))
        .collect();
    let call_args: Vec<String> = field.args.iter().map(|a| format!("{}: ${}", a.name, a.name)).collect();

    let vars_clause = if vars.is_empty() { String::new() } else { format!("({})", vars.join(", ")) };
    let args_clause = if call_args.is_empty() { String::new() } else { format!("({})", call_args.join(", ")) };
    let selection = if selection_set.is_empty() { String::new() } else { format!(" {selection_set}") };

    format!("{op} {vars_clause} {{ {}{args_clause}{selection} }}", field.name)
}

/// Render a `TypeRef`'s GraphQL-syntax type name (`String!`, `[ID!]!`, ...), used only for
/// the synthesized query's variable declarations.
fn type_name_string(type_ref: &TypeRef) -> String {
    match type_ref.kind.as_str() {
        "NON_NULL" => format!("{}!", type_ref.of_type.as_ref().map_or_else(|| "String".to_string(), |t| type_name_string(t))),
        "LIST" => format!("[{}]", type_ref.of_type.as_ref().map_or_else(|| "String".to_string(), |t| type_name_string(t))),
        _ => type_ref.name.clone().unwrap_or_else(|| "String".to_string()),
    }
}

struct GraphqlUpstreamState {
    address: String,
    pool: ConnectionPool<reqwest::Client>,
    authenticator: Arc<Authenticator>,
    secrets: Arc<SecretsCache>,
    timeout: Duration,
    retry: RetryPolicy,
}

struct GraphqlTool {
    state: Arc<GraphqlUpstreamState>,
    query: String,
    policies: Arc<Vec<CallPolicy>>,
    tool_name: String,
}

#[async_trait]
impl ToolInvoker for GraphqlTool {
    async fn invoke(&self, arguments: Value) -> Result<Value> {
        CallPolicy::check_all(&self.policies, &self.tool_name, Some(&arguments))?;

        let client = self.state.pool.get(self.state.timeout).await?;
        let cancel = CancellationToken::new();
        let state = Arc::clone(&self.state);
        let query = self.query.clone();

        let should_retry = |e: &Error| {
            matches!(e, Error::Transport(_))
                || matches!(e, Error::UpstreamStatus { status, .. } if is_retryable_status(*status))
        };

        self.state
            .retry
            .run(&cancel, should_retry, || {
                let state = Arc::clone(&state);
                let query = query.clone();
                let variables = arguments.clone();
                let client = &*client;
                async move { execute_graphql(client, &state, &query, variables).await }
            })
            .await
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

async fn execute_graphql(
    client: &reqwest::Client,
    state: &GraphqlUpstreamState,
    query: &str,
    variables: Value,
) -> Result<Value> {
    let body = serde_json::json!({ "query": query, "variables": variables });
    let mut request = client.post(&state.address).json(&body);
    request = state.authenticator.apply(request, &state.secrets).await?;

    let response = request.send().await.map_err(|e| Error::Transport(e.to_string()))?;
    let status = response.status();
    if status.as_u16() >= 400 {
        let body: Value = response
            .json()
            .await
            .unwrap_or_else(|_| Value::String("<non-json error body>".to_string()));
        return Err(Error::UpstreamStatus { status: status.as_u16(), body });
    }

    let parsed: Value = response.json().await.map_err(|e| Error::Transport(e.to_string()))?;
    if let Some(errors) = parsed.get("errors") {
        if errors.is_array() && !errors.as_array().unwrap().is_empty() {
            return Err(Error::Protocol(errors.to_string()));
        }
    }
    Ok(parsed.get("data").cloned().unwrap_or(Value::Null))
}

/// GraphQL upstream adapter: introspects the schema once at `Register` and synthesizes
/// one tool per root Query/Mutation field.
#[derive(Default)]
pub struct GraphqlUpstream {
    state: RwLock<Option<Arc<GraphqlUpstreamState>>>,
}

impl GraphqlUpstream {
    /// Construct an unregistered adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn introspect(
        client: &reqwest::Client,
        address: &str,
        authenticator: &Authenticator,
        secrets: &Arc<SecretsCache>,
    ) -> Result<Schema> {
        let body = serde_json::json!({ "query": INTROSPECTION_QUERY });
        let mut request = client.post(address).json(&body);
        request = authenticator.apply(request, secrets).await?;

        let response = request.send().await.map_err(|e| Error::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::ConnectFailed);
        }
        let parsed: IntrospectionResponse = response.json().await.map_err(|e| Error::Transport(e.to_string()))?;
        parsed.data.map(|d| d.__schema).ok_or_else(|| Error::Protocol("introspection returned no schema".to_string()))
    }
}

#[async_trait]
impl UpstreamAdapter for GraphqlUpstream {
    async fn register(
        &self,
        config: &ServiceConfig,
        tool_manager: &dyn ToolManager,
        _resource_manager: &dyn ResourceManager,
        _prompt_manager: &dyn PromptManager,
        _is_reload: bool,
    ) -> Result<Vec<String>> {
        let UpstreamKind::Graphql(gql) = &config.upstream else {
            return Err(Error::ServiceConfigNil);
        };
        let service_id = config.id.clone().ok_or(Error::ServiceConfigNil)?;

        if gql.address.trim().is_empty() {
            return Err(Error::AddressRequired);
        }
        let parsed = url::Url::parse(&gql.address).map_err(|_| Error::InvalidAddress)?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(Error::InvalidAddressScheme(other.to_string())),
        }

        let mtls = OutboundMtls::from_auth_config(&config.name, config.upstream_auth.as_ref())?;
        let timeout = config.resilience.effective_timeout();
        let dialer = SafeDialer::from_env();

        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(config.connection_pool.max_idle_connections)
            .pool_idle_timeout(config.connection_pool.idle_timeout)
            .timeout(timeout)
            .danger_accept_invalid_certs(gql.tls_config.insecure_skip_verify)
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
        if let Some(mtls) = &mtls {
            builder = builder.use_preconfigured_tls((*mtls.client_config).clone());
        }
        let client = builder
            .build()
            .map_err(|e| Error::PoolCreate { service: config.name.clone(), source: e.to_string() })?;

        // Early diagnostic only: `client` itself enforces the same policy on every dial
        // via the `dns_resolver` installed above.
        let ssrf_check = check_address_ssrf(&parsed, &dialer).await;
        if ssrf_check.is_err() {
            let connect_check: Result<()> = Ok(());
            let report = Doctor::diagnose(&gql.address, &ssrf_check, &connect_check);
            warn!(service = %config.name, "{}", report.report);
        }

        let secrets = Arc::new(SecretsCache::new(Arc::new(crate::secrets::KeychainEnvProvider)));
        let authenticator = Authenticator::from_config(config.upstream_auth.as_ref());

        let schema = Self::introspect(&client, &gql.address, &authenticator, &secrets).await?;

        let pool_client = client.clone();
        let factory: Factory<reqwest::Client> =
            Arc::new(move || {
                let pool_client = pool_client.clone();
                Box::pin(async move { Ok(pool_client) })
            });
        let pool = ConnectionPool::new(
            factory,
            config.connection_pool.max_connections,
            config.connection_pool.max_idle_connections,
            config.connection_pool.idle_timeout,
        );

        let state = Arc::new(GraphqlUpstreamState {
            address: gql.address.clone(),
            pool,
            authenticator: Arc::new(authenticator),
            secrets,
            timeout,
            retry: RetryPolicy::new(&config.resilience.retry),
        });
        *self.state.write() = Some(Arc::clone(&state));

        let export_policy = ExportPolicy::compile(&config.tool_export_policy)?;
        let call_policies = match CallPolicy::compile_all(&config.call_policies) {
            Ok(p) => Arc::new(p),
            Err(e) => {
                warn!(service = %config.name, error = %e, "call policy compile failed; registering no tools");
                return Ok(Vec::new());
            }
        };

        let types_by_name: HashMap<String, &GqlType> =
            schema.types.iter().filter_map(|t| t.name.clone().map(|n| (n, t))).collect();

        let mut registered = Vec::new();
        for (op, type_name) in [("query", schema.query_type.as_ref()), ("mutation", schema.mutation_type.as_ref())]
            .into_iter()
            .filter_map(|(op, t)| t.map(|t| (op, t.name.clone())))
        {
            let Some(root_type) = types_by_name.get(&type_name) else { continue };
            let Some(fields) = &root_type.fields else { continue };

            let mut sorted_fields = fields.clone();
            sorted_fields.sort_by(|a, b| a.name.cmp(&b.name));

            for field in sorted_fields {
                match create_tool(&state, &service_id, config, gql, op, &field, &types_by_name, &export_policy, Arc::clone(&call_policies), tool_manager) {
                    Ok(Some(name)) => registered.push(name),
                    Ok(None) => {}
                    Err(e) => warn!(service = %config.name, field = %field.name, error = %e, "skipping tool"),
                }
            }
        }

        info!(service = %config.name, tools = registered.len(), "GraphQL service registered");
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
        client
            .post(&state.address)
            .json(&serde_json::json!({ "query": "{ __typename }" }))
            .send()
            .await
            .map(|_| ())
            .map_err(|_| Error::ConnectFailed)
    }
}

#[allow(clippy::too_many_arguments)]
fn create_tool(
    state: &Arc<GraphqlUpstreamState>,
    service_id: &str,
    config: &ServiceConfig,
    gql: &GraphqlServiceConfig,
    op: &str,
    field: &Field,
    types_by_name: &HashMap<String, &GqlType>,
    export_policy: &ExportPolicy,
    call_policies: Arc<Vec<CallPolicy>>,
    tool_manager: &dyn ToolManager,
) -> Result<Option<String>> {
    let name = format!("{}-{}", config.name, field.name);
    let name = ServiceConfig::sanitize_name(&name);

    if !export_policy.is_exported(&name) {
        return Ok(None);
    }
    if CallPolicy::check_all(&call_policies, &name, None).is_err() {
        return Ok(None);
    }

    let selection_set = gql
        .selection_sets
        .get(&field.name)
        .cloned()
        .unwrap_or_else(|| default_selection_set(field, types_by_name));
    let query = synthesize_query(op, field, &selection_set);

    let tool_id = format!("{service_id}.{name}");
    let tool = Tool {
        name: name.clone(),
        title: None,
        description: None,
        input_schema: build_input_schema(field),
        output_schema: None,
        annotations: None,
    };

    let invoker = Arc::new(GraphqlTool {
        state: Arc::clone(state),
        query,
        policies: call_policies,
        tool_name: name.clone(),
    });

    tool_manager.add_tool(
        tool_id,
        RegisteredTool {
            tool,
            service_id: service_id.to_string(),
            invoker,
        },
    )?;

    Ok(Some(name))
}
