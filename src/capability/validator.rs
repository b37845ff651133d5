//! Structural validator for capability YAML definitions.
//!
//! Catches schema format errors, malformed providers, dangling URL placeholders,
//! and other structural issues that cause silent runtime failures.
//!
//! # Design
//!
//! Validation is split into independent checks, each returning zero or more
//! [`Issue`] items.  A single pass collects all issues so the caller receives a
//! complete picture rather than stopping at the first error.
//!
//! Checks are categorised by [`IssueSeverity`]:
//! - `Error` — the capability **cannot** function correctly.
//! - `Warning` — the capability may function but has a structural smell.
//!
//! # Example
//!
//! ```rust
//! use mcp_gateway::capability::validator::{validate_capability_definition, IssueSeverity};
//! use mcp_gateway::capability::CapabilityDefinition;
//!
//! let yaml = r#"
//! name: my_tool
//! description: Does something useful.
//! providers:
//!   primary:
//!     config:
//!       base_url: https://api.example.com
//!       path: /v1/items/{id}
//! schema:
//!   input:
//!     type: object
//!     properties:
//!       id:
//!         type: string
//!         description: The item identifier
//! "#;
//!
//! let cap: CapabilityDefinition = serde_yaml::from_str(yaml).unwrap();
//! let issues = validate_capability_definition(&cap, None);
//! assert!(issues.iter().all(|i| i.severity == IssueSeverity::Warning));
//! ```

use std::collections::{HashMap, HashSet};

use super::{CapabilityDefinition, RestConfig};

// ── Public types ──────────────────────────────────────────────────────────────

/// Severity of a structural validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IssueSeverity {
    /// The capability cannot function correctly; it will be skipped at load time.
    Error,
    /// The capability may work but has a structural smell that should be fixed.
    Warning,
}

impl std::fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => f.write_str("ERROR"),
            Self::Warning => f.write_str("WARN"),
        }
    }
}

/// A single structural validation finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// Severity level.
    pub severity: IssueSeverity,
    /// Short code identifying the check (e.g. `"CAP-001"`).
    pub code: &'static str,
    /// Human-readable description of the issue.
    pub message: String,
    /// Optional YAML field path for context (e.g. `"schema.input"`).
    pub field: Option<&'static str>,
}

impl Issue {
    fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Error,
            code,
            message: message.into(),
            field: None,
        }
    }

    fn warning(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Warning,
            code,
            message: message.into(),
            field: None,
        }
    }

    fn with_field(mut self, field: &'static str) -> Self {
        self.field = Some(field);
        self
    }
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(field) = self.field {
            write!(f, "[{}] {} ({}): {}", self.severity, self.code, field, self.message)
        } else {
            write!(f, "[{}] {}: {}", self.severity, self.code, self.message)
        }
    }
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Validate a single parsed capability definition.
///
/// `file_path` is used only in duplicate-detection messages; pass `None` when
/// validating in isolation (e.g., from `cap validate`).
///
/// Returns all [`Issue`]s found across every structural check.  An empty vec
/// means the definition is structurally sound.
#[must_use]
pub fn validate_capability_definition(
    cap: &CapabilityDefinition,
    file_path: Option<&str>,
) -> Vec<Issue> {
    let mut issues = Vec::new();

    check_name(&cap.name, &mut issues);
    check_description(&cap.description, &mut issues);
    check_schema_input(&cap.schema.input, &mut issues);
    check_schema_output(&cap.schema.output, &mut issues);
    check_providers(cap, &mut issues);

    if let Some(path) = file_path {
        check_path_label(path, &cap.name, &mut issues);
    }

    issues
}

/// Validate a set of capabilities loaded from one or more directories.
///
/// Runs per-capability checks on every definition and then cross-capability
/// duplicate-name detection.
///
/// Returns a map from capability name to its list of issues.  Only capabilities
/// that have at least one issue appear in the map.
#[must_use]
pub fn validate_capabilities(
    caps: &[(String, CapabilityDefinition)], // (file_path, definition)
) -> HashMap<String, Vec<Issue>> {
    let mut results: HashMap<String, Vec<Issue>> = HashMap::new();

    for (path, cap) in caps {
        let issues = validate_capability_definition(cap, Some(path));
        if !issues.is_empty() {
            results.insert(path.clone(), issues);
        }
    }

    // Cross-capability: duplicate name detection
    let duplicate_issues = check_duplicate_names(caps);
    for (path, issue) in duplicate_issues {
        results.entry(path).or_default().push(issue);
    }

    results
}

// ── Individual checks ─────────────────────────────────────────────────────────

/// CAP-001: name must be non-empty, lowercase, alphanumeric + underscores.
fn check_name(name: &str, issues: &mut Vec<Issue>) {
    if name.is_empty() {
        issues.push(
            Issue::error("CAP-001", "name is required").with_field("name"),
        );
        return;
    }

    let valid = name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid {
        issues.push(Issue::error(
            "CAP-001",
            format!(
                "name '{name}' must be lowercase alphanumeric and underscores only (no spaces, hyphens, or uppercase)",
            ),
        ).with_field("name"));
    }
}

/// Maximum description length before issuing a CAP-002 warning.
const MAX_DESCRIPTION_LEN: usize = 500;

/// CAP-002: description must be non-empty and under 500 characters.
fn check_description(description: &str, issues: &mut Vec<Issue>) {
    if description.trim().is_empty() {
        issues.push(
            Issue::warning("CAP-002", "description is empty; add a meaningful description")
                .with_field("description"),
        );
        return;
    }

    if description.len() > MAX_DESCRIPTION_LEN {
        issues.push(Issue::warning(
            "CAP-002",
            format!(
                "description is {} characters; keep it under {MAX_DESCRIPTION_LEN} for readability",
                description.len()
            ),
        ).with_field("description"));
    }
}

/// CAP-003: schema.input must be a valid JSON Schema object with `type: object`
/// and a non-empty `properties` map.
fn check_schema_input(input: &serde_json::Value, issues: &mut Vec<Issue>) {
    if input.is_null() || *input == serde_json::Value::Object(serde_json::Map::default()) {
        // Empty schema is not an error for webhook-only capabilities, but worth warning.
        return;
    }

    if let Some(t) = input.get("type").and_then(|v| v.as_str()) {
        if t != "object" {
            issues.push(Issue::error(
                "CAP-003",
                format!("schema.input.type must be 'object', got '{t}'"),
            ).with_field("schema.input.type"));
        }
    } else if input.is_object() {
        // Tolerate missing type when the value is an object (some YAMLs omit it).
    }

    // Properties must be an object, not an array.
    if let Some(props) = input.get("properties") {
        if !props.is_object() {
            issues.push(Issue::error(
                "CAP-003",
                "schema.input.properties must be a YAML mapping (object), not an array",
            ).with_field("schema.input.properties"));
        }
    }
}

/// CAP-004: schema.output, if present, must be a valid JSON Schema object.
fn check_schema_output(output: &serde_json::Value, issues: &mut Vec<Issue>) {
    if output.is_null() {
        return;
    }

    if let Some(t) = output.get("type").and_then(|v| v.as_str()) {
        if t != "object" {
            issues.push(Issue::warning(
                "CAP-004",
                format!("schema.output.type should be 'object', got '{t}'"),
            ).with_field("schema.output.type"));
        }
    }

    if let Some(props) = output.get("properties") {
        if !props.is_object() {
            issues.push(Issue::error(
                "CAP-004",
                "schema.output.properties must be a YAML mapping (object), not an array",
            ).with_field("schema.output.properties"));
        }
    }
}

/// CAP-005: providers must use named entries (e.g. `primary:`), not a list.
/// Each provider must have `base_url` or `endpoint`.
/// CAP-006: All `{param}` placeholders in URL/path must exist in `schema.input.properties`.
/// CAP-007: `static_params` keys must not overlap with `params` keys.
/// CAP-008: `base_url` must be a valid URL; `path` must start with `'/'`.
fn check_providers(cap: &CapabilityDefinition, issues: &mut Vec<Issue>) {
    if cap.providers.is_empty() && cap.webhooks.is_empty() {
        issues.push(
            Issue::error("CAP-005", "at least one provider or webhook is required")
                .with_field("providers"),
        );
        return;
    }

    let schema_props = extract_input_property_names(&cap.schema.input);

    for (provider_name, provider) in &cap.providers.named {
        let ctx = format!("providers.{provider_name}");
        check_rest_config(&provider.config, &ctx, &schema_props, issues);
    }

    for (idx, provider) in cap.providers.fallback.iter().enumerate() {
        let ctx = format!("providers.fallback[{idx}]");
        check_rest_config(&provider.config, &ctx, &schema_props, issues);
    }
}

/// Validate a single `RestConfig` entry.
fn check_rest_config(
    config: &RestConfig,
    context: &str,
    schema_props: &HashSet<String>,
    issues: &mut Vec<Issue>,
) {
    let has_base_url = !config.base_url.is_empty();
    let has_endpoint = !config.endpoint.is_empty();
    let has_path = !config.path.is_empty();

    if !has_base_url && !has_endpoint {
        issues.push(Issue::error(
            "CAP-005",
            format!("{context}: provider must have 'base_url' or 'endpoint'"),
        ));
    }

    // CAP-008: base_url must parse as a valid URL.
    // Skip validation when URL contains template references (e.g. {env.VAR})
    // since these are resolved at runtime, not parse-time.
    let contains_template = |s: &str| s.contains('{');
    if has_base_url && !contains_template(&config.base_url) && url::Url::parse(&config.base_url).is_err() {
        issues.push(Issue::error(
            "CAP-008",
            format!("{context}: base_url '{}' is not a valid URL", config.base_url),
        ));
    }

    if has_endpoint && !contains_template(&config.endpoint) && url::Url::parse(&config.endpoint).is_err() {
        issues.push(Issue::error(
            "CAP-008",
            format!("{context}: endpoint '{}' is not a valid URL", config.endpoint),
        ));
    }

    // CAP-008: path must start with '/'.
    if has_path && !config.path.starts_with('/') {
        issues.push(Issue::warning(
            "CAP-008",
            format!("{context}: path '{}' should start with '/'", config.path),
        ));
    }

    // CAP-006: dangling placeholders.
    check_placeholders_in_text(&config.path, context, "path", schema_props, issues);
    check_placeholders_in_text(&config.base_url, context, "base_url", schema_props, issues);
    check_placeholders_in_text(&config.endpoint, context, "endpoint", schema_props, issues);

    for (key, value) in &config.params {
        check_placeholders_in_text(value, context, &format!("params.{key}"), schema_props, issues);
    }

    for (key, value) in &config.headers {
        check_placeholders_in_text(value, context, &format!("headers.{key}"), schema_props, issues);
    }

    // CAP-007: static_params must not overlap with params.
    let static_keys: HashSet<&str> = config.static_params.keys().map(String::as_str).collect();
    let param_keys: HashSet<&str> = config.params.keys().map(String::as_str).collect();
    for overlap in static_keys.intersection(&param_keys) {
        issues.push(Issue::warning(
            "CAP-007",
            format!("{context}: key '{overlap}' appears in both 'static_params' and 'params'; static_params will be overridden by caller"),
        ));
    }
}

/// Scan `text` for `{placeholder}` patterns and report any not in `schema_props`.
///
/// Skips `{env.VAR}` style references — those are not schema parameters.
fn check_placeholders_in_text(
    text: &str,
    context: &str,
    field: &str,
    schema_props: &HashSet<String>,
    issues: &mut Vec<Issue>,
) {
    for placeholder in extract_placeholders(text) {
        // System-resolved references are not schema parameters.
        // env.VAR — environment variable substitution
        // keychain.KEY — macOS Keychain lookup
        // oauth.PROVIDER — OAuth token injection
        // access_token / refresh_token — OAuth runtime injection
        // api_key — runtime API key injection
        const RUNTIME_PLACEHOLDERS: &[&str] = &[
            "access_token", "refresh_token", "api_key", "bearer_token", "auth_token",
        ];
        if placeholder.starts_with("env.")
            || placeholder.starts_with("keychain.")
            || placeholder.starts_with("oauth.")
            || RUNTIME_PLACEHOLDERS.contains(&placeholder.as_str())
        {
            continue;
        }

        if !schema_props.contains(&placeholder) {
            issues.push(Issue::error(
                "CAP-006",
                format!(
                    "{context}.{field}: placeholder '{{{placeholder}}}' has no matching entry in schema.input.properties"
                ),
            ));
        }
    }
}

/// CAP-009: Duplicate capability names across files.
///
/// Returns `(file_path, Issue)` pairs so callers can attach them to the right file.
fn check_duplicate_names(
    caps: &[(String, CapabilityDefinition)],
) -> Vec<(String, Issue)> {
    let mut seen: HashMap<&str, &str> = HashMap::new(); // name -> first_path
    let mut results = Vec::new();

    for (path, cap) in caps {
        if cap.name.is_empty() {
            continue;
        }
        match seen.get(cap.name.as_str()) {
            Some(&first_path) => {
                results.push((
                    path.clone(),
                    Issue::warning(
                        "CAP-009",
                        format!(
                            "capability name '{}' is also defined in '{}'; the last-loaded definition wins",
                            cap.name, first_path
                        ),
                    ).with_field("name"),
                ));
            }
            None => {
                seen.insert(&cap.name, path);
            }
        }
    }

    results
}

/// Warn when the file stem (sans extension) does not match the `name` field.
///
/// This is informational — mismatches lead to confusion but are not blocking.
fn check_path_label(file_path: &str, name: &str, issues: &mut Vec<Issue>) {
    let stem = std::path::Path::new(file_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");

    if !stem.is_empty() && !name.is_empty() && stem != name {
        issues.push(Issue::warning(
            "CAP-010",
            format!("file name '{stem}.yaml' does not match capability name '{name}'; rename the file to match"),
        ).with_field("name"));
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Extract all `{placeholder}` names from a string.
fn extract_placeholders(text: &str) -> impl Iterator<Item = String> + '_ {
    let mut out = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some((i, ch)) = chars.next() {
        if ch == '{' {
            let start = i + 1;
            let mut end = start;
            for (j, c) in chars.by_ref() {
                if c == '}' {
                    end = j;
                    break;
                }
            }
            if end > start {
                out.push(text[start..end].to_string());
            }
        }
    }

    out.into_iter()
}

/// Collect all top-level property names from a JSON Schema input.
fn extract_input_property_names(input: &serde_json::Value) -> HashSet<String> {
    input
        .get("properties")
        .and_then(|p| p.as_object())
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
