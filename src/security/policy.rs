//! Tool allow/deny policies for the gateway.
//!
//! Provides configurable per-tool access control that blocks high-risk
//! tools by default and allows operators to customize access.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default tools blocked for security reasons.
/// These are tools commonly associated with filesystem write access,
/// arbitrary code execution, or destructive operations.
const DEFAULT_DENIED_PATTERNS: &[&str] = &[
    // Filesystem mutation tools (common in MCP servers)
    "write_file",
    "delete_file",
    "move_file",
    "create_directory",
    // Shell/code execution
    "run_command",
    "execute_command",
    "shell_exec",
    "run_script",
    "eval",
    // Database mutation
    "drop_table",
    "drop_database",
    "truncate_table",
    // System administration
    "kill_process",
    "shutdown",
    "reboot",
];

/// Tool access policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPolicyConfig {
    /// Enable tool policy enforcement.
    pub enabled: bool,
    /// Default action when a tool matches neither allow nor deny.
    pub default_action: PolicyAction,
    /// Explicit allow list (takes precedence over deny).
    /// Supports exact names and glob-like `*` suffix patterns.
    pub allow: Vec<String>,
    /// Explicit deny list.
    /// Supports exact names and glob-like `*` suffix patterns.
    pub deny: Vec<String>,
    /// Whether to include default deny patterns for high-risk tools.
    pub use_default_deny: bool,
    /// Log denied tool invocations (for auditing).
    pub log_denied: bool,
}

impl Default for ToolPolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_action: PolicyAction::Allow,
            allow: Vec::new(),
            deny: Vec::new(),
            use_default_deny: true,
            log_denied: true,
        }
    }
}

/// What to do when a tool is not explicitly allowed or denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    /// Allow the tool invocation.
    Allow,
    /// Deny the tool invocation.
    Deny,
}

/// Compiled tool policy for efficient runtime evaluation.
#[derive(Debug)]
pub struct ToolPolicy {
    /// Whether policy enforcement is active.
    enabled: bool,
    /// Default action for unmatched tools.
    default_action: PolicyAction,
    /// Exact allow set.
    allow_exact: HashSet<String>,
    /// Allow prefix patterns (from `pattern*` entries).
    allow_prefixes: Vec<String>,
    /// Exact deny set.
    deny_exact: HashSet<String>,
    /// Deny prefix patterns (from `pattern*` entries).
    deny_prefixes: Vec<String>,
    /// Whether to log denied invocations.
    log_denied: bool,
}

impl ToolPolicy {
    /// Compile a policy from configuration.
    #[must_use]
    pub fn from_config(config: &ToolPolicyConfig) -> Self {
        let mut deny_exact = HashSet::new();
        let mut deny_prefixes = Vec::new();
        let mut allow_exact = HashSet::new();
        let mut allow_prefixes = Vec::new();

        // Add default deny patterns if enabled
        if config.use_default_deny {
            for pattern in DEFAULT_DENIED_PATTERNS {
                deny_exact.insert((*pattern).to_string());
            }
        }

        // Add configured deny patterns
        for pattern in &config.deny {
            if let Some(prefix) = pattern.strip_suffix('*') {
                deny_prefixes.push(prefix.to_string());
            } else {
                deny_exact.insert(pattern.clone());
            }
        }

        // Add configured allow patterns
        for pattern in &config.allow {
            if let Some(prefix) = pattern.strip_suffix('*') {
                allow_prefixes.push(prefix.to_string());
            } else {
                allow_exact.insert(pattern.clone());
            }
        }

        Self {
            enabled: config.enabled,
            default_action: config.default_action,
            allow_exact,
            allow_prefixes,
            deny_exact,
            deny_prefixes,
            log_denied: config.log_denied,
        }
    }

    /// Check whether a tool invocation is allowed.
    ///
    /// Evaluation order:
    /// 1. If policy is disabled, always allow.
    /// 2. If tool is in explicit allow list, allow (takes precedence).
    /// 3. If tool is in deny list, deny.
    /// 4. Fall back to default action.
    ///
    /// # Errors
    ///
    /// Returns `Error::Protocol` if the tool is denied by policy.
    pub fn check(&self, server: &str, tool: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let qualified = format!("{server}:{tool}");

        // Check allow list first (takes precedence)
        if self.is_allowed(tool, &qualified) {
            return Ok(());
        }

        // Check deny list
        if self.is_denied(tool, &qualified) {
            if self.log_denied {
                tracing::warn!(
                    server = server,
                    tool = tool,
                    "Tool invocation denied by policy"
                );
            }
            return Err(Error::Protocol(format!(
                "Tool '{tool}' on server '{server}' is blocked by security policy"
            )));
        }

        // Apply default action
        match self.default_action {
            PolicyAction::Allow => Ok(()),
            PolicyAction::Deny => {
                if self.log_denied {
                    tracing::warn!(
                        server = server,
                        tool = tool,
                        "Tool invocation denied by default policy"
                    );
                }
                Err(Error::Protocol(format!(
                    "Tool '{tool}' on server '{server}' is not in the allow list"
                )))
            }
        }
    }

    /// Check if a tool is explicitly allowed.
    fn is_allowed(&self, tool: &str, qualified: &str) -> bool {
        if self.allow_exact.contains(tool) || self.allow_exact.contains(qualified) {
            return true;
        }
        self.allow_prefixes
            .iter()
            .any(|prefix| tool.starts_with(prefix) || qualified.starts_with(prefix))
    }

    /// Check if a tool is denied.
    fn is_denied(&self, tool: &str, qualified: &str) -> bool {
        if self.deny_exact.contains(tool) || self.deny_exact.contains(qualified) {
            return true;
        }
        self.deny_prefixes
            .iter()
            .any(|prefix| tool.starts_with(prefix) || qualified.starts_with(prefix))
    }
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self::from_config(&ToolPolicyConfig::default())
    }
}
