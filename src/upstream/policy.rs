//! Compiled regex-based policies gating tool visibility and invocation.
//!
//! Shape mirrors [`crate::security::policy::ToolPolicy`] (allow-over-deny precedence,
//! a `from_config` compile step, a single `check` entry point) but trades glob-suffix
//! matching for full regex, and gates on two independent axes: export (registration-time
//! visibility) and call (invocation-time allow/deny, optionally keyed on arguments too).

use regex::Regex;
use serde_json::Value;

use crate::upstream::config::{
    CallAction, CallPolicyConfig, ExportAction, ExportPolicyConfig,
};
use crate::{Error, Result};

/// One compiled export rule.
struct CompiledExportRule {
    name_regex: Regex,
    action: ExportAction,
}

/// Compiled tool/resource/prompt visibility policy.
pub struct ExportPolicy {
    rules: Vec<CompiledExportRule>,
    default_action: ExportAction,
}

impl ExportPolicy {
    /// Compile an [`ExportPolicyConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::PolicyCompile`] if any rule's `name_regex` fails to compile.
    pub fn compile(config: &ExportPolicyConfig) -> Result<Self> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            let name_regex = Regex::new(&rule.name_regex)
                .map_err(|e| Error::PolicyCompile(format!("{}: {e}", rule.name_regex)))?;
            rules.push(CompiledExportRule {
                name_regex,
                action: rule.action,
            });
        }
        Ok(Self {
            rules,
            default_action: config.default_action,
        })
    }

    /// An always-export policy, used where no configuration was supplied.
    #[must_use]
    pub fn allow_all() -> Self {
        Self {
            rules: Vec::new(),
            default_action: ExportAction::Export,
        }
    }

    /// Whether `name` should be exported: first matching rule wins, else `default_action`.
    #[must_use]
    pub fn is_exported(&self, name: &str) -> bool {
        for rule in &self.rules {
            if rule.name_regex.is_match(name) {
                return rule.action == ExportAction::Export;
            }
        }
        self.default_action == ExportAction::Export
    }
}

/// One compiled call rule.
struct CompiledCallRule {
    name_regex: Regex,
    argument_regex: Option<Regex>,
    action: CallAction,
}

/// Compiled invocation-time allow/deny policy for one service.
///
/// A service may declare several [`CallPolicyConfig`] blocks; per §6, all must compile or
/// the service registers with no tools (the error is logged, not surfaced to the caller).
pub struct CallPolicy {
    rules: Vec<CompiledCallRule>,
    default_action: CallAction,
}

impl CallPolicy {
    /// Compile a single [`CallPolicyConfig`] block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PolicyCompile`] if any rule's `name_regex` or `argument_regex`
    /// fails to compile.
    pub fn compile(config: &CallPolicyConfig) -> Result<Self> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            let name_regex = Regex::new(&rule.name_regex)
                .map_err(|e| Error::PolicyCompile(format!("{}: {e}", rule.name_regex)))?;
            let argument_regex = rule
                .argument_regex
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|e| Error::PolicyCompile(e.to_string()))?;
            rules.push(CompiledCallRule {
                name_regex,
                argument_regex,
                action: rule.action,
            });
        }
        Ok(Self {
            rules,
            default_action: config.default_action,
        })
    }

    /// Compile a list of policy blocks, stopping at the first compile failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PolicyCompile`] if any block fails to compile.
    pub fn compile_all(configs: &[CallPolicyConfig]) -> Result<Vec<Self>> {
        configs.iter().map(Self::compile).collect()
    }

    /// An always-allow policy, used where no configuration was supplied.
    #[must_use]
    pub fn allow_all() -> Self {
        Self {
            rules: Vec::new(),
            default_action: CallAction::Allow,
        }
    }

    /// Evaluate `name` (and, if present, JSON-encoded `arguments`) against this policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] wrapping the policy's denial when the matched (or
    /// default) action is [`CallAction::Deny`].
    pub fn check(&self, name: &str, arguments: Option<&Value>) -> Result<()> {
        let encoded_args = arguments.map(|v| v.to_string());
        for rule in &self.rules {
            if !rule.name_regex.is_match(name) {
                continue;
            }
            if let Some(arg_re) = &rule.argument_regex {
                let Some(encoded) = encoded_args.as_deref() else {
                    continue;
                };
                if !arg_re.is_match(encoded) {
                    continue;
                }
            }
            return Self::apply(rule.action, name);
        }
        Self::apply(self.default_action, name)
    }

    fn apply(action: CallAction, name: &str) -> Result<()> {
        match action {
            CallAction::Allow => Ok(()),
            CallAction::Deny => Err(Error::Internal(format!("call denied by policy: {name}"))),
        }
    }

    /// Evaluate `name`/`arguments` against every policy in `policies`; deny if any one denies.
    ///
    /// # Errors
    ///
    /// Returns the first [`Error::Internal`] denial encountered.
    pub fn check_all(policies: &[Self], name: &str, arguments: Option<&Value>) -> Result<()> {
        for policy in policies {
            policy.check(name, arguments)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::config::{CallRule, ExportRule};

    #[test]
    fn export_policy_default_export() {
        let policy = ExportPolicy::compile(&ExportPolicyConfig::default()).unwrap();
        assert!(policy.is_exported("anything"));
    }

    #[test]
    fn export_policy_explicit_unexport_rule_wins() {
        let config = ExportPolicyConfig {
            rules: vec![ExportRule {
                name_regex: "^internal_.*".to_string(),
                action: ExportAction::Unexport,
            }],
            default_action: ExportAction::Export,
        };
        let policy = ExportPolicy::compile(&config).unwrap();
        assert!(!policy.is_exported("internal_debug"));
        assert!(policy.is_exported("public_tool"));
    }

    #[test]
    fn export_policy_rejects_bad_regex() {
        let config = ExportPolicyConfig {
            rules: vec![ExportRule {
                name_regex: "(unclosed".to_string(),
                action: ExportAction::Export,
            }],
            default_action: ExportAction::Export,
        };
        assert!(ExportPolicy::compile(&config).is_err());
    }

    #[test]
    fn call_policy_deny_by_name() {
        let config = CallPolicyConfig {
            rules: vec![CallRule {
                name_regex: "^delete_.*".to_string(),
                argument_regex: None,
                action: CallAction::Deny,
            }],
            default_action: CallAction::Allow,
        };
        let policy = CallPolicy::compile(&config).unwrap();
        assert!(policy.check("delete_user", None).is_err());
        assert!(policy.check("get_user", None).is_ok());
    }

    #[test]
    fn call_policy_argument_regex_must_also_match() {
        let config = CallPolicyConfig {
            rules: vec![CallRule {
                name_regex: "^update_.*".to_string(),
                argument_regex: Some(r#""role"\s*:\s*"admin""#.to_string()),
                action: CallAction::Deny,
            }],
            default_action: CallAction::Allow,
        };
        let policy = CallPolicy::compile(&config).unwrap();
        let safe_args = serde_json::json!({"role": "viewer"});
        let escalating_args = serde_json::json!({"role": "admin"});
        assert!(policy.check("update_user", Some(&safe_args)).is_ok());
        assert!(policy.check("update_user", Some(&escalating_args)).is_err());
    }

    #[test]
    fn call_policy_default_deny() {
        let config = CallPolicyConfig {
            rules: vec![],
            default_action: CallAction::Deny,
        };
        let policy = CallPolicy::compile(&config).unwrap();
        assert!(policy.check("anything", None).is_err());
    }
}
