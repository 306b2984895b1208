//! Permission rules and the allow/ask/deny checker.
//!
//! Rules are operator-written strings of the form `Tool` or
//! `Tool(field:pattern)`, grouped into three lists. Evaluation priority is
//! fixed: `deny` beats `allow` beats `ask` beats the implicit default. The
//! implicit default asks when any rule mentions the tool at all (the
//! operator clearly cares about it), otherwise allows Read-kind tools and
//! asks for everything else.
//!
//! Modes adjust the outcome, not the matching: `Yolo` promotes a final ask
//! to allow (deny still binds), `Plan` denies every Edit- and Execute-kind
//! call outright, and `AutoEdit` lifts the implicit ask for Edit-kind
//! calls.
//!
//! Value matching tries, in order: exact string equality, the bare `*`
//! wildcard, then glob (`**`, `{a,b}`, `?`).

use crate::context::PermissionMode;
use crate::permission::pattern::CallSignature;
use crate::tools::registry::ToolKind;
use globset::GlobBuilder;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

// ── Decision ───────────────────────────────────────────────────────

/// The three-valued permission outcome.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDecision {
    Allow,
    Ask,
    Deny,
}

impl PermissionDecision {
    /// `deny` > `ask` > `allow`. Used when aggregating multiple sources.
    pub fn most_restrictive(self, other: Self) -> Self {
        use PermissionDecision::*;
        match (self, other) {
            (Deny, _) | (_, Deny) => Deny,
            (Ask, _) | (_, Ask) => Ask,
            _ => Allow,
        }
    }
}

impl fmt::Display for PermissionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PermissionDecision::Allow => "allow",
            PermissionDecision::Ask => "ask",
            PermissionDecision::Deny => "deny",
        };
        f.write_str(name)
    }
}

/// Outcome of a rule check, with the matched rule (if any) for display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionCheck {
    pub decision: PermissionDecision,
    /// The rule string that produced the decision, when one matched.
    pub matched_rule: Option<String>,
    /// Human-readable explanation.
    pub reason: String,
}

// ── PermissionRule ─────────────────────────────────────────────────

/// One parsed rule: a tool name plus an optional `field:pattern` refinement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionRule {
    raw: String,
    tool: String,
    field: Option<String>,
    pattern: Option<String>,
}

impl PermissionRule {
    /// Parse `Tool` or `Tool(field:pattern)`. Total: a string without the
    /// refinement shape is treated as a bare tool-name rule.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some((tool, rest)) = raw.split_once('(')
            && let Some(inner) = rest.strip_suffix(')')
            && let Some((field, pattern)) = inner.split_once(':')
        {
            return Self {
                raw: raw.to_string(),
                tool: tool.trim().to_string(),
                field: Some(field.trim().to_string()),
                pattern: Some(pattern.to_string()),
            };
        }
        Self {
            raw: raw.to_string(),
            tool: raw.to_string(),
            field: None,
            pattern: None,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether this rule is about the given tool at all.
    pub fn mentions_tool(&self, tool: &str) -> bool {
        self.tool == tool || self.tool == "*"
    }

    /// Whether this rule matches the concrete signature.
    pub fn matches(&self, sig: &CallSignature) -> bool {
        if !self.mentions_tool(&sig.tool) {
            return false;
        }
        match (&self.field, &self.pattern) {
            // Bare tool rule matches every call of that tool.
            (None, _) | (_, None) => true,
            (Some(field), Some(pattern)) => {
                let (Some(sig_field), Some(value)) = (&sig.field, &sig.value) else {
                    return false;
                };
                sig_field == field && match_value(pattern, value)
            }
        }
    }
}

/// Match a rule pattern against a concrete value: exact, `*`, then glob.
fn match_value(pattern: &str, value: &str) -> bool {
    if pattern == value {
        return true;
    }
    if pattern == "*" {
        return true;
    }
    if pattern.contains(['*', '?', '[', '{']) {
        match GlobBuilder::new(pattern)
            .literal_separator(false)
            .build()
        {
            Ok(glob) => return glob.compile_matcher().is_match(value),
            Err(e) => {
                warn!("unparsable permission pattern '{pattern}': {e}");
                return false;
            }
        }
    }
    false
}

// ── RuleSet and checker ────────────────────────────────────────────

/// The three rule lists, in evaluation priority order.
#[derive(Clone, Debug, Default)]
pub struct RuleSet {
    pub allow: Vec<PermissionRule>,
    pub ask: Vec<PermissionRule>,
    pub deny: Vec<PermissionRule>,
}

impl RuleSet {
    /// Parse from raw string lists (the shape stored in settings).
    pub fn from_lists(allow: &[String], ask: &[String], deny: &[String]) -> Self {
        let parse = |list: &[String]| list.iter().map(|s| PermissionRule::parse(s)).collect();
        Self {
            allow: parse(allow),
            ask: parse(ask),
            deny: parse(deny),
        }
    }

    fn first_match<'a>(
        rules: &'a [PermissionRule],
        sig: &CallSignature,
    ) -> Option<&'a PermissionRule> {
        rules.iter().find(|r| r.matches(sig))
    }

    fn any_mentions(&self, tool: &str) -> bool {
        self.allow
            .iter()
            .chain(&self.ask)
            .chain(&self.deny)
            .any(|r| r.tool == tool)
    }
}

/// Evaluates rules for a concrete call under a [`PermissionMode`].
#[derive(Clone, Debug, Default)]
pub struct PermissionChecker {
    rules: RuleSet,
}

impl PermissionChecker {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    /// Decide allow/ask/deny for one call.
    pub fn check(
        &self,
        kind: ToolKind,
        sig: &CallSignature,
        mode: PermissionMode,
    ) -> PermissionCheck {
        // Plan mode is read-only regardless of rules.
        if mode == PermissionMode::Plan
            && matches!(kind, ToolKind::Edit | ToolKind::Execute)
        {
            return PermissionCheck {
                decision: PermissionDecision::Deny,
                matched_rule: None,
                reason: format!("{kind} tools are unavailable in plan mode"),
            };
        }

        if let Some(rule) = RuleSet::first_match(&self.rules.deny, sig) {
            return PermissionCheck {
                decision: PermissionDecision::Deny,
                matched_rule: Some(rule.raw().to_string()),
                reason: format!("denied by rule {}", rule.raw()),
            };
        }
        if let Some(rule) = RuleSet::first_match(&self.rules.allow, sig) {
            return PermissionCheck {
                decision: PermissionDecision::Allow,
                matched_rule: Some(rule.raw().to_string()),
                reason: format!("allowed by rule {}", rule.raw()),
            };
        }

        let (decision, matched_rule, reason) =
            if let Some(rule) = RuleSet::first_match(&self.rules.ask, sig) {
                (
                    PermissionDecision::Ask,
                    Some(rule.raw().to_string()),
                    format!("rule {} requires approval", rule.raw()),
                )
            } else {
                self.implicit_default(kind, sig, mode)
            };

        // Yolo promotes the final ask; matched deny rules never get here.
        if mode == PermissionMode::Yolo && decision == PermissionDecision::Ask {
            return PermissionCheck {
                decision: PermissionDecision::Allow,
                matched_rule,
                reason: "approval skipped in yolo mode".to_string(),
            };
        }

        PermissionCheck {
            decision,
            matched_rule,
            reason,
        }
    }

    fn implicit_default(
        &self,
        kind: ToolKind,
        sig: &CallSignature,
        mode: PermissionMode,
    ) -> (PermissionDecision, Option<String>, String) {
        if self.rules.any_mentions(&sig.tool) {
            return (
                PermissionDecision::Ask,
                None,
                format!("rules exist for '{}' but none matched", sig.tool),
            );
        }
        if kind == ToolKind::Read {
            return (
                PermissionDecision::Allow,
                None,
                "read-only tools run without approval".to_string(),
            );
        }
        if mode == PermissionMode::AutoEdit && kind == ToolKind::Edit {
            return (
                PermissionDecision::Allow,
                None,
                "edits auto-approved in autoedit mode".to_string(),
            );
        }
        (
            PermissionDecision::Ask,
            None,
            format!("no rule covers '{}'", sig.tool),
        )
    }
}

// ── Tests ──────────────────────────────────────────────────────────
