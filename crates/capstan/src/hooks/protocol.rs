//! The hook wire protocol and output aggregation.
//!
//! Hooks receive one JSON object on stdin and answer with an exit code and
//! an optional JSON object on stdout:
//!
//! - exit `0` — success; stdout (if any) is parsed as a [`HookOutput`];
//! - exit `2` — blocking error; the call is denied and stderr is surfaced;
//! - exit `124` — timeout; the configured timeout behavior applies;
//! - any other non-zero — non-blocking error; the configured failure
//!   behavior applies.
//!
//! When several hooks match one event, their outputs are folded in matcher
//! order: a deny short-circuits, otherwise the most restrictive decision
//! wins, contexts accumulate, and conflicting rewrites resolve
//! last-writer-wins with a warning recorded for the result metadata.

use crate::context::PermissionMode;
use crate::hooks::config::{FallbackBehavior, HookEvent, HookSettings};
use crate::permission::rules::PermissionDecision;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Exit code a hook uses to signal a blocking error.
pub const EXIT_BLOCKING: i32 = 2;

/// Exit code recorded when a hook exceeds its time budget.
pub const EXIT_TIMEOUT: i32 = 124;

// ── Input ──────────────────────────────────────────────────────────

/// The JSON object written to every hook's stdin. Event-specific fields
/// are omitted when absent.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HookInput {
    pub hook_event_name: String,
    pub hook_execution_id: String,
    /// ISO 8601.
    pub timestamp: DateTime<Utc>,
    pub project_dir: String,
    pub session_id: String,
    pub permission_mode: PermissionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    /// PostToolUse only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_response: Option<String>,
    // PostToolUseFailure only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_interrupt: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_timeout: Option<bool>,
    /// UserPromptSubmit only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Notification only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ── Output ─────────────────────────────────────────────────────────

/// Top-level `decision.behavior` values.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DecisionBehavior {
    Approve,
    Block,
    /// Non-blocking: the hook keeps running but its result is ignored.
    Async,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HookDecision {
    pub behavior: DecisionBehavior,
}

/// Per-event structured output.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HookSpecificOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_event_name: Option<String>,
    /// PreToolUse / PermissionRequest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision: Option<PermissionDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision_reason: Option<String>,
    /// PreToolUse: replacement arguments, revalidated against the schema.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<Value>,
    /// PostToolUse: appended to the model-facing result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
    /// PostToolUse: replaces the tool output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_output: Option<String>,
    /// UserPromptSubmit: replacement prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_prompt: Option<String>,
    /// Stop / SubagentStop: `true` vetoes stopping.
    #[serde(rename = "continue", skip_serializing_if = "Option::is_none")]
    pub continue_run: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The JSON object a hook may print on stdout at exit 0.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HookOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<HookDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppress_output: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_specific_output: Option<HookSpecificOutput>,
}

/// Parse a hook's stdout. Empty output means "no structured response";
/// unparsable output is treated the same, with a warning.
pub fn parse_output(command: &str, stdout: &str) -> Option<HookOutput> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(output) => Some(output),
        Err(e) => {
            warn!("hook '{command}' produced unparsable output: {e}");
            None
        }
    }
}

// ── Run records and aggregation ────────────────────────────────────

/// What actually happened when one hook entry ran.
#[derive(Clone, Debug)]
pub struct HookRunRecord {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// The folded outcome of every hook that fired for one event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HookOutcome {
    /// Combined permission decision, when any hook expressed one.
    pub decision: Option<PermissionDecision>,
    pub decision_reason: Option<String>,
    /// Last-writer replacement for the tool arguments (PreToolUse).
    pub updated_input: Option<Value>,
    /// Last-writer replacement for the tool output (PostToolUse).
    pub updated_output: Option<String>,
    /// Replacement prompt (UserPromptSubmit).
    pub updated_prompt: Option<String>,
    /// Contexts appended by all participating hooks, in matcher order.
    pub additional_context: Vec<String>,
    pub system_messages: Vec<String>,
    /// Conflicting rewrites, non-blocking failures, ignored timeouts.
    pub warnings: Vec<String>,
    /// Stop/SubagentStop veto reason, when a hook asked to continue.
    pub stop_veto: Option<String>,
    /// Set when any hook asked to suppress the tool output from display.
    pub suppress_output: bool,
}

impl HookOutcome {
    pub fn is_deny(&self) -> bool {
        self.decision == Some(PermissionDecision::Deny)
    }
}

/// Fold run records (in matcher order) into one [`HookOutcome`].
pub fn aggregate(event: HookEvent, records: &[HookRunRecord], settings: &HookSettings) -> HookOutcome {
    let mut outcome = HookOutcome::default();

    for record in records {
        // Deny short-circuits: later hooks cannot weaken it.
        if outcome.is_deny() {
            break;
        }

        if record.timed_out || record.exit_code == EXIT_TIMEOUT {
            apply_fallback(
                &mut outcome,
                settings.timeout_behavior,
                format!("hook '{}' timed out", record.command),
            );
            continue;
        }

        match record.exit_code {
            0 => {
                let Some(output) = parse_output(&record.command, &record.stdout) else {
                    continue;
                };
                fold_output(&mut outcome, event, &record.command, output);
            }
            EXIT_BLOCKING => {
                let reason = if record.stderr.trim().is_empty() {
                    format!("blocked by hook '{}'", record.command)
                } else {
                    record.stderr.trim().to_string()
                };
                merge_decision(&mut outcome, PermissionDecision::Deny, reason);
            }
            code => {
                apply_fallback(
                    &mut outcome,
                    settings.failure_behavior,
                    format!("hook '{}' exited with code {code}", record.command),
                );
            }
        }
    }

    outcome
}

fn fold_output(outcome: &mut HookOutcome, event: HookEvent, command: &str, output: HookOutput) {
    if let Some(message) = output.system_message {
        outcome.system_messages.push(message);
    }
    if output.suppress_output == Some(true) {
        outcome.suppress_output = true;
    }

    // Top-level decision: approve/block map onto the permission lattice;
    // async is non-blocking with the result ignored.
    if let Some(decision) = output.decision {
        match decision.behavior {
            DecisionBehavior::Approve => {
                merge_decision(
                    outcome,
                    PermissionDecision::Allow,
                    format!("approved by hook '{command}'"),
                );
            }
            DecisionBehavior::Block => {
                merge_decision(
                    outcome,
                    PermissionDecision::Deny,
                    format!("blocked by hook '{command}'"),
                );
            }
            DecisionBehavior::Async => {}
        }
    }

    let Some(specific) = output.hook_specific_output else {
        return;
    };

    // The explicit per-event decision wins over anything the global
    // fallback behaviors would have said.
    if let Some(decision) = specific.permission_decision {
        let reason = specific
            .permission_decision_reason
            .clone()
            .unwrap_or_else(|| format!("decision from hook '{command}'"));
        merge_decision(outcome, decision, reason);
    }

    if let Some(input) = specific.updated_input {
        if outcome.updated_input.is_some() {
            outcome
                .warnings
                .push(format!("hook '{command}' overwrote an earlier input rewrite"));
        }
        outcome.updated_input = Some(input);
    }
    if let Some(replacement) = specific.updated_output {
        if outcome.updated_output.is_some() {
            outcome
                .warnings
                .push(format!("hook '{command}' overwrote an earlier output rewrite"));
        }
        outcome.updated_output = Some(replacement);
    }
    if let Some(prompt) = specific.updated_prompt {
        if outcome.updated_prompt.is_some() {
            outcome
                .warnings
                .push(format!("hook '{command}' overwrote an earlier prompt rewrite"));
        }
        outcome.updated_prompt = Some(prompt);
    }
    if let Some(context) = specific.additional_context {
        outcome.additional_context.push(context);
    }

    if matches!(event, HookEvent::Stop | HookEvent::SubagentStop)
        && specific.continue_run == Some(true)
    {
        let reason = specific
            .reason
            .unwrap_or_else(|| format!("hook '{command}' asked to continue"));
        outcome.stop_veto = Some(reason);
    }
}

fn merge_decision(outcome: &mut HookOutcome, decision: PermissionDecision, reason: String) {
    let merged = match outcome.decision {
        Some(existing) => existing.most_restrictive(decision),
        None => decision,
    };
    // The reason tracks whichever decision is currently winning.
    if outcome.decision != Some(merged) || outcome.decision_reason.is_none() {
        outcome.decision_reason = Some(reason);
    }
    outcome.decision = Some(merged);
}

fn apply_fallback(outcome: &mut HookOutcome, behavior: FallbackBehavior, what: String) {
    match behavior {
        FallbackBehavior::Ignore => outcome.warnings.push(what),
        FallbackBehavior::Deny => merge_decision(outcome, PermissionDecision::Deny, what),
        FallbackBehavior::Ask => merge_decision(outcome, PermissionDecision::Ask, what),
    }
}

// ── Tests ──────────────────────────────────────────────────────────
