//! Error taxonomy for tool execution.
//!
//! Every failure that can surface from the execution core is a [`ToolError`]
//! carrying a closed [`ErrorKind`]. Errors are values: pipeline stages return
//! them through explicit outcomes rather than panicking, and the kind is
//! stable so callers (and the retry layer) can branch on it without string
//! matching.
//!
//! The `message` is human-readable and never contains stack traces; anything
//! bulky (validation paths, per-call failures in a batch aggregate) goes
//! into `details` as JSON.

use serde::{Deserialize, Serialize};
use std::fmt;

// ── ErrorKind ──────────────────────────────────────────────────────

/// The closed set of failure kinds surfaced by the execution core.
///
/// Kinds are stable identifiers: they appear in serialized results, drive
/// the retry policy, and are matched by tests. New kinds are additions, not
/// renames.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Registry lookup failed. Not retried.
    ToolNotFound,
    /// Arguments did not match the tool's schema. Not retried.
    ValidationError,
    /// Denied by permission rules or a hook. Not retried.
    PermissionDenied,
    /// The operator declined the confirmation prompt. Not retried.
    ConfirmationRejected,
    /// The tool itself failed during execution. Retried only when the
    /// error is marked retryable.
    ExecutionError,
    /// An invocation or hook exceeded its time budget.
    Timeout,
    /// Cooperative cancellation fired. Never retried.
    Cancelled,
    /// The batch's dependency graph contains a cycle; the whole batch is
    /// rejected.
    CyclicDependency,
    /// A hook exited non-zero (non-blocking); the effect is governed by the
    /// configured failure behavior.
    HookFailure,
}

impl ErrorKind {
    /// Stable string name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ToolNotFound => "ToolNotFound",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::ConfirmationRejected => "ConfirmationRejected",
            ErrorKind::ExecutionError => "ExecutionError",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::CyclicDependency => "CyclicDependency",
            ErrorKind::HookFailure => "HookFailure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── ToolError ──────────────────────────────────────────────────────

/// A failure surfaced by the execution core.
///
/// Constructed through the kind-specific helpers so that retryability is
/// set consistently: timeouts default to retryable, execution errors carry
/// an explicit flag, everything else is permanent.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolError {
    pub kind: ErrorKind,
    pub message: String,
    /// Structured context (field paths, per-call failures, hook stderr).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Whether the failure is transient. Consulted by the retry policy
    /// together with its retryable-kind set.
    #[serde(default)]
    pub retryable: bool,
}

impl ToolError {
    /// Create an error with the given kind and message. Retryability is
    /// derived from the kind's default.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            retryable: matches!(kind, ErrorKind::Timeout),
        }
    }

    /// Attach structured details (builder pattern).
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Registry lookup failure for `name`.
    pub fn tool_not_found(name: &str) -> Self {
        Self::new(
            ErrorKind::ToolNotFound,
            format!("unknown tool '{name}'"),
        )
    }

    /// Schema mismatch at `field_path` (e.g. `timeout` or `filters[2].kind`).
    pub fn validation(field_path: &str, reason: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::ValidationError,
            format!("invalid argument '{field_path}': {}", reason.into()),
        )
        .with_details(serde_json::json!({ "field": field_path }))
    }

    /// Denied by rules or a hook.
    pub fn permission_denied(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, reason)
    }

    /// The operator said no.
    pub fn confirmation_rejected(tool: &str) -> Self {
        Self::new(
            ErrorKind::ConfirmationRejected,
            format!("'{tool}' was not confirmed by the operator"),
        )
    }

    /// The tool raised during `execute`. `retryable` marks transient
    /// failures (network hiccups, busy resources) that the retry layer may
    /// re-attempt.
    pub fn execution(message: impl Into<String>, retryable: bool) -> Self {
        let mut err = Self::new(ErrorKind::ExecutionError, message);
        err.retryable = retryable;
        err
    }

    /// An invocation exceeded its time budget.
    pub fn timeout(what: &str, budget_ms: u64) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("{what} timed out after {budget_ms}ms"),
        )
    }

    /// Cooperative cancellation.
    pub fn cancelled(what: &str) -> Self {
        Self::new(ErrorKind::Cancelled, format!("{what} was cancelled"))
    }

    /// The batch dependency graph could not be ordered.
    pub fn cyclic_dependency(unordered: usize, total: usize) -> Self {
        Self::new(
            ErrorKind::CyclicDependency,
            format!(
                "dependency cycle detected: {unordered} of {total} calls could not be ordered"
            ),
        )
    }

    /// A hook exited non-zero without blocking semantics.
    pub fn hook_failure(command: &str, exit_code: i32, stderr: &str) -> Self {
        Self::new(
            ErrorKind::HookFailure,
            format!("hook '{command}' exited with code {exit_code}"),
        )
        .with_details(serde_json::json!({ "exit_code": exit_code, "stderr": stderr }))
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ToolError {}

// ── Tests ──────────────────────────────────────────────────────────
