//! Tool results: normalization, annotation, and batch merging.
//!
//! Every invocation — succeeded, failed, denied, or cancelled — ends as a
//! [`ToolResult`] satisfying two invariants:
//!
//! - `success == true` ⇒ `llm_content` is non-empty;
//! - `success == false` ⇒ `error` is present with a taxonomy kind.
//!
//! The [`ResultProcessor`] enforces the invariants, truncates oversized
//! model-facing content, and stamps metadata (timing, retries, request
//! identity). `display_content` is for the operator and never carries raw
//! stack traces; structured failure detail lives in `error.details`.

use crate::error::{ErrorKind, ToolError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default cap for model-facing result content, in bytes.
pub const DEFAULT_MAX_LLM_RESULT_BYTES: usize = 30_000;

/// Placeholder for successful tools that produced nothing to say.
const EMPTY_OUTPUT_PLACEHOLDER: &str = "(no output)";

// ── Metadata ───────────────────────────────────────────────────────

/// Bookkeeping attached to every result.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ResultMetadata {
    pub tool_name: String,
    pub request_id: String,
    /// Unique per execution (stable across retries of the same request).
    pub execution_id: String,
    pub duration_ms: u64,
    /// Number of retries performed (0 = first attempt succeeded or failed
    /// permanently).
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
    /// Warnings accumulated by the hook layer (conflicting rewrites,
    /// non-blocking hook failures).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hook_warnings: Vec<String>,
    /// Original size of `llm_content` before truncation, when it was cut.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_llm_bytes: Option<usize>,
    /// Set when the output came from the session cache, not an execution.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub served_from_cache: bool,
}

impl ResultMetadata {
    pub fn new(tool_name: &str, request_id: &str, execution_id: &str) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            request_id: request_id.to_string(),
            execution_id: execution_id.to_string(),
            duration_ms: 0,
            retry_count: 0,
            timestamp: Utc::now(),
            hook_warnings: Vec::new(),
            original_llm_bytes: None,
            served_from_cache: false,
        }
    }
}

// ── ToolResult ─────────────────────────────────────────────────────

/// The outcome of one tool invocation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolResult {
    pub success: bool,
    /// Content for the model. Non-empty on success.
    pub llm_content: String,
    /// Human-readable rendering for the operator.
    pub display_content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
    pub metadata: ResultMetadata,
}

impl ToolResult {
    /// A successful result. `display` falls back to the model content.
    pub fn ok(
        llm_content: impl Into<String>,
        display: Option<String>,
        metadata: ResultMetadata,
    ) -> Self {
        let llm_content = llm_content.into();
        let display_content = display.unwrap_or_else(|| llm_content.clone());
        Self {
            success: true,
            llm_content,
            display_content,
            error: None,
            metadata,
        }
    }

    /// A failed result. The model sees a one-line summary it can reason
    /// about; the operator sees the error message.
    pub fn failure(error: ToolError, metadata: ResultMetadata) -> Self {
        let llm_content = format!(
            "Tool '{}' failed ({}): {}",
            metadata.tool_name, error.kind, error.message
        );
        Self {
            success: false,
            display_content: error.message.clone(),
            llm_content,
            error: Some(error),
            metadata,
        }
    }

    /// The error kind, when failed.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

// ── ResultProcessor ────────────────────────────────────────────────

/// Enforces result invariants and applies the model-content byte budget.
#[derive(Debug, Clone)]
pub struct ResultProcessor {
    pub max_llm_bytes: usize,
}

impl Default for ResultProcessor {
    fn default() -> Self {
        Self {
            max_llm_bytes: DEFAULT_MAX_LLM_RESULT_BYTES,
        }
    }
}

impl ResultProcessor {
    pub fn new(max_llm_bytes: usize) -> Self {
        Self { max_llm_bytes }
    }

    /// Normalize a result in place: fill empty success content, ensure a
    /// failure carries an error, truncate oversized model content.
    pub fn normalize(&self, mut result: ToolResult) -> ToolResult {
        if result.success {
            result.error = None;
            if result.llm_content.is_empty() {
                result.llm_content = EMPTY_OUTPUT_PLACEHOLDER.to_string();
            }
        } else if result.error.is_none() {
            // A failure with no error is a tool bug; keep the failure but
            // make it diagnosable.
            result.error = Some(ToolError::execution(
                "tool reported failure without an error",
                false,
            ));
        }

        if result.llm_content.len() > self.max_llm_bytes {
            let original = result.llm_content.len();
            result.llm_content = truncate_content(&result.llm_content, self.max_llm_bytes);
            result.metadata.original_llm_bytes = Some(original);
        }
        if result.display_content.is_empty() {
            result.display_content = result.llm_content.clone();
        }
        result
    }
}

/// Truncate to at most `max` bytes on a char boundary, appending a notice.
pub fn truncate_content(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let cut = s.floor_char_boundary(max);
    format!("{}...\n[truncated: {} bytes total]", &s[..cut], s.len())
}

// ── Batch merging ──────────────────────────────────────────────────

/// A combined view over a batch, for callers that want one result.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchView {
    /// Every call succeeded; `llm_content`s unioned in input order.
    AllSucceeded(ToolResult),
    /// Some calls failed; the result carries both sides.
    Partial {
        merged: ToolResult,
        succeeded: usize,
        failed: usize,
    },
    /// Every call failed; one aggregate error with per-call details.
    AllFailed(ToolResult),
}

impl BatchView {
    pub fn result(&self) -> &ToolResult {
        match self {
            BatchView::AllSucceeded(r) | BatchView::AllFailed(r) => r,
            BatchView::Partial { merged, .. } => merged,
        }
    }
}

/// Merge per-call results into a combined view, preserving input order.
pub fn merge_batch(results: &[ToolResult]) -> BatchView {
    let failed: Vec<&ToolResult> = results.iter().filter(|r| !r.success).collect();
    let succeeded = results.len() - failed.len();

    let mut metadata = ResultMetadata::new("(batch)", "(batch)", "(batch)");
    metadata.duration_ms = results.iter().map(|r| r.metadata.duration_ms).max().unwrap_or(0);

    if failed.is_empty() {
        let union = serde_json::to_string(
            &results
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "request_id": r.metadata.request_id,
                        "tool": r.metadata.tool_name,
                        "content": r.llm_content,
                    })
                })
                .collect::<Vec<_>>(),
        )
        .unwrap_or_default();
        return BatchView::AllSucceeded(ToolResult::ok(
            union,
            Some(format!("{} tool calls succeeded", results.len())),
            metadata,
        ));
    }

    let failure_details: Vec<serde_json::Value> = failed
        .iter()
        .map(|r| {
            serde_json::json!({
                "request_id": r.metadata.request_id,
                "tool": r.metadata.tool_name,
                "error": r.error,
            })
        })
        .collect();

    if succeeded == 0 {
        let error = ToolError::new(
            failed[0].error.as_ref().map(|e| e.kind).unwrap_or(ErrorKind::ExecutionError),
            format!("all {} tool calls failed", results.len()),
        )
        .with_details(serde_json::json!({ "failures": failure_details }));
        return BatchView::AllFailed(ToolResult::failure(error, metadata));
    }

    let successes: Vec<serde_json::Value> = results
        .iter()
        .filter(|r| r.success)
        .map(|r| {
            serde_json::json!({
                "request_id": r.metadata.request_id,
                "tool": r.metadata.tool_name,
                "content": r.llm_content,
            })
        })
        .collect();
    let body = serde_json::json!({
        "succeeded": successes,
        "failed": failure_details,
    });
    let merged = ToolResult {
        success: true,
        llm_content: body.to_string(),
        display_content: format!(
            "{succeeded} of {} tool calls succeeded, {} failed",
            results.len(),
            failed.len()
        ),
        error: None,
        metadata,
    };
    BatchView::Partial {
        merged,
        succeeded,
        failed: failed.len(),
    }
}

// ── Tests ──────────────────────────────────────────────────────────
