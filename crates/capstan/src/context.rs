//! Shared execution context threaded through every invocation.
//!
//! An [`ExecutionContext`] is created once per batch and handed to every
//! pipeline stage and tool. It carries identity (session, workspace), the
//! active [`PermissionMode`], a cooperative [`CancellationToken`], an
//! optional [`ProgressSink`], and the results of calls that completed
//! earlier in the same batch (so a dependent call can read its
//! prerequisite's output).
//!
//! Per-invocation scratch state (resolved tool, normalized arguments,
//! affected paths) lives inside the pipeline, not here — the context is
//! shared and never reaches across invocations.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

// ── PermissionMode ─────────────────────────────────────────────────

/// How aggressively the core auto-approves work.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum PermissionMode {
    /// Rules decide; unmatched non-read tools ask.
    #[default]
    Default,
    /// Like `Default`, but edits inside the workspace are auto-approved.
    AutoEdit,
    /// Read-only planning: all Edit- and Execute-kind tools are denied.
    Plan,
    /// Ask is promoted to allow. Deny rules still bind.
    Yolo,
    /// Spec-driven workflow: permission semantics of `Default`, plus the
    /// change-set documents under the app dir are loaded at startup.
    Spec,
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PermissionMode::Default => "default",
            PermissionMode::AutoEdit => "autoedit",
            PermissionMode::Plan => "plan",
            PermissionMode::Yolo => "yolo",
            PermissionMode::Spec => "spec",
        };
        f.write_str(name)
    }
}

// ── Progress sink ──────────────────────────────────────────────────

/// A progress update emitted while an invocation moves through the core.
///
/// Updates are advisory: sinks must not block, and the core never waits on
/// them. This is the narrow, outward-facing slice of the event-handler
/// pattern — rendering and streaming live in the caller.
#[derive(Debug)]
pub enum ProgressUpdate<'a> {
    /// An invocation entered a pipeline stage.
    StageEntered { request_id: &'a str, stage: &'a str },
    /// A retry was scheduled after a transient failure.
    RetryScheduled {
        request_id: &'a str,
        attempt: u32,
        delay_ms: u64,
    },
    /// A hook command is running. `status_message` is the configured
    /// operator-facing label, when present.
    HookRunning {
        event: &'a str,
        command: &'a str,
        status_message: Option<&'a str>,
    },
    /// Free-form progress text forwarded from a tool.
    ToolProgress { request_id: &'a str, text: &'a str },
}

/// Receiver for [`ProgressUpdate`]s.
pub trait ProgressSink: Send + Sync {
    fn on_update(&self, update: &ProgressUpdate<'_>);
}

/// A progress sink backed by a closure.
pub struct FnProgressSink<F>(F)
where
    F: Fn(&ProgressUpdate<'_>) + Send + Sync;

impl<F> FnProgressSink<F>
where
    F: Fn(&ProgressUpdate<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ProgressSink for FnProgressSink<F>
where
    F: Fn(&ProgressUpdate<'_>) + Send + Sync,
{
    fn on_update(&self, update: &ProgressUpdate<'_>) {
        (self.0)(update)
    }
}

// ── ExecutionContext ───────────────────────────────────────────────

/// Shared state for one batch of tool calls.
#[derive(Clone)]
pub struct ExecutionContext {
    pub session_id: String,
    pub workspace_root: PathBuf,
    pub permission_mode: PermissionMode,
    /// Cooperative cancellation. Tools and hooks observe this token; the
    /// concurrency layer derives per-invocation children from it for
    /// timeouts.
    pub cancellation: CancellationToken,
    progress: Option<Arc<dyn ProgressSink>>,
    /// `llm_content` of calls completed earlier in this batch, keyed by
    /// request id. Filled by the scheduler as stages finish.
    completed: Arc<RwLock<HashMap<String, String>>>,
}

impl ExecutionContext {
    pub fn new(
        session_id: impl Into<String>,
        workspace_root: impl Into<PathBuf>,
        permission_mode: PermissionMode,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            workspace_root: workspace_root.into(),
            permission_mode,
            cancellation: CancellationToken::new(),
            progress: None,
            completed: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Attach a progress sink (builder pattern).
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Replace the cancellation token (builder pattern). Used by callers
    /// that tie a batch to an outer lifetime.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Emit a progress update if a sink is attached.
    pub fn emit(&self, update: ProgressUpdate<'_>) {
        if let Some(ref sink) = self.progress {
            sink.on_update(&update);
        }
    }

    /// Record a completed call's model-facing content for later calls in
    /// the batch.
    pub fn record_result(&self, request_id: &str, llm_content: &str) {
        self.completed
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request_id.to_string(), llm_content.to_string());
    }

    /// Read the result of an earlier call in this batch, if it finished.
    pub fn result_of(&self, request_id: &str) -> Option<String> {
        self.completed
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(request_id)
            .cloned()
    }

    /// Resolve a possibly-relative path against the workspace root and
    /// normalize `.` / `..` components lexically.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        };
        normalize_path(&joined)
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("session_id", &self.session_id)
            .field("workspace_root", &self.workspace_root)
            .field("permission_mode", &self.permission_mode)
            .finish()
    }
}

/// Lexically normalize a path: drop `.`, resolve `..` against parents.
/// No filesystem access — lock keys must be stable even for paths that do
/// not exist yet.
pub fn normalize_path(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            }
            other => out.push(other),
        }
    }
    out
}

// ── Tests ──────────────────────────────────────────────────────────
