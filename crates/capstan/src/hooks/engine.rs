//! Runs hook commands at lifecycle events and interprets their answers.
//!
//! The engine holds a snapshot of the [`HookConfig`] taken at construction.
//! For each event it selects the matchers whose predicates all hold, runs
//! every selected entry in parallel (bounded per event by
//! `max_concurrent_hooks` — events do not share a permit pool), writes the
//! JSON payload to each command's stdin, and folds the results through
//! [`aggregate`](crate::hooks::protocol::aggregate) in matcher order.
//!
//! Commands run through `sh -c` in their own process group; a timeout or a
//! cancellation kills the whole group, not just the shell. The
//! [`ExecutionGuard`] ensures a given `{tool_use_id, event}` fires at most
//! once per invocation, including across retries.

use crate::context::{ExecutionContext, ProgressUpdate};
use crate::error::ToolError;
use crate::hooks::config::{HookConfig, HookEntry, HookEvent};
use crate::hooks::guard::ExecutionGuard;
use crate::hooks::protocol::{HookInput, HookOutcome, HookRunRecord, aggregate};
use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

// ── Payload ────────────────────────────────────────────────────────

/// Event-specific fields for one firing. Matcher predicates read
/// `tool_name` / `affected_paths` / `command`; everything else goes into
/// the hook's stdin payload.
#[derive(Clone, Debug, Default)]
pub struct HookPayload {
    pub tool_name: Option<String>,
    pub tool_use_id: Option<String>,
    pub tool_input: Option<Value>,
    pub tool_response: Option<String>,
    pub error: Option<String>,
    pub error_type: Option<String>,
    pub is_interrupt: Option<bool>,
    pub is_timeout: Option<bool>,
    pub prompt: Option<String>,
    pub message: Option<String>,
    /// For path matchers; not serialized.
    pub affected_paths: Vec<PathBuf>,
    /// For command matchers; not serialized (it is already in `tool_input`).
    pub command: Option<String>,
}

impl HookPayload {
    /// Payload for a tool-scoped event.
    pub fn for_tool(tool_name: &str, tool_use_id: &str, tool_input: Value) -> Self {
        let command = tool_input
            .get("command")
            .and_then(Value::as_str)
            .map(String::from);
        Self {
            tool_name: Some(tool_name.to_string()),
            tool_use_id: Some(tool_use_id.to_string()),
            tool_input: Some(tool_input),
            command,
            ..Default::default()
        }
    }

    pub fn with_affected_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.affected_paths = paths;
        self
    }

    pub fn with_response(mut self, response: &str) -> Self {
        self.tool_response = Some(response.to_string());
        self
    }

    pub fn with_error(mut self, error: &ToolError, is_interrupt: bool, is_timeout: bool) -> Self {
        self.error = Some(error.message.clone());
        self.error_type = Some(error.kind.as_str().to_string());
        self.is_interrupt = Some(is_interrupt);
        self.is_timeout = Some(is_timeout);
        self
    }
}

/// Outcome of `UserPromptSubmit`: the (possibly rewritten) prompt plus any
/// injected context.
#[derive(Clone, Debug, PartialEq)]
pub struct PromptOutcome {
    pub prompt: String,
    pub additional_context: Vec<String>,
    /// Set when a hook blocked the prompt outright.
    pub denied: Option<String>,
}

// ── Engine ─────────────────────────────────────────────────────────

/// Executes hooks for lifecycle events.
pub struct HookEngine {
    config: HookConfig,
    guard: ExecutionGuard,
    /// One permit pool per event: `max_concurrent_hooks` bounds the hooks
    /// of a single event, so a burst of `PreToolUse` work never starves
    /// `PostToolUse` (or any other event) firing at the same time.
    semaphores: HashMap<HookEvent, Arc<Semaphore>>,
    executions: AtomicU64,
}

impl HookEngine {
    /// Build an engine from a configuration snapshot. Environment
    /// overrides should already be applied to `config`.
    pub fn new(config: HookConfig) -> Self {
        let permits = config.settings.max_concurrent_hooks.max(1);
        let semaphores = HookEvent::ALL
            .iter()
            .map(|&event| (event, Arc::new(Semaphore::new(permits))))
            .collect();
        Self {
            config,
            guard: ExecutionGuard::new(),
            semaphores,
            executions: AtomicU64::new(0),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.settings.enabled
    }

    /// Release the guard's records for a finished invocation.
    pub fn finish_invocation(&self, tool_use_id: &str) {
        self.guard.release(tool_use_id);
    }

    /// Fire an event: select matchers, run entries, aggregate.
    pub async fn fire(
        &self,
        event: HookEvent,
        ctx: &ExecutionContext,
        payload: HookPayload,
    ) -> HookOutcome {
        if !self.enabled() {
            return HookOutcome::default();
        }

        if event.is_tool_event()
            && let Some(id) = payload.tool_use_id.as_deref()
            && !self.guard.try_claim(id, event)
        {
            debug!("hook event {event} already fired for {id}");
            return HookOutcome::default();
        }

        let entries: Vec<&HookEntry> = self
            .config
            .for_event(event)
            .iter()
            .filter(|m| {
                m.matches(
                    payload.tool_name.as_deref(),
                    &payload.affected_paths,
                    payload.command.as_deref(),
                )
            })
            .flat_map(|m| &m.hooks)
            .collect();
        if entries.is_empty() {
            return HookOutcome::default();
        }

        let input = self.build_input(event, ctx, &payload);
        let records = join_all(
            entries
                .iter()
                .map(|entry| self.run_entry(event, entry, &input, ctx)),
        )
        .await;
        aggregate(event, &records, &self.config.settings)
    }

    fn build_input(
        &self,
        event: HookEvent,
        ctx: &ExecutionContext,
        payload: &HookPayload,
    ) -> HookInput {
        let n = self.executions.fetch_add(1, Ordering::Relaxed);
        HookInput {
            hook_event_name: event.as_str().to_string(),
            hook_execution_id: format!("hook-{}-{n}", ctx.session_id),
            timestamp: Utc::now(),
            project_dir: ctx.workspace_root.display().to_string(),
            session_id: ctx.session_id.clone(),
            permission_mode: ctx.permission_mode,
            tool_name: payload.tool_name.clone(),
            tool_use_id: payload.tool_use_id.clone(),
            tool_input: payload.tool_input.clone(),
            tool_response: payload.tool_response.clone(),
            error: payload.error.clone(),
            error_type: payload.error_type.clone(),
            is_interrupt: payload.is_interrupt,
            is_timeout: payload.is_timeout,
            prompt: payload.prompt.clone(),
            message: payload.message.clone(),
        }
    }

    /// Run one entry: spawn, feed stdin, enforce the timeout, capture.
    async fn run_entry(
        &self,
        event: HookEvent,
        entry: &HookEntry,
        input: &HookInput,
        ctx: &ExecutionContext,
    ) -> HookRunRecord {
        // The permit bounds concurrency within this event's hook set.
        // Semaphores are never closed; acquisition only fails at runtime
        // teardown.
        let _permit = match self.semaphores.get(&event) {
            Some(semaphore) => semaphore.clone().acquire_owned().await.ok(),
            None => None,
        };

        ctx.emit(ProgressUpdate::HookRunning {
            event: event.as_str(),
            command: &entry.shell,
            status_message: entry.status_message.as_deref(),
        });

        let timeout = Duration::from_secs(
            entry
                .timeout_seconds
                .unwrap_or(self.config.settings.default_timeout)
                .max(1),
        );
        let payload = serde_json::to_vec(input).unwrap_or_default();

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&entry.shell)
            .current_dir(&ctx.workspace_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("failed to spawn hook '{}': {e}", entry.shell);
                return HookRunRecord {
                    command: entry.shell.clone(),
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: format!("failed to spawn: {e}"),
                    timed_out: false,
                };
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            // The hook may exit before reading its stdin.
            let _ = stdin.write_all(&payload).await;
            let _ = stdin.shutdown().await;
        }

        let pid = child.id();
        tokio::select! {
            waited = tokio::time::timeout(timeout, child.wait_with_output()) => {
                match waited {
                    Ok(Ok(output)) => HookRunRecord {
                        command: entry.shell.clone(),
                        exit_code: output.status.code().unwrap_or(1),
                        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                        timed_out: false,
                    },
                    Ok(Err(e)) => HookRunRecord {
                        command: entry.shell.clone(),
                        exit_code: 1,
                        stdout: String::new(),
                        stderr: format!("failed to collect output: {e}"),
                        timed_out: false,
                    },
                    Err(_) => {
                        kill_process_group(pid);
                        HookRunRecord {
                            command: entry.shell.clone(),
                            exit_code: crate::hooks::protocol::EXIT_TIMEOUT,
                            stdout: String::new(),
                            stderr: format!("timed out after {}s", timeout.as_secs()),
                            timed_out: true,
                        }
                    }
                }
            }
            _ = ctx.cancellation.cancelled() => {
                kill_process_group(pid);
                HookRunRecord {
                    command: entry.shell.clone(),
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: "cancelled by caller".to_string(),
                    timed_out: false,
                }
            }
        }
    }

    // ── Event wrappers ─────────────────────────────────────────────

    /// `PreToolUse`: may deny, escalate, or rewrite the arguments.
    pub async fn pre_tool_use(
        &self,
        ctx: &ExecutionContext,
        payload: HookPayload,
    ) -> HookOutcome {
        self.fire(HookEvent::PreToolUse, ctx, payload).await
    }

    /// `PermissionRequest`: final arbiter when the rules said ask.
    pub async fn permission_request(
        &self,
        ctx: &ExecutionContext,
        payload: HookPayload,
    ) -> HookOutcome {
        self.fire(HookEvent::PermissionRequest, ctx, payload).await
    }

    /// `PostToolUse` / `PostToolUseFailure`, depending on the outcome.
    pub async fn post_tool_use(
        &self,
        ctx: &ExecutionContext,
        payload: HookPayload,
        succeeded: bool,
    ) -> HookOutcome {
        let event = if succeeded {
            HookEvent::PostToolUse
        } else {
            HookEvent::PostToolUseFailure
        };
        self.fire(event, ctx, payload).await
    }

    /// `UserPromptSubmit`: hooks may rewrite the prompt or inject context.
    pub async fn user_prompt_submit(&self, ctx: &ExecutionContext, prompt: &str) -> PromptOutcome {
        let payload = HookPayload {
            prompt: Some(prompt.to_string()),
            ..Default::default()
        };
        let outcome = self.fire(HookEvent::UserPromptSubmit, ctx, payload).await;
        let denied = outcome
            .is_deny()
            .then(|| outcome.decision_reason.clone().unwrap_or_default());
        PromptOutcome {
            prompt: outcome
                .updated_prompt
                .unwrap_or_else(|| prompt.to_string()),
            additional_context: outcome.additional_context,
            denied,
        }
    }

    /// `Stop` / `SubagentStop`: returns the veto reason when a hook asked
    /// to keep going.
    pub async fn stop(&self, ctx: &ExecutionContext, subagent: bool) -> Option<String> {
        let event = if subagent {
            HookEvent::SubagentStop
        } else {
            HookEvent::Stop
        };
        self.fire(event, ctx, HookPayload::default()).await.stop_veto
    }

    /// `Compaction`: returns `false` when a hook vetoed summarization.
    pub async fn compaction(&self, ctx: &ExecutionContext) -> bool {
        !self
            .fire(HookEvent::Compaction, ctx, HookPayload::default())
            .await
            .is_deny()
    }

    /// Side-effecting events; outputs are informational.
    pub async fn notify(&self, ctx: &ExecutionContext, event: HookEvent, message: &str) {
        debug_assert!(matches!(
            event,
            HookEvent::SessionStart | HookEvent::SessionEnd | HookEvent::Notification
        ));
        let payload = HookPayload {
            message: Some(message.to_string()),
            ..Default::default()
        };
        let outcome = self.fire(event, ctx, payload).await;
        for warning in outcome.warnings {
            warn!("{event} hook: {warning}");
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        // Negative pid targets the whole group created by process_group(0).
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

// ── Tests ──────────────────────────────────────────────────────────
