//! The fixed six-stage pipeline every invocation traverses.
//!
//! Discovery resolves the tool; Validation checks and normalizes the
//! arguments (and builds the invocation); Permission consults the rule
//! checker plus `PreToolUse` / `PermissionRequest` hooks, which may deny,
//! escalate, or rewrite the arguments; Confirmation asks the operator when
//! the outcome is still "ask"; Execution runs the tool under the
//! concurrency manager with per-path locks for mutations; Formatting turns
//! the outcome into a normalized [`ToolResult`] and runs the post hooks.
//!
//! Each stage produces an explicit outcome — continue, abort with an
//! error, or abort with a synthetic result — and later stages read earlier
//! stages' products through the per-invocation state, never across
//! invocations.

use crate::ToolCallRequest;
use crate::context::{ExecutionContext, PermissionMode, ProgressUpdate};
use crate::error::{ErrorKind, ToolError};
use crate::exec::cache::ToolResultCache;
use crate::exec::concurrency::ConcurrencyManager;
use crate::exec::locks::FileLockManager;
use crate::hooks::engine::{HookEngine, HookPayload};
use crate::permission::pattern::{CallSignature, suggest_rule};
use crate::permission::rules::{PermissionChecker, PermissionDecision};
use crate::result::{ResultMetadata, ResultProcessor, ToolResult};
use crate::tools::registry::{ConfirmationDetails, Tool, ToolInvocation, ToolKind};
use crate::tools::schema::NormalizedArgs;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

// ── Confirmation handler ───────────────────────────────────────────

/// What the operator is asked to approve.
#[derive(Clone, Debug)]
pub struct ConfirmationRequest {
    pub request_id: String,
    pub tool_name: String,
    pub details: ConfirmationDetails,
    /// Rule string the operator can adopt to stop being asked.
    pub suggested_rule: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmationResponse {
    Approved,
    Rejected,
}

/// Boxed future returned by [`ConfirmationHandler::confirm`].
pub type ConfirmationFuture<'a> = Pin<Box<dyn Future<Output = ConfirmationResponse> + Send + 'a>>;

/// Asks the operator. Implemented by the UI layer; absent in headless runs.
pub trait ConfirmationHandler: Send + Sync {
    fn confirm<'a>(&'a self, request: &'a ConfirmationRequest) -> ConfirmationFuture<'a>;
}

/// A handler backed by a closure (sync decision, used by tests and simple
/// embedders).
pub struct FnConfirmationHandler<F>(F)
where
    F: Fn(&ConfirmationRequest) -> ConfirmationResponse + Send + Sync;

impl<F> FnConfirmationHandler<F>
where
    F: Fn(&ConfirmationRequest) -> ConfirmationResponse + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ConfirmationHandler for FnConfirmationHandler<F>
where
    F: Fn(&ConfirmationRequest) -> ConfirmationResponse + Send + Sync,
{
    fn confirm<'a>(&'a self, request: &'a ConfirmationRequest) -> ConfirmationFuture<'a> {
        let response = (self.0)(request);
        Box::pin(async move { response })
    }
}

// ── Per-invocation state ───────────────────────────────────────────

/// Products of earlier stages, visible to later ones.
struct InvocationState {
    tool: Arc<dyn Tool>,
    args: NormalizedArgs,
    invocation: Box<dyn ToolInvocation>,
    /// Affected paths resolved against the workspace root.
    affected_paths: Vec<PathBuf>,
    /// Warnings destined for the result metadata.
    warnings: Vec<String>,
}

impl InvocationState {
    fn rebuild(&mut self, ctx: &ExecutionContext, args: NormalizedArgs) -> Result<(), ToolError> {
        self.invocation = self.tool.build(args.clone())?;
        self.args = args;
        self.affected_paths = self
            .invocation
            .affected_paths()
            .iter()
            .map(|p| ctx.resolve_path(p))
            .collect();
        Ok(())
    }
}

// ── Pipeline ───────────────────────────────────────────────────────

/// The per-invocation stage driver. One pipeline serves a whole session;
/// per-call state lives on the stack of [`run`](Pipeline::run).
pub struct Pipeline {
    registry: Arc<crate::tools::registry::ToolRegistry>,
    checker: PermissionChecker,
    hooks: Arc<HookEngine>,
    locks: Arc<FileLockManager>,
    concurrency: Arc<ConcurrencyManager>,
    cache: Arc<ToolResultCache>,
    processor: ResultProcessor,
    confirmation: Option<Arc<dyn ConfirmationHandler>>,
}

impl Pipeline {
    pub fn new(
        registry: Arc<crate::tools::registry::ToolRegistry>,
        checker: PermissionChecker,
        hooks: Arc<HookEngine>,
        locks: Arc<FileLockManager>,
        concurrency: Arc<ConcurrencyManager>,
    ) -> Self {
        Self {
            registry,
            checker,
            hooks,
            locks,
            concurrency,
            cache: Arc::new(ToolResultCache::new(0)),
            processor: ResultProcessor::default(),
            confirmation: None,
        }
    }

    /// Enable result caching for read-only tools (builder pattern).
    pub fn with_cache(mut self, cache: Arc<ToolResultCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Attach an operator confirmation handler (builder pattern).
    pub fn with_confirmation_handler(mut self, handler: Arc<dyn ConfirmationHandler>) -> Self {
        self.confirmation = Some(handler);
        self
    }

    /// Override the result processor (builder pattern).
    pub fn with_processor(mut self, processor: ResultProcessor) -> Self {
        self.processor = processor;
        self
    }

    /// Run one request through all six stages. Always returns a normalized
    /// result; failures are values, not panics.
    pub async fn run(&self, request: &ToolCallRequest, ctx: &ExecutionContext) -> ToolResult {
        let started = Instant::now();
        let execution_id = format!("exec-{}", request.request_id);
        let mut metadata =
            ResultMetadata::new(&request.tool_name, &request.request_id, &execution_id);

        let outcome = self.run_stages(request, ctx, &mut metadata).await;
        metadata.duration_ms = started.elapsed().as_millis() as u64;

        self.hooks.finish_invocation(&request.request_id);

        let mut result = match outcome {
            Ok(result) => result,
            Err(error) => ToolResult::failure(error, metadata.clone()),
        };
        result.metadata.duration_ms = metadata.duration_ms;
        self.processor.normalize(result)
    }

    async fn run_stages(
        &self,
        request: &ToolCallRequest,
        ctx: &ExecutionContext,
        metadata: &mut ResultMetadata,
    ) -> Result<ToolResult, ToolError> {
        // ── Discovery ──
        ctx.emit(ProgressUpdate::StageEntered {
            request_id: &request.request_id,
            stage: "discovery",
        });
        let tool = self
            .registry
            .get(&request.tool_name)
            .ok_or_else(|| ToolError::tool_not_found(&request.tool_name))?;

        // ── Validation ──
        ctx.emit(ProgressUpdate::StageEntered {
            request_id: &request.request_id,
            stage: "validation",
        });
        let args = tool.schema().validate(&request.args)?;
        let invocation = tool.build(args.clone())?;
        let affected_paths: Vec<PathBuf> = invocation
            .affected_paths()
            .iter()
            .map(|p| ctx.resolve_path(p))
            .collect();
        let mut state = InvocationState {
            tool,
            args,
            invocation,
            affected_paths,
            warnings: Vec::new(),
        };

        // ── Permission ──
        ctx.emit(ProgressUpdate::StageEntered {
            request_id: &request.request_id,
            stage: "permission",
        });
        let decision = self.permission_stage(request, ctx, &mut state).await?;

        // ── Confirmation ──
        if decision == PermissionDecision::Ask {
            ctx.emit(ProgressUpdate::StageEntered {
                request_id: &request.request_id,
                stage: "confirmation",
            });
            self.confirmation_stage(request, ctx, &state).await?;
        }

        // ── Execution ──
        ctx.emit(ProgressUpdate::StageEntered {
            request_id: &request.request_id,
            stage: "execution",
        });
        let (output, retries, cached) = self.execution_stage(request, ctx, &state).await;
        metadata.retry_count = retries;
        metadata.served_from_cache = cached;
        metadata.hook_warnings.append(&mut state.warnings);

        // ── Formatting ──
        ctx.emit(ProgressUpdate::StageEntered {
            request_id: &request.request_id,
            stage: "formatting",
        });
        self.formatting_stage(request, ctx, &state, output, metadata.clone())
            .await
    }

    /// Rule checker plus PreToolUse / PermissionRequest hooks. Returns the
    /// final decision (never `Deny` — denial aborts here).
    async fn permission_stage(
        &self,
        request: &ToolCallRequest,
        ctx: &ExecutionContext,
        state: &mut InvocationState,
    ) -> Result<PermissionDecision, ToolError> {
        let kind = state.tool.kind();

        let payload =
            HookPayload::for_tool(&request.tool_name, &request.request_id, state.args.as_value())
                .with_affected_paths(state.affected_paths.clone());
        let pre = self.hooks.pre_tool_use(ctx, payload).await;
        state.warnings.extend(pre.warnings.iter().cloned());

        // A hook rewrite goes back through the schema; a rewrite that fails
        // validation aborts the call rather than executing unchecked input.
        if let Some(updated) = pre.updated_input.clone() {
            debug!("hook rewrote input for {}", request.tool_name);
            let revalidated = state.tool.schema().validate(&updated)?;
            state.rebuild(ctx, revalidated)?;
            state
                .warnings
                .push("arguments rewritten by PreToolUse hook".to_string());
        }

        let signature = CallSignature::of(&request.tool_name, &state.args);
        let check = self
            .checker
            .check(kind, &signature, ctx.permission_mode);

        // Rule-level deny binds regardless of what hooks said.
        if check.decision == PermissionDecision::Deny {
            return Err(ToolError::permission_denied(check.reason));
        }

        let mut decision = check.decision;
        match pre.decision {
            Some(PermissionDecision::Deny) => {
                return Err(ToolError::permission_denied(
                    pre.decision_reason
                        .unwrap_or_else(|| "denied by hook".to_string()),
                ));
            }
            Some(hook_decision) => decision = hook_decision,
            None => {}
        }

        if decision == PermissionDecision::Ask {
            let payload = HookPayload::for_tool(
                &request.tool_name,
                &request.request_id,
                state.args.as_value(),
            )
            .with_affected_paths(state.affected_paths.clone());
            let arbiter = self.hooks.permission_request(ctx, payload).await;
            state.warnings.extend(arbiter.warnings.iter().cloned());
            match arbiter.decision {
                Some(PermissionDecision::Deny) => {
                    return Err(ToolError::permission_denied(
                        arbiter
                            .decision_reason
                            .unwrap_or_else(|| "denied by permission hook".to_string()),
                    ));
                }
                Some(PermissionDecision::Allow) => decision = PermissionDecision::Allow,
                _ => {}
            }
        }

        Ok(decision)
    }

    /// Ask the operator, or fall back to the mode's default when no
    /// handler is attached.
    async fn confirmation_stage(
        &self,
        request: &ToolCallRequest,
        ctx: &ExecutionContext,
        state: &InvocationState,
    ) -> Result<(), ToolError> {
        let details = state.invocation.should_confirm().unwrap_or_else(|| {
            let mut details =
                ConfirmationDetails::new(format!("Run '{}'?", request.tool_name));
            details.affected_paths = state.affected_paths.clone();
            details
        });
        let confirmation = ConfirmationRequest {
            request_id: request.request_id.clone(),
            tool_name: request.tool_name.clone(),
            details,
            suggested_rule: suggest_rule(&request.tool_name, &state.args),
        };

        match &self.confirmation {
            Some(handler) => match handler.confirm(&confirmation).await {
                ConfirmationResponse::Approved => Ok(()),
                ConfirmationResponse::Rejected => {
                    Err(ToolError::confirmation_rejected(&request.tool_name))
                }
            },
            // No operator available: only the permissive modes proceed.
            None => match ctx.permission_mode {
                PermissionMode::Yolo => Ok(()),
                PermissionMode::AutoEdit
                    if matches!(state.tool.kind(), ToolKind::Read | ToolKind::Edit) =>
                {
                    Ok(())
                }
                _ => Err(ToolError::confirmation_rejected(&request.tool_name)),
            },
        }
    }

    /// Execute through the concurrency manager, holding per-path locks for
    /// mutations. Locks are taken inside the admission slot so a queued
    /// invocation never pins a path it is not yet allowed to touch.
    ///
    /// The cache sits here, after permission and confirmation: a denied
    /// call can never be answered from cache.
    async fn execution_stage(
        &self,
        request: &ToolCallRequest,
        ctx: &ExecutionContext,
        state: &InvocationState,
    ) -> (Result<crate::tools::registry::ToolOutput, ToolError>, u32, bool) {
        let args_json = state.args.as_value().to_string();
        if state.tool.cacheable()
            && let Some(output) = self.cache.get(&request.tool_name, &args_json)
        {
            debug!("cache hit for {}", request.tool_name);
            return (Ok(output), 0, true);
        }

        let execution_id = format!("exec-{}", request.request_id);
        let lock_paths: Vec<PathBuf> = if state.tool.kind().is_mutation() {
            state.affected_paths.clone()
        } else {
            Vec::new()
        };
        let invocation = &state.invocation;
        let locks = &self.locks;

        info!("[tool] {}({})", request.tool_name, preview(&args_json, 120));

        let (outcome, retries) = self
            .concurrency
            .run(&execution_id, &request.tool_name, ctx, |_attempt, token| {
                let attempt_ctx = ctx.clone().with_cancellation(token);
                let lock_paths = lock_paths.clone();
                async move {
                    let _guards = locks.acquire_all(&lock_paths).await;
                    invocation.execute(&attempt_ctx).await
                }
            })
            .await;

        if let Ok(ref output) = outcome {
            match state.tool.kind() {
                ToolKind::Edit if !state.affected_paths.is_empty() => {
                    self.cache.invalidate_paths(&state.affected_paths);
                }
                // An Execute-kind success has unknown reach.
                ToolKind::Edit | ToolKind::Execute => self.cache.invalidate_all(),
                _ if state.tool.cacheable() => {
                    self.cache.put(
                        &request.tool_name,
                        &args_json,
                        output.clone(),
                        state.affected_paths.clone(),
                    );
                }
                _ => {}
            }
        }

        (outcome, retries, false)
    }

    /// Turn the outcome into a result and run the post hooks.
    async fn formatting_stage(
        &self,
        request: &ToolCallRequest,
        ctx: &ExecutionContext,
        state: &InvocationState,
        output: Result<crate::tools::registry::ToolOutput, ToolError>,
        metadata: ResultMetadata,
    ) -> Result<ToolResult, ToolError> {
        let mut result = match output {
            Ok(output) => ToolResult::ok(output.llm, output.display, metadata),
            Err(error) => ToolResult::failure(error, metadata),
        };

        let mut payload = HookPayload::for_tool(
            &request.tool_name,
            &request.request_id,
            state.args.as_value(),
        )
        .with_affected_paths(state.affected_paths.clone())
        .with_response(&result.llm_content);
        if let Some(ref error) = result.error {
            let is_timeout = error.kind == ErrorKind::Timeout;
            let is_interrupt = error.kind == ErrorKind::Cancelled;
            payload = payload.with_error(error, is_interrupt, is_timeout);
        }

        let post = self.hooks.post_tool_use(ctx, payload, result.success).await;
        result.metadata.hook_warnings.extend(post.warnings);

        if let Some(replacement) = post.updated_output {
            result.llm_content = replacement;
        }
        for context in &post.additional_context {
            result.llm_content.push_str("\n\n");
            result.llm_content.push_str(context);
        }
        if post.suppress_output {
            result.display_content = "(output suppressed by hook)".to_string();
        }

        Ok(result)
    }
}

fn preview(s: &str, max: usize) -> String {
    let cut = s.floor_char_boundary(max.min(s.len()));
    if cut < s.len() {
        format!("{}...", &s[..cut])
    } else {
        s.to_string()
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::concurrency::ConcurrencyLimits;
    use crate::exec::retry::RetryPolicy;
    use crate::hooks::config::{HookConfig, HookEntry, HookEvent, HookMatcher};
    use crate::permission::rules::RuleSet;
    use crate::tools::registry::{FnTool, ToolOutput, ToolRegistry};
    use crate::tools::schema::{ArgSchema, FieldSpec};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn read_tool(executions: Arc<AtomicU32>) -> FnTool {
        FnTool::new(
            "read_note",
            "Read a note",
            ToolKind::Read,
            ArgSchema::object(vec![FieldSpec::string("file_path").required()]),
            move |args, _ctx| {
                let executions = executions.clone();
                async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Ok(ToolOutput::text(format!(
                        "contents of {}",
                        args.str("file_path").unwrap_or("?")
                    )))
                }
            },
        )
    }

    fn shell_tool(executions: Arc<AtomicU32>) -> FnTool {
        FnTool::new(
            "Bash",
            "Run a shell command",
            ToolKind::Execute,
            ArgSchema::object(vec![FieldSpec::string("command").required()]),
            move |args, _ctx| {
                let executions = executions.clone();
                async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Ok(ToolOutput::text(format!(
                        "ran {}",
                        args.str("command").unwrap_or("?")
                    )))
                }
            },
        )
    }

    struct PipelineFixture {
        pipeline: Pipeline,
        executions: Arc<AtomicU32>,
    }

    fn fixture(rules: RuleSet, hooks: HookConfig) -> PipelineFixture {
        let executions = Arc::new(AtomicU32::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(read_tool(executions.clone())).unwrap();
        registry.register(shell_tool(executions.clone())).unwrap();
        let pipeline = Pipeline::new(
            Arc::new(registry),
            PermissionChecker::new(rules),
            Arc::new(HookEngine::new(hooks)),
            Arc::new(FileLockManager::new()),
            Arc::new(ConcurrencyManager::new(ConcurrencyLimits {
                max_concurrent: 4,
                timeout: Some(Duration::from_secs(5)),
                retry: RetryPolicy::with_attempts(3)
                    .with_initial_delay(Duration::from_millis(10)),
            })),
        );
        PipelineFixture {
            pipeline,
            executions,
        }
    }

    fn ctx(mode: PermissionMode) -> ExecutionContext {
        ExecutionContext::new("test-session", std::env::temp_dir(), mode)
    }

    fn request(id: &str, tool: &str, args: serde_json::Value) -> ToolCallRequest {
        ToolCallRequest {
            request_id: id.to_string(),
            tool_name: tool.to_string(),
            args,
        }
    }

    #[tokio::test]
    async fn unknown_tool_aborts_at_discovery() {
        let fx = fixture(RuleSet::default(), HookConfig::default());
        let result = fx
            .pipeline
            .run(
                &request("1", "missing_tool", json!({})),
                &ctx(PermissionMode::Default),
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::ToolNotFound));
        assert_eq!(fx.executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_args_abort_at_validation() {
        let fx = fixture(RuleSet::default(), HookConfig::default());
        let result = fx
            .pipeline
            .run(
                &request("1", "read_note", json!({ "file_path": 42 })),
                &ctx(PermissionMode::Default),
            )
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::ValidationError));
        assert!(result.llm_content.contains("ValidationError"));
        assert_eq!(fx.executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn read_kind_runs_without_rules() {
        let fx = fixture(RuleSet::default(), HookConfig::default());
        let result = fx
            .pipeline
            .run(
                &request("1", "read_note", json!({ "file_path": "/ws/a.txt" })),
                &ctx(PermissionMode::Default),
            )
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.llm_content, "contents of /ws/a.txt");
        assert_eq!(result.metadata.tool_name, "read_note");
        assert_eq!(result.metadata.request_id, "1");
    }

    #[tokio::test]
    async fn rule_deny_aborts_before_execute() {
        let rules = RuleSet::from_lists(&[], &[], &["Bash(command:git push*)".to_string()]);
        let fx = fixture(rules, HookConfig::default());
        let result = fx
            .pipeline
            .run(
                &request("1", "Bash", json!({ "command": "git push origin" })),
                &ctx(PermissionMode::Yolo),
            )
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::PermissionDenied));
        assert_eq!(fx.executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ask_without_handler_is_rejected_in_default_mode() {
        let fx = fixture(RuleSet::default(), HookConfig::default());
        let result = fx
            .pipeline
            .run(
                &request("1", "Bash", json!({ "command": "ls" })),
                &ctx(PermissionMode::Default),
            )
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::ConfirmationRejected));
        assert_eq!(fx.executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ask_with_approving_handler_executes() {
        let fx = fixture(RuleSet::default(), HookConfig::default());
        let asked = Arc::new(AtomicU32::new(0));
        let asked_clone = asked.clone();
        let pipeline = fx.pipeline.with_confirmation_handler(Arc::new(
            FnConfirmationHandler::new(move |req: &ConfirmationRequest| {
                asked_clone.fetch_add(1, Ordering::SeqCst);
                assert_eq!(req.tool_name, "Bash");
                assert_eq!(req.suggested_rule, "Bash(command:ls*)");
                ConfirmationResponse::Approved
            }),
        ));
        let result = pipeline
            .run(
                &request("1", "Bash", json!({ "command": "ls -la" })),
                &ctx(PermissionMode::Default),
            )
            .await;
        assert!(result.success);
        assert_eq!(asked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejecting_handler_yields_confirmation_rejected() {
        let fx = fixture(RuleSet::default(), HookConfig::default());
        let pipeline = fx.pipeline.with_confirmation_handler(Arc::new(
            FnConfirmationHandler::new(|_| ConfirmationResponse::Rejected),
        ));
        let result = pipeline
            .run(
                &request("1", "Bash", json!({ "command": "ls" })),
                &ctx(PermissionMode::Default),
            )
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::ConfirmationRejected));
        assert_eq!(fx.executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn yolo_mode_skips_confirmation() {
        let fx = fixture(RuleSet::default(), HookConfig::default());
        let result = fx
            .pipeline
            .run(
                &request("1", "Bash", json!({ "command": "ls" })),
                &ctx(PermissionMode::Yolo),
            )
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn plan_mode_denies_execute_kind() {
        let fx = fixture(RuleSet::default(), HookConfig::default());
        let result = fx
            .pipeline
            .run(
                &request("1", "Bash", json!({ "command": "ls" })),
                &ctx(PermissionMode::Plan),
            )
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::PermissionDenied));
        assert!(result.display_content.contains("plan mode"));
    }

    #[tokio::test]
    async fn pre_hook_deny_blocks_with_reason() {
        let script = r#"echo '{"hookSpecificOutput":{"permissionDecision":"deny","permissionDecisionReason":"no git push"}}'"#;
        let hooks = HookConfig::default().on(
            HookEvent::PreToolUse,
            HookMatcher::for_tools(vec!["Bash".into()], vec![HookEntry::command(script)]),
        );
        let fx = fixture(RuleSet::default(), hooks);
        let result = fx
            .pipeline
            .run(
                &request("1", "Bash", json!({ "command": "git push" })),
                &ctx(PermissionMode::Yolo),
            )
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::PermissionDenied));
        assert!(result.display_content.contains("no git push"));
        assert_eq!(fx.executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn pre_hook_rewrite_is_revalidated_and_used() {
        let script = r#"echo '{"hookSpecificOutput":{"permissionDecision":"allow","updatedInput":{"file_path":"/ws/b.txt"}}}'"#;
        let hooks = HookConfig::default().on(
            HookEvent::PreToolUse,
            HookMatcher::all(vec![HookEntry::command(script)]),
        );
        let fx = fixture(RuleSet::default(), hooks);
        let result = fx
            .pipeline
            .run(
                &request("1", "read_note", json!({ "file_path": "/ws/a.txt" })),
                &ctx(PermissionMode::Default),
            )
            .await;
        assert!(result.success);
        assert_eq!(result.llm_content, "contents of /ws/b.txt");
        assert!(result
            .metadata
            .hook_warnings
            .iter()
            .any(|w| w.contains("rewritten")));
    }

    #[tokio::test]
    async fn pre_hook_rewrite_failing_validation_aborts() {
        let script = r#"echo '{"hookSpecificOutput":{"updatedInput":{"file_path":7}}}'"#;
        let hooks = HookConfig::default().on(
            HookEvent::PreToolUse,
            HookMatcher::all(vec![HookEntry::command(script)]),
        );
        let fx = fixture(RuleSet::default(), hooks);
        let result = fx
            .pipeline
            .run(
                &request("1", "read_note", json!({ "file_path": "/ws/a.txt" })),
                &ctx(PermissionMode::Default),
            )
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::ValidationError));
        assert_eq!(fx.executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn permission_request_hook_is_final_arbiter() {
        let script = r#"echo '{"hookSpecificOutput":{"permissionDecision":"allow"}}'"#;
        let hooks = HookConfig::default().on(
            HookEvent::PermissionRequest,
            HookMatcher::all(vec![HookEntry::command(script)]),
        );
        let fx = fixture(RuleSet::default(), hooks);
        // Execute-kind would normally need confirmation; the arbiter allows.
        let result = fx
            .pipeline
            .run(
                &request("1", "Bash", json!({ "command": "ls" })),
                &ctx(PermissionMode::Default),
            )
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn post_hook_context_and_rewrite_are_merged() {
        let script = r#"echo '{"hookSpecificOutput":{"updatedOutput":"replaced","additionalContext":"lint: clean"}}'"#;
        let hooks = HookConfig::default().on(
            HookEvent::PostToolUse,
            HookMatcher::all(vec![HookEntry::command(script)]),
        );
        let fx = fixture(RuleSet::default(), hooks);
        let result = fx
            .pipeline
            .run(
                &request("1", "read_note", json!({ "file_path": "/ws/a.txt" })),
                &ctx(PermissionMode::Default),
            )
            .await;
        assert!(result.success);
        assert_eq!(result.llm_content, "replaced\n\nlint: clean");
    }

    #[tokio::test]
    async fn failure_fires_post_tool_use_failure_not_post_tool_use() {
        let success_script = r#"echo '{"hookSpecificOutput":{"additionalContext":"should not appear"}}'"#;
        let failure_script = r#"echo '{"hookSpecificOutput":{"additionalContext":"failure observed"}}'"#;
        let hooks = HookConfig::default()
            .on(
                HookEvent::PostToolUse,
                HookMatcher::all(vec![HookEntry::command(success_script)]),
            )
            .on(
                HookEvent::PostToolUseFailure,
                HookMatcher::all(vec![HookEntry::command(failure_script)]),
            );
        let fx = fixture(RuleSet::default(), hooks);
        let result = fx
            .pipeline
            .run(
                &request("1", "read_note", json!({})),
                &ctx(PermissionMode::Default),
            )
            .await;
        assert!(!result.success);
        assert!(result.llm_content.contains("failure observed"));
        assert!(!result.llm_content.contains("should not appear"));
    }

    #[tokio::test]
    async fn identical_reads_hit_the_cache() {
        let fx = fixture(RuleSet::default(), HookConfig::default());
        let pipeline = fx.pipeline.with_cache(Arc::new(ToolResultCache::new(10)));
        let ctx = ctx(PermissionMode::Default);

        let first = pipeline
            .run(&request("1", "read_note", json!({ "file_path": "/ws/a.txt" })), &ctx)
            .await;
        assert!(!first.metadata.served_from_cache);

        let second = pipeline
            .run(&request("2", "read_note", json!({ "file_path": "/ws/a.txt" })), &ctx)
            .await;
        assert!(second.metadata.served_from_cache);
        assert_eq!(second.llm_content, first.llm_content);
        assert_eq!(fx.executions.load(Ordering::SeqCst), 1);

        // Different arguments miss.
        let third = pipeline
            .run(&request("3", "read_note", json!({ "file_path": "/ws/b.txt" })), &ctx)
            .await;
        assert!(!third.metadata.served_from_cache);
        assert_eq!(fx.executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn execute_kind_success_invalidates_the_cache() {
        let fx = fixture(RuleSet::default(), HookConfig::default());
        let pipeline = fx.pipeline.with_cache(Arc::new(ToolResultCache::new(10)));
        let ctx = ctx(PermissionMode::Yolo);

        pipeline
            .run(&request("1", "read_note", json!({ "file_path": "/ws/a.txt" })), &ctx)
            .await;
        pipeline
            .run(&request("2", "Bash", json!({ "command": "touch /ws/a.txt" })), &ctx)
            .await;
        let reread = pipeline
            .run(&request("3", "read_note", json!({ "file_path": "/ws/a.txt" })), &ctx)
            .await;
        assert!(!reread.metadata.served_from_cache);
        // read + bash + re-read all executed.
        assert_eq!(fx.executions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_metadata_reflects_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let mut registry = ToolRegistry::new();
        registry
            .register(FnTool::new(
                "net",
                "Flaky network fetch",
                ToolKind::Network,
                ArgSchema::empty(),
                move |_args, _ctx| {
                    let attempts = attempts_clone.clone();
                    async move {
                        let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                        if n < 3 {
                            Err(ToolError::timeout("net", 10))
                        } else {
                            Ok(ToolOutput::text("fetched"))
                        }
                    }
                },
            ))
            .unwrap();
        let pipeline = Pipeline::new(
            Arc::new(registry),
            PermissionChecker::new(RuleSet::default()),
            Arc::new(HookEngine::new(HookConfig::default())),
            Arc::new(FileLockManager::new()),
            Arc::new(ConcurrencyManager::new(ConcurrencyLimits {
                max_concurrent: 2,
                timeout: Some(Duration::from_secs(5)),
                retry: RetryPolicy::with_attempts(3)
                    .with_initial_delay(Duration::from_millis(10)),
            })),
        );
        let result = pipeline
            .run(&request("1", "net", json!({})), &ctx(PermissionMode::Yolo))
            .await;
        assert!(result.success);
        assert_eq!(result.metadata.retry_count, 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
