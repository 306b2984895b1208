//! Tool execution core for LLM coding agents.
//!
//! `capstan` is the subsystem between an LLM's tool calls and their
//! effects: it resolves calls against a registry, validates arguments,
//! gates them through permission rules and lifecycle hooks, schedules
//! batches as dependency DAGs with bounded parallelism and per-file
//! locking, and returns structured results fit for both the model and the
//! operator. The interactive UI, the LLM client, and the concrete tools
//! are all plug-ins on the other side of this crate's traits.
//!
//! # Getting started
//!
//! ```ignore
//! use capstan::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let workspace = std::path::Path::new("/path/to/workspace");
//!     let config = CoreConfig::load(workspace);
//!
//!     let core = CoreBuilder::new(config)
//!         .with_tool(my_read_tool())?
//!         .with_tool(my_shell_tool())?
//!         .build();
//!
//!     let ctx = ExecutionContext::new("session-1", workspace, PermissionMode::Default);
//!     let responses = core
//!         .run_batch(
//!             &[ToolCallRequest {
//!                 request_id: "1".into(),
//!                 tool_name: "read_file".into(),
//!                 args: serde_json::json!({ "file_path": "src/main.rs" }),
//!             }],
//!             &ctx,
//!         )
//!         .await;
//!     println!("{}", responses[0].result.llm_content);
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! If you're looking for how to...
//!
//! - **Define tools:** the [`Tool`](tools::Tool) and
//!   [`ToolInvocation`](tools::ToolInvocation) traits,
//!   [`FnTool`](tools::FnTool) for closure-based tools, and
//!   [`ArgSchema`](tools::ArgSchema) for argument contracts.
//! - **Control what runs:** [`RuleSet`](permission::RuleSet) +
//!   [`PermissionChecker`](permission::PermissionChecker) for allow/ask/deny,
//!   [`suggest_rule`](permission::suggest_rule) for operator rule
//!   suggestions, hooks ([`hooks`]) for external veto/rewrite commands.
//! - **Run calls:** [`CoreBuilder`] assembles the
//!   [`Pipeline`](pipeline::Pipeline) and [`Scheduler`](scheduler::Scheduler);
//!   [`ExecutionCore::run_batch`] is the everyday entry point.
//! - **Observe execution:** [`ExecObserver`](exec::ExecObserver) for
//!   lifecycle events, [`ProgressSink`](context::ProgressSink) for
//!   stage/retry/hook progress, [`LoopDetector`](loop_detector::LoopDetector)
//!   for repetition signals.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`tools`] | Tool traits, argument schemas, registry, declarations |
//! | [`pipeline`] | The six-stage per-invocation pipeline |
//! | [`scheduler`] | Batch DAG planning and stage-wise execution |
//! | [`permission`] | Rules, signatures, pattern abstraction |
//! | [`hooks`] | Lifecycle hook configuration, protocol, engine |
//! | [`exec`] | File locks, concurrency manager, retry policy |
//! | [`result`] | Result normalization, truncation, batch merging |
//! | [`loop_detector`] | Unproductive-repetition detection |
//! | [`config`] | Settings file, env overrides, change sets |
//!
//! # Design principles
//!
//! 1. **Errors are values.** Every failure is a
//!    [`ToolError`](error::ToolError) with a stable
//!    [`ErrorKind`](error::ErrorKind); stages return explicit outcomes and
//!    the caller always gets one result per request.
//! 2. **Construction-time composition.** The registry, checker, engine,
//!    lock table, and managers are built once and passed explicitly — no
//!    singletons, no module-level state.
//! 3. **Policy before effects.** Nothing executes past a deny; mutations
//!    hold per-path locks; hooks fire exactly once per invocation event.

pub mod config;
pub mod context;
pub mod error;
pub mod exec;
pub mod hooks;
pub mod loop_detector;
pub mod permission;
pub mod pipeline;
pub mod prelude;
pub mod result;
pub mod scheduler;
pub mod tools;

use crate::config::CoreConfig;
use crate::context::ExecutionContext;
use crate::exec::cache::ToolResultCache;
use crate::exec::concurrency::{ConcurrencyLimits, ConcurrencyManager, ExecObserver};
use crate::exec::locks::FileLockManager;
use crate::hooks::engine::HookEngine;
use crate::loop_detector::LoopDetector;
use crate::permission::rules::PermissionChecker;
use crate::pipeline::{ConfirmationHandler, Pipeline};
use crate::result::{ResultProcessor, ToolResult};
use crate::scheduler::Scheduler;
use crate::tools::registry::{AlreadyRegistered, Tool, ToolRegistry};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

// Re-export schemars for downstream crates deriving argument types.
pub use schemars;

// ── Tool-call surface ──────────────────────────────────────────────

/// What the model sees for each tool: name, description, and a JSON
/// Schema for the arguments.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// One tool call coming back from the model or orchestrator.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolCallRequest {
    /// Unique per call; results are bound back to it.
    pub request_id: String,
    /// Must resolve in the registry.
    pub tool_name: String,
    /// JSON object shaped by the tool's schema.
    pub args: serde_json::Value,
}

/// The per-call answer: the result bound to the originating id.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolCallResponse {
    pub request_id: String,
    pub result: ToolResult,
}

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type deriving
/// `schemars::JsonSchema`. The bridge between typed argument structs and
/// the raw schema contracts plug-in tools carry.
///
/// # Example
///
/// ```
/// use capstan::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct GrepArgs {
///     pattern: String,
///     #[serde(default)]
///     path: Option<String>,
/// }
///
/// let schema = json_schema_for::<GrepArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"pattern".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Assembly ───────────────────────────────────────────────────────

/// Builds an [`ExecutionCore`] from a [`CoreConfig`] plus registered tools
/// and optional collaborators.
pub struct CoreBuilder {
    config: CoreConfig,
    registry: ToolRegistry,
    confirmation: Option<Arc<dyn ConfirmationHandler>>,
    observer: Option<Arc<dyn ExecObserver>>,
    detector: Option<Arc<Mutex<LoopDetector>>>,
}

impl CoreBuilder {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            config,
            registry: ToolRegistry::new(),
            confirmation: None,
            observer: None,
            detector: None,
        }
    }

    /// Register a tool. Fails on duplicate names.
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Result<Self, AlreadyRegistered> {
        self.registry.register(tool)?;
        Ok(self)
    }

    /// Attach the operator confirmation handler.
    pub fn with_confirmation_handler(mut self, handler: Arc<dyn ConfirmationHandler>) -> Self {
        self.confirmation = Some(handler);
        self
    }

    /// Attach an execution event observer.
    pub fn with_observer(mut self, observer: Arc<dyn ExecObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Attach a loop detector fed by the scheduler.
    pub fn with_loop_detector(mut self, detector: Arc<Mutex<LoopDetector>>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Wire everything together. Registration is closed from here on:
    /// the registry moves behind an `Arc` and is read-only during
    /// scheduling.
    pub fn build(self) -> ExecutionCore {
        let registry = Arc::new(self.registry);
        let hooks = Arc::new(HookEngine::new(self.config.hooks.clone()));
        let mut concurrency = ConcurrencyManager::new(ConcurrencyLimits {
            max_concurrent: self.config.max_concurrent,
            timeout: self.config.tool_timeout,
            retry: self.config.retry.clone(),
        });
        if let Some(observer) = self.observer {
            concurrency = concurrency.with_observer(observer);
        }
        let concurrency = Arc::new(concurrency);

        let mut pipeline = Pipeline::new(
            registry.clone(),
            PermissionChecker::new(self.config.rules.clone()),
            hooks.clone(),
            Arc::new(FileLockManager::new()),
            concurrency.clone(),
        )
        .with_cache(Arc::new(ToolResultCache::new(self.config.cache_capacity)))
        .with_processor(ResultProcessor::new(self.config.max_llm_result_bytes));
        if let Some(handler) = self.confirmation {
            pipeline = pipeline.with_confirmation_handler(handler);
        }
        let pipeline = Arc::new(pipeline);

        let mut scheduler = Scheduler::new(
            registry.clone(),
            pipeline.clone(),
            self.config.batch.clone(),
            self.config.max_concurrent,
        );
        if let Some(detector) = self.detector {
            scheduler = scheduler.with_loop_detector(detector);
        }

        ExecutionCore {
            registry,
            pipeline,
            scheduler,
            hooks,
            concurrency,
        }
    }
}

/// The assembled core: registry + pipeline + scheduler + hook engine.
pub struct ExecutionCore {
    registry: Arc<ToolRegistry>,
    pipeline: Arc<Pipeline>,
    scheduler: Scheduler,
    hooks: Arc<HookEngine>,
    concurrency: Arc<ConcurrencyManager>,
}

impl ExecutionCore {
    /// Execute a batch; responses come back in input order.
    pub async fn run_batch(
        &self,
        requests: &[ToolCallRequest],
        ctx: &ExecutionContext,
    ) -> Vec<ToolCallResponse> {
        self.scheduler.run_batch(requests, ctx).await
    }

    /// Execute a single call through the pipeline.
    pub async fn run(&self, request: &ToolCallRequest, ctx: &ExecutionContext) -> ToolResult {
        self.pipeline.run(request, ctx).await
    }

    /// Declarations for the model, in stable order.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.registry.declarations()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// The hook engine, for session-level events (`SessionStart`,
    /// `Stop`, `Compaction`, ...).
    pub fn hooks(&self) -> &HookEngine {
        &self.hooks
    }

    /// The scheduler, for assistant-turn observation.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Abort everything in flight and reject the queue.
    pub fn cancel_all(&self) {
        self.concurrency.cancel_all();
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PermissionMode;
    use crate::tools::registry::{FnTool, ToolKind, ToolOutput};
    use crate::tools::schema::{ArgSchema, FieldSpec};
    use serde_json::json;

    fn echo() -> FnTool {
        FnTool::new(
            "echo",
            "Echo the input",
            ToolKind::Read,
            ArgSchema::object(vec![FieldSpec::string("text").required()]),
            |args, _ctx| async move {
                Ok(ToolOutput::text(args.str("text").unwrap_or("").to_string()))
            },
        )
    }

    #[test]
    fn builder_rejects_duplicate_tools() {
        let result = CoreBuilder::new(CoreConfig::default())
            .with_tool(echo())
            .unwrap()
            .with_tool(echo());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn built_core_runs_a_batch() {
        let core = CoreBuilder::new(CoreConfig::default())
            .with_tool(echo())
            .unwrap()
            .build();
        let ctx = ExecutionContext::new("s", std::env::temp_dir(), PermissionMode::Default);
        let responses = core
            .run_batch(
                &[ToolCallRequest {
                    request_id: "1".into(),
                    tool_name: "echo".into(),
                    args: json!({ "text": "hello" }),
                }],
                &ctx,
            )
            .await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].result.llm_content, "hello");
    }

    #[test]
    fn declarations_come_from_the_registry() {
        let core = CoreBuilder::new(CoreConfig::default())
            .with_tool(echo())
            .unwrap()
            .build();
        let decls = core.declarations();
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].name, "echo");
        assert_eq!(decls[0].parameters["type"], "object");
    }

    #[test]
    fn request_types_roundtrip_serde() {
        let request = ToolCallRequest {
            request_id: "1".into(),
            tool_name: "echo".into(),
            args: json!({ "text": "hi" }),
        };
        let json = serde_json::to_string(&request).unwrap();
        let back: ToolCallRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, request);
    }
}
