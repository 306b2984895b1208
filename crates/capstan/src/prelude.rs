//! Convenience re-exports for embedding the execution core.
//!
//! Meant to be glob-imported by orchestrator code:
//!
//! ```ignore
//! use capstan::prelude::*;
//! ```
//!
//! Pulls in the assembly types, the tool traits, the request/response
//! surface, and the context. Specialized pieces (hook protocol types,
//! scheduler internals, the lock manager) are imported from their modules
//! directly when needed.

// ── Assembly and surface ────────────────────────────────────────────
pub use crate::{
    CoreBuilder, ExecutionCore, ToolCallRequest, ToolCallResponse, ToolDeclaration,
    json_schema_for,
};

// ── Context and configuration ───────────────────────────────────────
pub use crate::config::{ChangeSet, CoreConfig, load_change_sets};
pub use crate::context::{ExecutionContext, PermissionMode, ProgressSink, ProgressUpdate};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{
    ArgSchema, ConfirmationDetails, FieldSpec, FnTool, NormalizedArgs, Tool, ToolInvocation,
    ToolKind, ToolOutput, ToolRegistry,
};

// ── Results and errors ──────────────────────────────────────────────
pub use crate::error::{ErrorKind, ToolError};
pub use crate::result::{BatchView, ResultMetadata, ToolResult, merge_batch};

// ── Policy ──────────────────────────────────────────────────────────
pub use crate::hooks::{HookConfig, HookEngine, HookEvent};
pub use crate::permission::{PermissionChecker, PermissionDecision, RuleSet, suggest_rule};
pub use crate::pipeline::{
    ConfirmationHandler, ConfirmationRequest, ConfirmationResponse, FnConfirmationHandler,
};

// ── Observation ─────────────────────────────────────────────────────
pub use crate::exec::{ExecEvent, ExecObserver};
pub use crate::loop_detector::{LoopDetector, LoopDetectorConfig, LoopSignal};
