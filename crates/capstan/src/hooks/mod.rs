//! Lifecycle hooks: external commands that observe and steer execution.
//!
//! - [`config`] — events, matchers, entries, global settings, env overrides.
//! - [`protocol`] — stdin/stdout JSON types, exit codes, aggregation.
//! - [`engine`] — matcher selection and bounded parallel command execution.
//! - [`guard`] — once-per-invocation de-duplication.

pub mod config;
pub mod engine;
pub mod guard;
pub mod protocol;

pub use config::{
    DISABLE_HOOKS_ENV, FallbackBehavior, HOOK_TIMEOUT_ENV, HookConfig, HookEntry, HookEvent,
    HookMatcher, HookSettings,
};
pub use engine::{HookEngine, HookPayload, PromptOutcome};
pub use guard::ExecutionGuard;
pub use protocol::{
    DecisionBehavior, HookDecision, HookInput, HookOutcome, HookOutput, HookRunRecord,
    HookSpecificOutput,
};
