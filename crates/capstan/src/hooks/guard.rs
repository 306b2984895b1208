//! Once-per-invocation gate for hook events.
//!
//! Retries re-enter the pipeline's formatting and permission machinery, but
//! an operator's hook must not observe the same `{tool_use_id, event}` pair
//! twice. The guard records fired pairs and refuses repeats; the record is
//! dropped when the request finishes so a *new* invocation reusing an id
//! (tests, replays) starts clean.

use crate::hooks::config::HookEvent;
use std::collections::HashSet;
use std::sync::Mutex;

/// De-duplication gate keyed by `{tool_use_id, event}`.
#[derive(Debug, Default)]
pub struct ExecutionGuard {
    fired: Mutex<HashSet<(String, HookEvent)>>,
}

impl ExecutionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the pair. Returns `true` exactly once per `{id, event}`;
    /// later claims return `false` until [`release`](Self::release).
    pub fn try_claim(&self, tool_use_id: &str, event: HookEvent) -> bool {
        self.fired
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((tool_use_id.to_string(), event))
    }

    /// Whether the pair has already fired.
    pub fn has_fired(&self, tool_use_id: &str, event: HookEvent) -> bool {
        self.fired
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&(tool_use_id.to_string(), event))
    }

    /// Drop every record for a finished invocation.
    pub fn release(&self, tool_use_id: &str) {
        self.fired
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(id, _)| id != tool_use_id);
    }

    pub fn clear(&self) {
        self.fired.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
