//! Global admission control, timeouts, and retry driving.
//!
//! The [`ConcurrencyManager`] owns the in-flight cap: up to `max_concurrent`
//! invocations run at once, the rest wait FIFO on the semaphore. Each
//! admitted invocation runs its attempts under a per-attempt child
//! cancellation token and an optional timeout; transient failures are
//! retried with the configured backoff.
//!
//! Everything observable is emitted as an [`ExecEvent`] through the
//! attached [`ExecObserver`] — tests and telemetry subscribe instead of
//! poking at internals.

use crate::context::{ExecutionContext, ProgressUpdate};
use crate::error::{ErrorKind, ToolError};
use crate::exec::retry::RetryPolicy;
use crate::tools::registry::ToolOutput;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

// ── Events and observers ───────────────────────────────────────────

/// Observable lifecycle events for invocations under management.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecEvent {
    /// Admitted and about to run its first attempt.
    Started {
        execution_id: String,
        tool: String,
        running: usize,
    },
    /// Finished (success or final failure); its slot is free.
    Completed {
        execution_id: String,
        tool: String,
        success: bool,
        running: usize,
    },
    /// The cap was full at submission; waiting for a slot.
    Queued {
        execution_id: String,
        tool: String,
        depth: usize,
    },
    /// Left the queue and took a slot.
    Dequeued { execution_id: String, tool: String },
    /// One attempt failed (may be retried).
    AttemptFailed {
        execution_id: String,
        tool: String,
        attempt: u32,
        kind: ErrorKind,
    },
    /// `cancel_all` rejected everything still waiting.
    QueueCleared { rejected: usize },
    /// A running invocation was aborted by `cancel_all`.
    Aborted { execution_id: String, tool: String },
}

/// Receiver for [`ExecEvent`]s.
pub trait ExecObserver: Send + Sync {
    fn on_event(&self, event: &ExecEvent);
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl ExecObserver for NoopObserver {
    fn on_event(&self, _event: &ExecEvent) {}
}

/// Observer backed by a closure.
pub struct FnObserver<F>(F)
where
    F: Fn(&ExecEvent) + Send + Sync;

impl<F> FnObserver<F>
where
    F: Fn(&ExecEvent) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ExecObserver for FnObserver<F>
where
    F: Fn(&ExecEvent) + Send + Sync,
{
    fn on_event(&self, event: &ExecEvent) {
        (self.0)(event)
    }
}

// ── Limits ─────────────────────────────────────────────────────────

/// Knobs for the manager.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimits {
    /// Maximum invocations in flight at once.
    pub max_concurrent: usize,
    /// Per-invocation wall-clock budget. `None` disables timeouts.
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for ConcurrencyLimits {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            timeout: Some(Duration::from_secs(60)),
            retry: RetryPolicy::default(),
        }
    }
}

// ── Manager ────────────────────────────────────────────────────────

/// Admission, timeout, retry, and cancellation for tool execution.
pub struct ConcurrencyManager {
    limits: ConcurrencyLimits,
    semaphore: Arc<Semaphore>,
    running: StdMutex<HashSet<String>>,
    waiting: AtomicUsize,
    observer: Arc<dyn ExecObserver>,
    shutdown: CancellationToken,
}

impl ConcurrencyManager {
    pub fn new(limits: ConcurrencyLimits) -> Self {
        let permits = limits.max_concurrent.max(1);
        Self {
            limits,
            semaphore: Arc::new(Semaphore::new(permits)),
            running: StdMutex::new(HashSet::new()),
            waiting: AtomicUsize::new(0),
            observer: Arc::new(NoopObserver),
            shutdown: CancellationToken::new(),
        }
    }

    /// Attach an observer (builder pattern).
    pub fn with_observer(mut self, observer: Arc<dyn ExecObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.limits.max_concurrent.max(1)
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn queued_count(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }

    /// Abort every running invocation (cooperatively) and reject everything
    /// queued with `Cancelled`. Completed results are unaffected.
    pub fn cancel_all(&self) {
        let rejected = self.queued_count();
        self.observer.on_event(&ExecEvent::QueueCleared { rejected });
        self.shutdown.cancel();
    }

    fn emit(&self, event: ExecEvent) {
        self.observer.on_event(&event);
    }

    /// Run one invocation: admit, attempt (with timeout), retry transient
    /// failures. Returns the final outcome and the retry count.
    ///
    /// `attempt_fn` receives the 1-indexed attempt number and a child
    /// cancellation token that fires on timeout or cancel-all.
    pub async fn run<F, Fut>(
        &self,
        execution_id: &str,
        tool_name: &str,
        ctx: &ExecutionContext,
        attempt_fn: F,
    ) -> (Result<ToolOutput, ToolError>, u32)
    where
        F: Fn(u32, CancellationToken) -> Fut,
        Fut: Future<Output = Result<ToolOutput, ToolError>>,
    {
        if self.shutdown.is_cancelled() || ctx.cancellation.is_cancelled() {
            return (Err(ToolError::cancelled(tool_name)), 0);
        }

        // ── Admission ──
        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                let depth = self.waiting.fetch_add(1, Ordering::Relaxed) + 1;
                self.emit(ExecEvent::Queued {
                    execution_id: execution_id.to_string(),
                    tool: tool_name.to_string(),
                    depth,
                });
                debug!("queued {execution_id} ({tool_name}) at depth {depth}");
                let acquired = tokio::select! {
                    permit = self.semaphore.clone().acquire_owned() => permit.ok(),
                    _ = self.shutdown.cancelled() => None,
                    _ = ctx.cancellation.cancelled() => None,
                };
                self.waiting.fetch_sub(1, Ordering::Relaxed);
                match acquired {
                    Some(permit) => {
                        self.emit(ExecEvent::Dequeued {
                            execution_id: execution_id.to_string(),
                            tool: tool_name.to_string(),
                        });
                        permit
                    }
                    None => {
                        return (Err(ToolError::cancelled(tool_name)), 0);
                    }
                }
            }
        };

        let running = {
            let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            running.insert(execution_id.to_string());
            running.len()
        };
        self.emit(ExecEvent::Started {
            execution_id: execution_id.to_string(),
            tool: tool_name.to_string(),
            running,
        });

        // ── Attempts ──
        let mut attempt: u32 = 1;
        let outcome = loop {
            let result = self.run_attempt(tool_name, ctx, &attempt_fn, attempt).await;
            match result {
                Ok(output) => break Ok(output),
                Err(error) => {
                    self.emit(ExecEvent::AttemptFailed {
                        execution_id: execution_id.to_string(),
                        tool: tool_name.to_string(),
                        attempt,
                        kind: error.kind,
                    });
                    if error.kind == ErrorKind::Cancelled {
                        self.emit(ExecEvent::Aborted {
                            execution_id: execution_id.to_string(),
                            tool: tool_name.to_string(),
                        });
                        break Err(error);
                    }
                    if !self.limits.retry.should_retry(&error, attempt) {
                        break Err(error);
                    }
                    let delay = self.limits.retry.delay_for_attempt(attempt - 1);
                    info!(
                        "retrying {tool_name} ({execution_id}) after {}ms: {}",
                        delay.as_millis(),
                        error.message
                    );
                    ctx.emit(ProgressUpdate::RetryScheduled {
                        request_id: execution_id,
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                    });
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.cancelled() => break Err(ToolError::cancelled(tool_name)),
                        _ = ctx.cancellation.cancelled() => break Err(ToolError::cancelled(tool_name)),
                    }
                    attempt += 1;
                }
            }
        };

        let running = {
            let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            running.remove(execution_id);
            running.len()
        };
        self.emit(ExecEvent::Completed {
            execution_id: execution_id.to_string(),
            tool: tool_name.to_string(),
            success: outcome.is_ok(),
            running,
        });
        drop(permit);

        (outcome, attempt - 1)
    }

    /// One attempt under timeout and cancellation.
    async fn run_attempt<F, Fut>(
        &self,
        tool_name: &str,
        ctx: &ExecutionContext,
        attempt_fn: &F,
        attempt: u32,
    ) -> Result<ToolOutput, ToolError>
    where
        F: Fn(u32, CancellationToken) -> Fut,
        Fut: Future<Output = Result<ToolOutput, ToolError>>,
    {
        let child = ctx.cancellation.child_token();
        let fut = attempt_fn(attempt, child.clone());

        let attempt_result = async {
            match self.limits.timeout {
                Some(budget) => match tokio::time::timeout(budget, fut).await {
                    Ok(result) => result,
                    Err(_) => {
                        // Fire the signal for any work the attempt spawned,
                        // then record the distinct timeout kind.
                        child.cancel();
                        Err(ToolError::timeout(
                            &format!("tool '{tool_name}'"),
                            budget.as_millis() as u64,
                        ))
                    }
                },
                None => fut.await,
            }
        };

        tokio::select! {
            result = attempt_result => result,
            _ = self.shutdown.cancelled() => {
                child.cancel();
                Err(ToolError::cancelled(tool_name))
            }
            _ = ctx.cancellation.cancelled() => {
                child.cancel();
                Err(ToolError::cancelled(tool_name))
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
