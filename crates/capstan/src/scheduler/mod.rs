//! Drives batches of tool calls through the pipeline.
//!
//! The scheduler plans each batch into stages (see [`graph`]), runs the
//! stages sequentially with every member of a stage in parallel, and
//! returns one response per input request **in input order**, whatever
//! order execution actually finished in.
//!
//! Failure policy between stages: with strict handling, any failure aborts
//! the rest of the batch; otherwise the batch continues until the
//! cumulative failure ratio crosses the configured threshold. Aborted
//! requests get `Cancelled` results — the caller sees every request
//! answered, always.

pub mod graph;

use crate::context::ExecutionContext;
use crate::error::ToolError;
use crate::loop_detector::{LoopDetector, LoopSignal};
use crate::pipeline::Pipeline;
use crate::result::{ResultMetadata, ToolResult};
use crate::tools::registry::ToolRegistry;
use crate::{ToolCallRequest, ToolCallResponse};
use futures::future::join_all;
use graph::{BatchNode, plan_stages};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

// ── Policy ─────────────────────────────────────────────────────────

/// Failure handling between stages.
#[derive(Debug, Clone)]
pub struct BatchPolicy {
    /// Abort the remainder of the batch on the first failed stage.
    pub strict_failure_handling: bool,
    /// Without strict handling: abort once failed/total exceeds this.
    pub failure_ratio_threshold: f64,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            strict_failure_handling: false,
            failure_ratio_threshold: 0.3,
        }
    }
}

// ── Scheduler ──────────────────────────────────────────────────────

/// Plans and executes batches.
pub struct Scheduler {
    registry: Arc<ToolRegistry>,
    pipeline: Arc<Pipeline>,
    policy: BatchPolicy,
    max_concurrent: usize,
    detector: Option<Arc<Mutex<LoopDetector>>>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<ToolRegistry>,
        pipeline: Arc<Pipeline>,
        policy: BatchPolicy,
        max_concurrent: usize,
    ) -> Self {
        Self {
            registry,
            pipeline,
            policy,
            max_concurrent,
            detector: None,
        }
    }

    /// Attach a loop detector; every completed call is reported to it
    /// (builder pattern).
    pub fn with_loop_detector(mut self, detector: Arc<Mutex<LoopDetector>>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Execute a batch. The response list is a permutation of the inputs
    /// in input order.
    pub async fn run_batch(
        &self,
        requests: &[ToolCallRequest],
        ctx: &ExecutionContext,
    ) -> Vec<ToolCallResponse> {
        if requests.is_empty() {
            return Vec::new();
        }

        let nodes: Vec<BatchNode> = requests
            .iter()
            .map(|request| {
                // Unknown tools plan as isolated nodes; the pipeline turns
                // them into ToolNotFound results.
                let (dependencies, resource_tags) = match self.registry.get(&request.tool_name)
                {
                    Some(tool) => (tool.dependencies(), tool.resource_tags()),
                    None => (Vec::new(), Vec::new()),
                };
                BatchNode {
                    request_id: request.request_id.clone(),
                    tool_name: request.tool_name.clone(),
                    dependencies,
                    resource_tags,
                }
            })
            .collect();

        let stages = match plan_stages(&nodes, self.max_concurrent) {
            Ok(stages) => stages,
            Err(error) => {
                // A cycle rejects every request in the batch.
                return requests
                    .iter()
                    .map(|request| {
                        ToolCallResponse {
                            request_id: request.request_id.clone(),
                            result: ToolResult::failure(
                                error.clone(),
                                ResultMetadata::new(
                                    &request.tool_name,
                                    &request.request_id,
                                    &format!("exec-{}", request.request_id),
                                ),
                            ),
                        }
                    })
                    .collect();
            }
        };
        debug!(
            "batch of {} planned into {} stage(s)",
            requests.len(),
            stages.len()
        );

        let mut results: Vec<Option<ToolResult>> = vec![None; requests.len()];
        let mut failed = 0usize;
        let mut completed = 0usize;
        let mut aborted_reason: Option<String> = None;

        for stage in &stages {
            if let Some(ref reason) = aborted_reason {
                for &index in stage {
                    let request = &requests[index];
                    results[index] = Some(ToolResult::failure(
                        ToolError::cancelled(&request.tool_name)
                            .with_details(serde_json::json!({ "batch": reason })),
                        ResultMetadata::new(
                            &request.tool_name,
                            &request.request_id,
                            &format!("exec-{}", request.request_id),
                        ),
                    ));
                }
                continue;
            }

            let stage_results = join_all(
                stage
                    .iter()
                    .map(|&index| self.pipeline.run(&requests[index], ctx)),
            )
            .await;

            for (&index, result) in stage.iter().zip(stage_results) {
                let request = &requests[index];
                completed += 1;
                if result.success {
                    ctx.record_result(&request.request_id, &result.llm_content);
                } else {
                    failed += 1;
                }
                self.observe(request);
                results[index] = Some(result);
            }

            if failed > 0 && self.policy.strict_failure_handling {
                aborted_reason = Some("aborted after a failed stage".to_string());
                warn!("strict failure handling aborted the batch");
            } else if completed > 0 {
                let ratio = failed as f64 / completed as f64;
                if failed > 0 && ratio > self.policy.failure_ratio_threshold {
                    aborted_reason = Some(format!(
                        "aborted at {:.0}% cumulative failures",
                        ratio * 100.0
                    ));
                    warn!("failure ratio {ratio:.2} exceeded threshold");
                }
            }
        }

        requests
            .iter()
            .zip(results)
            .map(|(request, result)| ToolCallResponse {
                request_id: request.request_id.clone(),
                result: result.unwrap_or_else(|| {
                    // Every index is covered by exactly one stage; this arm
                    // exists so a planner bug degrades to an error result.
                    ToolResult::failure(
                        ToolError::cancelled(&request.tool_name),
                        ResultMetadata::new(
                            &request.tool_name,
                            &request.request_id,
                            &format!("exec-{}", request.request_id),
                        ),
                    )
                }),
            })
            .collect()
    }

    /// Report an assistant turn to the attached detector.
    pub fn observe_assistant_turn(
        &self,
        text: Option<&str>,
        tool_call_count: usize,
    ) -> Option<LoopSignal> {
        let detector = self.detector.as_ref()?;
        detector
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record_assistant_turn(text, tool_call_count)
    }

    fn observe(&self, request: &ToolCallRequest) {
        let Some(ref detector) = self.detector else {
            return;
        };
        let signal = detector
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record_call(&request.tool_name, &request.args);
        if let Some(signal) = signal {
            warn!(
                "loop detector ({}): {} [stop={}]",
                signal.reason, signal.message, signal.should_stop
            );
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
