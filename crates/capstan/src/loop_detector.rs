//! Detects unproductive repetition in the execution stream.
//!
//! Three signals, checked as the scheduler reports activity:
//!
//! 1. **Identical calls** — the last *N* tool calls share one
//!    `(tool, args-hash)` pair, where *N* adapts to session length (3 for
//!    short sessions, up to 7 for long ones).
//! 2. **Repetitive text** — assistant message fingerprints over a sliding
//!    window collapse to too few unique values.
//! 3. **Silent turns** — five consecutive assistant turns with neither
//!    text nor tool calls. This one stops immediately, no warning budget.
//!
//! The first two consume a warning budget; when it runs out, the detector
//! tells the orchestrator to stop. Argument hashing normalizes noise
//! (pagination fields, root-path spellings) so trivially-different calls
//! still count as repeats.

use serde_json::Value;
use std::collections::VecDeque;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

// ── Config and signals ─────────────────────────────────────────────

/// Tuning knobs. Defaults follow the adaptive behavior described above.
#[derive(Debug, Clone)]
pub struct LoopDetectorConfig {
    /// Sliding window length for both call and text tracking.
    pub window: usize,
    /// Warnings allowed before a stop is signaled.
    pub warning_budget: u32,
    /// Unique-fingerprint ratio at or below which text is repetitive.
    pub similarity_ratio: f64,
    /// Consecutive empty turns that force a hard stop.
    pub silent_turn_limit: u32,
}

impl Default for LoopDetectorConfig {
    fn default() -> Self {
        Self {
            window: 10,
            warning_budget: 3,
            similarity_ratio: 0.5,
            silent_turn_limit: 5,
        }
    }
}

/// A detection. `should_stop` means the orchestrator must halt the loop;
/// otherwise the message is a warning to inject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSignal {
    pub should_stop: bool,
    /// Stable reason key: `repeat`, `similar`, `silent`, or `budget`.
    pub reason: String,
    /// Operator/model-facing explanation.
    pub message: String,
}

#[derive(Debug, Clone)]
struct CallRecord {
    tool_name: String,
    args_hash: u64,
}

// ── Detector ───────────────────────────────────────────────────────

/// Watches the sequence of tool calls and assistant turns.
#[derive(Debug)]
pub struct LoopDetector {
    config: LoopDetectorConfig,
    recent_calls: VecDeque<CallRecord>,
    text_fingerprints: VecDeque<u64>,
    total_turns: u64,
    empty_turn_streak: u32,
    warnings_used: u32,
}

impl LoopDetector {
    pub fn new(config: LoopDetectorConfig) -> Self {
        Self {
            recent_calls: VecDeque::with_capacity(config.window),
            text_fingerprints: VecDeque::with_capacity(config.window),
            config,
            total_turns: 0,
            empty_turn_streak: 0,
            warnings_used: 0,
        }
    }

    /// Identical-call threshold for the current session length.
    fn repeat_threshold(&self) -> usize {
        match self.total_turns {
            0..=20 => 3,
            21..=60 => 5,
            _ => 7,
        }
    }

    /// Record one tool call; returns a signal when a loop is detected.
    pub fn record_call(&mut self, tool_name: &str, args: &Value) -> Option<LoopSignal> {
        let record = CallRecord {
            tool_name: tool_name.to_string(),
            args_hash: hash_args(tool_name, args),
        };
        if self.recent_calls.len() >= self.config.window {
            self.recent_calls.pop_front();
        }
        self.recent_calls.push_back(record);

        let threshold = self.repeat_threshold();
        if self.recent_calls.len() >= threshold {
            let tail: Vec<&CallRecord> =
                self.recent_calls.iter().rev().take(threshold).collect();
            let head = tail[0];
            if tail
                .iter()
                .all(|r| r.tool_name == head.tool_name && r.args_hash == head.args_hash)
            {
                let suggestion = suggest_alternative(tool_name);
                return Some(self.consume_warning(
                    "repeat",
                    format!(
                        "'{tool_name}' was called {threshold} times in a row with the same \
                         arguments. {suggestion}"
                    ),
                ));
            }
        }
        None
    }

    /// Record one assistant turn: its text (if any) and how many tool
    /// calls it made.
    pub fn record_assistant_turn(
        &mut self,
        text: Option<&str>,
        tool_call_count: usize,
    ) -> Option<LoopSignal> {
        self.total_turns += 1;

        let has_text = text.is_some_and(|t| !t.trim().is_empty());
        if !has_text && tool_call_count == 0 {
            self.empty_turn_streak += 1;
            if self.empty_turn_streak >= self.config.silent_turn_limit {
                // Hard stop: an agent producing nothing five times over is
                // not going to recover on its own.
                return Some(LoopSignal {
                    should_stop: true,
                    reason: "silent".to_string(),
                    message: format!(
                        "{} consecutive turns produced neither text nor tool calls",
                        self.empty_turn_streak
                    ),
                });
            }
            return None;
        }
        self.empty_turn_streak = 0;

        if let Some(text) = text {
            let fingerprint = fingerprint_text(text);
            if self.text_fingerprints.len() >= self.config.window {
                self.text_fingerprints.pop_front();
            }
            self.text_fingerprints.push_back(fingerprint);

            if self.text_fingerprints.len() >= self.config.window {
                let unique: std::collections::HashSet<&u64> =
                    self.text_fingerprints.iter().collect();
                let ratio = unique.len() as f64 / self.text_fingerprints.len() as f64;
                if ratio <= self.config.similarity_ratio {
                    let unique_len = unique.len();
                    self.text_fingerprints.clear();
                    return Some(self.consume_warning(
                        "similar",
                        format!(
                            "assistant output is repeating itself \
                             ({} unique messages in the last {})",
                            unique_len,
                            self.config.window
                        ),
                    ));
                }
            }
        }
        None
    }

    /// Warnings left before the budget forces a stop.
    pub fn warnings_remaining(&self) -> u32 {
        self.config.warning_budget.saturating_sub(self.warnings_used)
    }

    /// Clear all tracking (after operator intervention or a new task).
    pub fn reset(&mut self) {
        self.recent_calls.clear();
        self.text_fingerprints.clear();
        self.empty_turn_streak = 0;
        self.warnings_used = 0;
    }

    fn consume_warning(&mut self, reason: &str, message: String) -> LoopSignal {
        self.warnings_used += 1;
        if self.warnings_used > self.config.warning_budget {
            LoopSignal {
                should_stop: true,
                reason: "budget".to_string(),
                message: format!("loop warnings exhausted; last: {message}"),
            }
        } else {
            LoopSignal {
                should_stop: false,
                reason: reason.to_string(),
                message,
            }
        }
    }
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::new(LoopDetectorConfig::default())
    }
}

// ── Normalization and hashing ──────────────────────────────────────

/// Hash a call's arguments after stripping noise fields and unifying
/// root-path spellings.
fn hash_args(tool_name: &str, args: &Value) -> u64 {
    let normalized = normalize_args(tool_name, args);
    let mut hasher = DefaultHasher::new();
    normalized.to_string().hash(&mut hasher);
    hasher.finish()
}

fn normalize_args(_tool_name: &str, args: &Value) -> Value {
    let Some(object) = args.as_object() else {
        return args.clone();
    };
    let mut normalized = object.clone();
    // Pagination never distinguishes attempts for loop purposes.
    normalized.remove("page");
    normalized.remove("per_page");
    normalized.remove("offset");

    if let Some(path) = normalized.get("path").and_then(Value::as_str) {
        let trimmed = path.trim_start_matches("./").trim_end_matches('/');
        if trimmed.is_empty() || trimmed == "." {
            normalized.insert("path".to_string(), Value::String("__ROOT__".to_string()));
        }
    }
    Value::Object(normalized)
}

/// Cheap order-insensitive-whitespace fingerprint of assistant text.
fn fingerprint_text(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    for word in text.split_whitespace() {
        word.hash(&mut hasher);
    }
    hasher.finish()
}

/// A way out, phrased per tool family.
fn suggest_alternative(tool_name: &str) -> String {
    let lowered = tool_name.to_ascii_lowercase();
    if lowered.contains("list") {
        "Try searching for specific content instead of listing again, or read a \
         known file directly."
            .to_string()
    } else if lowered.contains("grep") || lowered.contains("search") {
        "Refine the pattern or read the candidate files directly instead of \
         searching again."
            .to_string()
    } else if lowered.contains("read") {
        "The content has not changed since the last read; work from what is \
         already loaded."
            .to_string()
    } else {
        "Try a different tool or break the task into smaller steps.".to_string()
    }
}

// ── Tests ──────────────────────────────────────────────────────────
