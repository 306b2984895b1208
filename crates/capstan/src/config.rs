//! Core configuration and the workspace settings file.
//!
//! The core reads `.capstan/settings.json` under the workspace root once at
//! startup: hook configuration, permission rule lists, and execution knobs.
//! A missing or unparsable file degrades to defaults with a warning —
//! configuration problems must never take the core down.
//!
//! When the session runs in [`Spec`](crate::context::PermissionMode::Spec)
//! mode, `.capstan/changes/<feature>/` holds the working documents of the
//! spec-driven workflow (`proposal.md`, `requirements.md`, `design.md`,
//! `tasks.md`, `.meta.json`). The core loads them read-only; editing goes
//! through tools in the same pipeline as everything else.

use crate::exec::retry::RetryPolicy;
use crate::hooks::config::HookConfig;
use crate::permission::rules::RuleSet;
use crate::result::DEFAULT_MAX_LLM_RESULT_BYTES;
use crate::scheduler::BatchPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Directory under the workspace root holding operator-visible state.
pub const APP_DIR: &str = ".capstan";

/// Settings file name inside [`APP_DIR`].
pub const SETTINGS_FILE: &str = "settings.json";

/// Change-set directory inside [`APP_DIR`].
pub const CHANGES_DIR: &str = "changes";

// ── Settings file shapes ───────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
struct PermissionLists {
    allow: Vec<String>,
    ask: Vec<String>,
    deny: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase", default)]
struct RetrySettings {
    max_attempts: u32,
    initial_delay_ms: u64,
    max_delay_ms: u64,
    multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            multiplier: policy.multiplier,
        }
    }
}

impl RetrySettings {
    fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
            ..RetryPolicy::default()
        }
    }
}

/// On-disk shape of `.capstan/settings.json`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
struct SettingsFile {
    hooks: HookConfig,
    permissions: PermissionLists,
    max_concurrent: Option<usize>,
    tool_timeout_seconds: Option<u64>,
    retry: RetrySettings,
    strict_failure_handling: Option<bool>,
    failure_ratio_threshold: Option<f64>,
    max_result_bytes: Option<usize>,
    cache_capacity: Option<usize>,
}

// ── CoreConfig ─────────────────────────────────────────────────────

/// Assembled configuration for one session.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    pub max_concurrent: usize,
    /// Per-invocation wall-clock budget. `None` disables timeouts.
    pub tool_timeout: Option<Duration>,
    pub retry: RetryPolicy,
    pub batch: BatchPolicy,
    /// Byte cap applied to model-facing result content.
    pub max_llm_result_bytes: usize,
    /// Result-cache capacity for read-only tools; zero disables.
    pub cache_capacity: usize,
    pub hooks: HookConfig,
    pub rules: RuleSet,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            tool_timeout: Some(Duration::from_secs(60)),
            retry: RetryPolicy::default(),
            batch: BatchPolicy::default(),
            max_llm_result_bytes: DEFAULT_MAX_LLM_RESULT_BYTES,
            cache_capacity: 100,
            hooks: HookConfig::default(),
            rules: RuleSet::default(),
        }
    }
}

impl CoreConfig {
    /// Load from `.capstan/settings.json`, falling back to defaults, then
    /// apply the hook environment overrides.
    pub fn load(workspace_root: &Path) -> Self {
        let mut config = Self::from_settings(load_settings(workspace_root));
        config.hooks.apply_env();
        config
    }

    /// Load without touching the process environment (tests, embedders
    /// that already resolved their env).
    pub fn load_without_env(workspace_root: &Path) -> Self {
        Self::from_settings(load_settings(workspace_root))
    }

    fn from_settings(settings: SettingsFile) -> Self {
        let defaults = Self::default();
        let mut batch = BatchPolicy::default();
        if let Some(strict) = settings.strict_failure_handling {
            batch.strict_failure_handling = strict;
        }
        if let Some(threshold) = settings.failure_ratio_threshold {
            batch.failure_ratio_threshold = threshold;
        }
        Self {
            max_concurrent: settings.max_concurrent.unwrap_or(defaults.max_concurrent).max(1),
            tool_timeout: match settings.tool_timeout_seconds {
                Some(0) => None,
                Some(seconds) => Some(Duration::from_secs(seconds)),
                None => defaults.tool_timeout,
            },
            retry: settings.retry.to_policy(),
            batch,
            max_llm_result_bytes: settings
                .max_result_bytes
                .unwrap_or(defaults.max_llm_result_bytes),
            cache_capacity: settings.cache_capacity.unwrap_or(defaults.cache_capacity),
            rules: RuleSet::from_lists(
                &settings.permissions.allow,
                &settings.permissions.ask,
                &settings.permissions.deny,
            ),
            hooks: settings.hooks,
        }
    }
}

fn load_settings(workspace_root: &Path) -> SettingsFile {
    let path = workspace_root.join(APP_DIR).join(SETTINGS_FILE);
    match std::fs::read_to_string(&path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!("failed to parse {}: {e}", path.display());
            SettingsFile::default()
        }),
        Err(_) => {
            debug!("no settings file at {}", path.display());
            SettingsFile::default()
        }
    }
}

// ── Spec workflow change sets ──────────────────────────────────────

/// `.meta.json` of one change set.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ChangeMeta {
    pub feature: Option<String>,
    pub status: Option<String>,
    pub created_at: Option<String>,
}

/// One feature's working documents under `.capstan/changes/<feature>/`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeSet {
    pub feature: String,
    pub proposal: Option<String>,
    pub requirements: Option<String>,
    pub design: Option<String>,
    pub tasks: Option<String>,
    pub meta: ChangeMeta,
}

impl ChangeSet {
    /// The directory this change set was loaded from.
    pub fn dir(workspace_root: &Path, feature: &str) -> PathBuf {
        workspace_root.join(APP_DIR).join(CHANGES_DIR).join(feature)
    }
}

/// Load every change set, sorted by feature name. Unreadable documents are
/// skipped with a warning; a change directory is never fatal.
pub fn load_change_sets(workspace_root: &Path) -> Vec<ChangeSet> {
    let changes_dir = workspace_root.join(APP_DIR).join(CHANGES_DIR);
    let Ok(entries) = std::fs::read_dir(&changes_dir) else {
        return Vec::new();
    };

    let mut sets = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(feature) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let read = |name: &str| -> Option<String> {
            match std::fs::read_to_string(path.join(name)) {
                Ok(contents) => Some(contents),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => {
                    warn!("unreadable {name} in change set '{feature}': {e}");
                    None
                }
            }
        };
        let meta = read(".meta.json")
            .and_then(|contents| {
                serde_json::from_str(&contents)
                    .map_err(|e| warn!("bad .meta.json in '{feature}': {e}"))
                    .ok()
            })
            .unwrap_or_default();
        sets.push(ChangeSet {
            feature: feature.to_string(),
            proposal: read("proposal.md"),
            requirements: read("requirements.md"),
            design: read("design.md"),
            tasks: read("tasks.md"),
            meta,
        });
    }
    sets.sort_by(|a, b| a.feature.cmp(&b.feature));
    sets
}

// ── Tests ──────────────────────────────────────────────────────────
