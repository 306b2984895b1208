//! Hook configuration: events, matchers, entries, and global settings.
//!
//! Hooks are external shell commands bound to lifecycle events. The
//! configuration lives in the workspace settings file and is snapshotted
//! into the engine at construction — the engine never holds a back-reference
//! to live configuration objects.
//!
//! A matcher fires only when **every** predicate it specifies matches:
//! `tools` (name equality, or an anchored regex), `paths` (globs against
//! the invocation's affected paths), `commands` (a regex against the
//! extracted command line). A matcher with no predicates matches every
//! firing of its event.

use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::warn;

/// Environment variable that disables the hook engine entirely.
pub const DISABLE_HOOKS_ENV: &str = "DISABLE_HOOKS";

/// Environment variable overriding the configured default timeout (seconds).
pub const HOOK_TIMEOUT_ENV: &str = "HOOK_TIMEOUT";

// ── Events ─────────────────────────────────────────────────────────

/// Lifecycle points at which hooks can fire.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookEvent {
    PreToolUse,
    PostToolUse,
    PostToolUseFailure,
    PermissionRequest,
    UserPromptSubmit,
    SessionStart,
    SessionEnd,
    Stop,
    SubagentStop,
    Notification,
    Compaction,
}

impl HookEvent {
    /// Every event, in declaration order. Used to build per-event engine
    /// state up front.
    pub const ALL: [HookEvent; 11] = [
        HookEvent::PreToolUse,
        HookEvent::PostToolUse,
        HookEvent::PostToolUseFailure,
        HookEvent::PermissionRequest,
        HookEvent::UserPromptSubmit,
        HookEvent::SessionStart,
        HookEvent::SessionEnd,
        HookEvent::Stop,
        HookEvent::SubagentStop,
        HookEvent::Notification,
        HookEvent::Compaction,
    ];

    /// Wire name used in config keys and hook payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::PreToolUse => "PreToolUse",
            HookEvent::PostToolUse => "PostToolUse",
            HookEvent::PostToolUseFailure => "PostToolUseFailure",
            HookEvent::PermissionRequest => "PermissionRequest",
            HookEvent::UserPromptSubmit => "UserPromptSubmit",
            HookEvent::SessionStart => "SessionStart",
            HookEvent::SessionEnd => "SessionEnd",
            HookEvent::Stop => "Stop",
            HookEvent::SubagentStop => "SubagentStop",
            HookEvent::Notification => "Notification",
            HookEvent::Compaction => "Compaction",
        }
    }

    /// Events that carry tool identity and participate in the execution
    /// guard's per-invocation de-duplication.
    pub fn is_tool_event(&self) -> bool {
        matches!(
            self,
            HookEvent::PreToolUse
                | HookEvent::PostToolUse
                | HookEvent::PostToolUseFailure
                | HookEvent::PermissionRequest
        )
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Behaviors and settings ─────────────────────────────────────────

/// What a hook timeout or non-blocking failure does to the call.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FallbackBehavior {
    /// Log and continue as if the hook had not fired.
    #[default]
    Ignore,
    /// Treat the call as denied.
    Deny,
    /// Escalate the call to an approval prompt.
    Ask,
}

/// Global hook engine settings.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HookSettings {
    pub enabled: bool,
    /// Per-hook timeout when the entry does not override it, in seconds.
    pub default_timeout: u64,
    pub timeout_behavior: FallbackBehavior,
    pub failure_behavior: FallbackBehavior,
    /// Upper bound on hooks running concurrently for one event.
    pub max_concurrent_hooks: usize,
}

impl Default for HookSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_timeout: 60,
            timeout_behavior: FallbackBehavior::Ignore,
            failure_behavior: FallbackBehavior::Ignore,
            max_concurrent_hooks: 4,
        }
    }
}

// ── Entries and matchers ───────────────────────────────────────────

/// One hook command.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HookEntry {
    /// Entry kind; only `"command"` is defined.
    #[serde(rename = "type", default = "default_entry_type")]
    pub entry_type: String,
    /// The shell command line, run through `sh -c`.
    pub shell: String,
    /// Per-entry timeout override, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Operator-facing label shown while the hook runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

fn default_entry_type() -> String {
    "command".to_string()
}

impl HookEntry {
    pub fn command(shell: impl Into<String>) -> Self {
        Self {
            entry_type: default_entry_type(),
            shell: shell.into(),
            timeout_seconds: None,
            status_message: None,
        }
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_status_message(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(message.into());
        self
    }
}

/// Predicates plus the entries to run when they all match.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HookMatcher {
    /// Tool names; each item matches by equality or as an anchored regex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    /// Globs matched against the invocation's affected paths.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<String>>,
    /// Regex matched against the extracted command line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commands: Option<String>,
    pub hooks: Vec<HookEntry>,
}

impl HookMatcher {
    /// A matcher with no predicates (fires on every event occurrence).
    pub fn all(hooks: Vec<HookEntry>) -> Self {
        Self {
            hooks,
            ..Default::default()
        }
    }

    pub fn for_tools(tools: Vec<String>, hooks: Vec<HookEntry>) -> Self {
        Self {
            tools: Some(tools),
            hooks,
            ..Default::default()
        }
    }

    /// Every specified predicate must match.
    pub fn matches(
        &self,
        tool_name: Option<&str>,
        affected_paths: &[impl AsRef<Path>],
        command: Option<&str>,
    ) -> bool {
        if let Some(ref tools) = self.tools {
            let Some(name) = tool_name else { return false };
            if !tools.iter().any(|t| tool_entry_matches(t, name)) {
                return false;
            }
        }
        if let Some(ref path_globs) = self.paths {
            let Some(set) = build_glob_set(path_globs) else {
                return false;
            };
            if !affected_paths.iter().any(|p| set.is_match(p.as_ref())) {
                return false;
            }
        }
        if let Some(ref pattern) = self.commands {
            let Some(cmd) = command else { return false };
            match Regex::new(pattern) {
                Ok(re) => {
                    if !re.is_match(cmd) {
                        return false;
                    }
                }
                Err(e) => {
                    warn!("unparsable hook command matcher '{pattern}': {e}");
                    return false;
                }
            }
        }
        true
    }
}

/// Match one `tools` entry: equality first, then anchored regex.
fn tool_entry_matches(entry: &str, name: &str) -> bool {
    if entry == name {
        return true;
    }
    match Regex::new(&format!("^(?:{entry})$")) {
        Ok(re) => re.is_match(name),
        Err(_) => false,
    }
}

fn build_glob_set(globs: &[String]) -> Option<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for glob in globs {
        match Glob::new(glob) {
            Ok(g) => {
                builder.add(g);
            }
            Err(e) => {
                warn!("unparsable hook path glob '{glob}': {e}");
                return None;
            }
        }
    }
    builder.build().ok()
}

// ── HookConfig ─────────────────────────────────────────────────────

/// The full hook configuration: global settings plus per-event matchers.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HookConfig {
    pub settings: HookSettings,
    pub events: HashMap<HookEvent, Vec<HookMatcher>>,
}

impl HookConfig {
    /// Matchers registered for an event, in configuration order.
    pub fn for_event(&self, event: HookEvent) -> &[HookMatcher] {
        self.events.get(&event).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Register a matcher (builder pattern; used by tests and embedders).
    pub fn on(mut self, event: HookEvent, matcher: HookMatcher) -> Self {
        self.events.entry(event).or_default().push(matcher);
        self
    }

    /// Apply `DISABLE_HOOKS` / `HOOK_TIMEOUT` from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_overrides(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides through an injectable lookup.
    pub fn apply_env_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = get(DISABLE_HOOKS_ENV)
            && is_truthy(&raw)
        {
            self.settings.enabled = false;
        }
        if let Some(raw) = get(HOOK_TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(seconds) if seconds > 0 => self.settings.default_timeout = seconds,
                _ => warn!("ignoring invalid {HOOK_TIMEOUT_ENV}={raw}"),
            }
        }
    }
}

fn is_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn event_wire_names_match_config_keys() {
        let json = serde_json::to_string(&HookEvent::PreToolUse).unwrap();
        assert_eq!(json, "\"PreToolUse\"");
        let back: HookEvent = serde_json::from_str("\"SubagentStop\"").unwrap();
        assert_eq!(back, HookEvent::SubagentStop);
    }

    #[test]
    fn settings_defaults() {
        let settings = HookSettings::default();
        assert!(settings.enabled);
        assert_eq!(settings.default_timeout, 60);
        assert_eq!(settings.timeout_behavior, FallbackBehavior::Ignore);
        assert_eq!(settings.max_concurrent_hooks, 4);
    }

    #[test]
    fn config_deserializes_from_settings_json() {
        let json = r#"{
            "settings": { "defaultTimeout": 10, "failureBehavior": "deny" },
            "events": {
                "PreToolUse": [
                    {
                        "tools": ["Bash"],
                        "commands": "git push",
                        "hooks": [
                            { "type": "command", "shell": "check.sh", "timeoutSeconds": 5 }
                        ]
                    }
                ]
            }
        }"#;
        let config: HookConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.settings.default_timeout, 10);
        assert_eq!(config.settings.failure_behavior, FallbackBehavior::Deny);
        let matchers = config.for_event(HookEvent::PreToolUse);
        assert_eq!(matchers.len(), 1);
        assert_eq!(matchers[0].hooks[0].shell, "check.sh");
        assert_eq!(matchers[0].hooks[0].timeout_seconds, Some(5));
        assert!(config.for_event(HookEvent::Stop).is_empty());
    }

    #[test]
    fn empty_matcher_matches_everything() {
        let matcher = HookMatcher::all(vec![HookEntry::command("true")]);
        assert!(matcher.matches(Some("Bash"), &[] as &[PathBuf], None));
        assert!(matcher.matches(None, &[] as &[PathBuf], None));
    }

    #[test]
    fn tool_predicate_equality_and_regex() {
        let matcher = HookMatcher::for_tools(
            vec!["Bash".into(), "write_.*".into()],
            vec![HookEntry::command("true")],
        );
        assert!(matcher.matches(Some("Bash"), &[] as &[PathBuf], None));
        assert!(matcher.matches(Some("write_file"), &[] as &[PathBuf], None));
        assert!(!matcher.matches(Some("read_file"), &[] as &[PathBuf], None));
        // No tool name at all cannot satisfy a tools predicate.
        assert!(!matcher.matches(None, &[] as &[PathBuf], None));
    }

    #[test]
    fn tool_regex_is_anchored() {
        let matcher = HookMatcher::for_tools(
            vec!["Edit".into()],
            vec![HookEntry::command("true")],
        );
        assert!(!matcher.matches(Some("EditFile"), &[] as &[PathBuf], None));
    }

    #[test]
    fn path_predicate_uses_globs() {
        let matcher = HookMatcher {
            paths: Some(vec!["**/*.rs".into()]),
            hooks: vec![HookEntry::command("true")],
            ..Default::default()
        };
        assert!(matcher.matches(None, &[PathBuf::from("/ws/src/main.rs")], None));
        assert!(!matcher.matches(None, &[PathBuf::from("/ws/notes.md")], None));
        assert!(!matcher.matches(None, &[] as &[PathBuf], None));
    }

    #[test]
    fn command_predicate_is_a_regex() {
        let matcher = HookMatcher {
            commands: Some("^git (push|pull)".into()),
            hooks: vec![HookEntry::command("true")],
            ..Default::default()
        };
        assert!(matcher.matches(None, &[] as &[PathBuf], Some("git push origin")));
        assert!(!matcher.matches(None, &[] as &[PathBuf], Some("git status")));
        assert!(!matcher.matches(None, &[] as &[PathBuf], None));
    }

    #[test]
    fn all_predicates_must_match() {
        let matcher = HookMatcher {
            tools: Some(vec!["Bash".into()]),
            commands: Some("push".into()),
            hooks: vec![HookEntry::command("true")],
            ..Default::default()
        };
        assert!(matcher.matches(Some("Bash"), &[] as &[PathBuf], Some("git push")));
        assert!(!matcher.matches(Some("Bash"), &[] as &[PathBuf], Some("git status")));
        assert!(!matcher.matches(Some("Read"), &[] as &[PathBuf], Some("git push")));
    }

    #[test]
    fn env_disable_and_timeout_overrides() {
        let mut config = HookConfig::default();
        config.apply_env_overrides(|key| match key {
            DISABLE_HOOKS_ENV => Some("true".into()),
            HOOK_TIMEOUT_ENV => Some("120".into()),
            _ => None,
        });
        assert!(!config.settings.enabled);
        assert_eq!(config.settings.default_timeout, 120);
    }

    #[test]
    fn env_invalid_timeout_is_ignored() {
        let mut config = HookConfig::default();
        config.apply_env_overrides(|key| {
            (key == HOOK_TIMEOUT_ENV).then(|| "not-a-number".to_string())
        });
        assert_eq!(config.settings.default_timeout, 60);
    }

    #[test]
    fn env_falsy_disable_keeps_hooks_on() {
        let mut config = HookConfig::default();
        config.apply_env_overrides(|key| {
            (key == DISABLE_HOOKS_ENV).then(|| "0".to_string())
        });
        assert!(config.settings.enabled);
    }
}
