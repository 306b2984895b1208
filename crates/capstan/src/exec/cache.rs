//! Result caching for read-only tools.
//!
//! Identical read-only calls inside one session tend to cluster — the model
//! re-reads a file it just read, re-greps the same pattern. Cacheable tools
//! (Read- and Search-kind by default) have successful outputs stored by
//! `(tool name, argument hash)` and served without re-executing.
//!
//! Mutations invalidate: an Edit-kind success drops every entry whose
//! recorded paths intersect the edit's affected paths, and drops the whole
//! cache when the mutation's reach is unknown. The cache sits *after* the
//! permission and confirmation stages, so a denied call can never be
//! answered from cache.

use crate::tools::registry::ToolOutput;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A cached tool output with its provenance.
#[derive(Debug, Clone)]
struct CacheEntry {
    output: ToolOutput,
    /// Paths the producing call read; used for targeted invalidation.
    paths: Vec<PathBuf>,
    generation: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<(String, u64), CacheEntry>,
    generation: u64,
    hits: u64,
    misses: u64,
}

/// Session-scoped cache for read-only tool results.
#[derive(Debug)]
pub struct ToolResultCache {
    state: Mutex<CacheState>,
    /// Maximum entries before the oldest generation is evicted. Zero
    /// disables the cache entirely.
    max_entries: usize,
}

impl ToolResultCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_entries,
        }
    }

    /// Whether caching is active at all.
    pub fn enabled(&self) -> bool {
        self.max_entries > 0
    }

    /// Look up a cached output for a call.
    pub fn get(&self, tool_name: &str, args_json: &str) -> Option<ToolOutput> {
        if !self.enabled() {
            return None;
        }
        let key = (tool_name.to_string(), hash_arguments(args_json));
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.entries.get(&key) {
            Some(entry) => {
                let output = entry.output.clone();
                state.hits += 1;
                Some(output)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Store a successful output, recording the paths it depended on.
    pub fn put(&self, tool_name: &str, args_json: &str, output: ToolOutput, paths: Vec<PathBuf>) {
        if !self.enabled() {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.entries.len() >= self.max_entries {
            evict_oldest(&mut state);
        }
        state.generation += 1;
        let generation = state.generation;
        let key = (tool_name.to_string(), hash_arguments(args_json));
        state.entries.insert(
            key,
            CacheEntry {
                output,
                paths,
                generation,
            },
        );
    }

    /// Drop entries that depended on any of the touched paths.
    pub fn invalidate_paths(&self, touched: &[PathBuf]) {
        if touched.is_empty() {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.entries.retain(|_, entry| {
            !entry
                .paths
                .iter()
                .any(|p| touched.iter().any(|t| covers(t, p) || covers(p, t)))
        });
    }

    /// Drop everything (a mutation with unknown reach ran).
    pub fn invalidate_all(&self) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hit rate as a fraction (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let total = state.hits + state.misses;
        if total == 0 {
            0.0
        } else {
            state.hits as f64 / total as f64
        }
    }
}

impl Default for ToolResultCache {
    fn default() -> Self {
        Self::new(100)
    }
}

/// One path covers another when they are equal or it is an ancestor.
fn covers(base: &Path, candidate: &Path) -> bool {
    candidate.starts_with(base)
}

fn evict_oldest(state: &mut CacheState) {
    if let Some(oldest) = state
        .entries
        .iter()
        .min_by_key(|(_, entry)| entry.generation)
        .map(|(key, _)| key.clone())
    {
        state.entries.remove(&oldest);
    }
}

/// FNV-1a over the serialized arguments.
fn hash_arguments(arguments: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in arguments.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn output(text: &str) -> ToolOutput {
        ToolOutput::text(text)
    }

    #[test]
    fn put_and_get() {
        let cache = ToolResultCache::new(10);
        cache.put(
            "read_file",
            r#"{"file_path":"foo.rs"}"#,
            output("contents"),
            vec![PathBuf::from("/ws/foo.rs")],
        );
        let hit = cache.get("read_file", r#"{"file_path":"foo.rs"}"#).unwrap();
        assert_eq!(hit.llm, "contents");
        assert!(cache.hit_rate() > 0.99);
    }

    #[test]
    fn different_args_miss() {
        let cache = ToolResultCache::new(10);
        cache.put("read_file", r#"{"file_path":"a"}"#, output("a"), vec![]);
        assert!(cache.get("read_file", r#"{"file_path":"b"}"#).is_none());
    }

    #[test]
    fn zero_capacity_disables() {
        let cache = ToolResultCache::new(0);
        assert!(!cache.enabled());
        cache.put("t", "{}", output("x"), vec![]);
        assert!(cache.get("t", "{}").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn path_invalidation_is_targeted() {
        let cache = ToolResultCache::new(10);
        cache.put(
            "read_file",
            r#"{"file_path":"a"}"#,
            output("a"),
            vec![PathBuf::from("/ws/a.txt")],
        );
        cache.put(
            "read_file",
            r#"{"file_path":"b"}"#,
            output("b"),
            vec![PathBuf::from("/ws/b.txt")],
        );
        cache.invalidate_paths(&[PathBuf::from("/ws/a.txt")]);
        assert!(cache.get("read_file", r#"{"file_path":"a"}"#).is_none());
        assert!(cache.get("read_file", r#"{"file_path":"b"}"#).is_some());
    }

    #[test]
    fn directory_edits_invalidate_children() {
        let cache = ToolResultCache::new(10);
        cache.put(
            "list_files",
            r#"{"path":"src"}"#,
            output("listing"),
            vec![PathBuf::from("/ws/src")],
        );
        // Editing a file under the listed directory drops the listing.
        cache.invalidate_paths(&[PathBuf::from("/ws/src/main.rs")]);
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_all_clears() {
        let cache = ToolResultCache::new(10);
        cache.put("t", "{}", output("x"), vec![]);
        cache.invalidate_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_evicts_oldest_generation() {
        let cache = ToolResultCache::new(2);
        cache.put("t", "1", output("r1"), vec![]);
        cache.put("t", "2", output("r2"), vec![]);
        cache.put("t", "3", output("r3"), vec![]);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("t", "1").is_none());
        assert!(cache.get("t", "3").is_some());
    }

    #[test]
    fn hash_is_deterministic_and_discriminating() {
        assert_eq!(hash_arguments(r#"{"a":1}"#), hash_arguments(r#"{"a":1}"#));
        assert_ne!(hash_arguments(r#"{"a":1}"#), hash_arguments(r#"{"a":2}"#));
    }
}
