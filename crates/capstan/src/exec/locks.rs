//! Per-path mutual exclusion for mutating tools.
//!
//! A table from normalized absolute path to an async mutex, constructed
//! with the rest of the core and shared by reference. Waiters on one path
//! are served strictly in submission order (tokio's mutex queues waiters
//! FIFO); different paths never contend. Edit-kind execution wraps every
//! affected path through this table, which is what turns "two edits to
//! the same file in one batch" into a clean serialization instead of a
//! torn write.
//!
//! Multi-path acquisition locks in sorted order so that two invocations
//! touching overlapping path sets cannot deadlock.

use crate::context::normalize_path;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// RAII holder for one invocation's path locks. Dropping releases all of
/// them, whether the invocation succeeded or failed.
pub struct PathGuards {
    guards: Vec<OwnedMutexGuard<()>>,
    paths: Vec<PathBuf>,
}

impl PathGuards {
    /// The (normalized, sorted) paths held by this guard.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

/// Keyed FIFO lock table.
#[derive(Default)]
pub struct FileLockManager {
    table: StdMutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl FileLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry_for(&self, path: &Path) -> (PathBuf, Arc<AsyncMutex<()>>) {
        let key = normalize_path(path);
        let arc = self
            .table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        (key, arc)
    }

    /// Acquire one path. Resolves when every earlier waiter on the same
    /// path has finished.
    pub async fn acquire(&self, path: &Path) -> OwnedMutexGuard<()> {
        let (_, arc) = self.entry_for(path);
        arc.lock_owned().await
    }

    /// Acquire a set of paths in sorted, deduplicated order.
    pub async fn acquire_all(&self, paths: &[PathBuf]) -> PathGuards {
        let mut keys: Vec<PathBuf> = paths.iter().map(|p| normalize_path(p)).collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            let (_, arc) = self.entry_for(key);
            guards.push(arc.lock_owned().await);
        }
        PathGuards { guards, paths: keys }
    }

    /// Whether someone currently holds the path.
    pub fn is_locked(&self, path: &Path) -> bool {
        let key = normalize_path(path);
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        match table.get(&key) {
            Some(arc) => arc.try_lock().is_err(),
            None => false,
        }
    }

    /// Paths with a live holder right now.
    pub fn locked_paths(&self) -> Vec<PathBuf> {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table
            .iter()
            .filter(|(_, arc)| arc.try_lock().is_err())
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Drop the table entry for one path. Existing holders keep their
    /// guard (the mutex lives until the last `Arc` drops); new acquisitions
    /// start a fresh queue. Teardown helper, not a cancellation mechanism.
    pub fn clear(&self, path: &Path) {
        let key = normalize_path(path);
        self.table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);
    }

    /// Drop every table entry.
    pub fn clear_all(&self) {
        self.table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Number of paths ever locked and not cleared. Test/diagnostic aid.
    pub fn tracked_paths(&self) -> usize {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn same_path_serializes_in_submission_order() {
        let manager = Arc::new(FileLockManager::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = manager.acquire(Path::new("/ws/x.txt")).await;

        let mut handles = Vec::new();
        for i in 1..=3 {
            let manager = manager.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _guard = manager.acquire(Path::new("/ws/x.txt")).await;
                order.lock().unwrap().push(i);
            }));
            // Let each waiter enqueue before the next submits.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(manager.is_locked(Path::new("/ws/x.txt")));
        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(order.lock().unwrap().as_slice(), [1, 2, 3]);
    }

    #[tokio::test]
    async fn different_paths_are_independent() {
        let manager = FileLockManager::new();
        let _x = manager.acquire(Path::new("/ws/x.txt")).await;
        // Must not block even while x is held.
        let _y = tokio::time::timeout(
            Duration::from_millis(100),
            manager.acquire(Path::new("/ws/y.txt")),
        )
        .await
        .expect("independent path must not wait");
        assert!(manager.is_locked(Path::new("/ws/x.txt")));
        assert!(manager.is_locked(Path::new("/ws/y.txt")));
    }

    #[tokio::test]
    async fn normalization_unifies_path_spellings() {
        let manager = FileLockManager::new();
        let _guard = manager.acquire(Path::new("/ws/./a/../x.txt")).await;
        assert!(manager.is_locked(Path::new("/ws/x.txt")));
    }

    #[tokio::test]
    async fn release_is_automatic_on_drop() {
        let manager = FileLockManager::new();
        {
            let _guard = manager.acquire(Path::new("/ws/x.txt")).await;
            assert!(manager.is_locked(Path::new("/ws/x.txt")));
        }
        assert!(!manager.is_locked(Path::new("/ws/x.txt")));
        assert_eq!(manager.locked_paths().len(), 0);
    }

    #[tokio::test]
    async fn multi_path_acquisition_sorts_and_dedups() {
        let manager = FileLockManager::new();
        let guards = manager
            .acquire_all(&[
                PathBuf::from("/ws/b.txt"),
                PathBuf::from("/ws/a.txt"),
                PathBuf::from("/ws/a.txt"),
            ])
            .await;
        assert_eq!(
            guards.paths(),
            [PathBuf::from("/ws/a.txt"), PathBuf::from("/ws/b.txt")]
        );
    }

    #[tokio::test]
    async fn overlapping_sets_cannot_deadlock() {
        let manager = Arc::new(FileLockManager::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let manager = manager.clone();
            // Alternate submission order of the same two paths.
            let paths = if i % 2 == 0 {
                vec![PathBuf::from("/ws/a"), PathBuf::from("/ws/b")]
            } else {
                vec![PathBuf::from("/ws/b"), PathBuf::from("/ws/a")]
            };
            handles.push(tokio::spawn(async move {
                let _guards = manager.acquire_all(&paths).await;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }));
        }
        tokio::time::timeout(Duration::from_secs(5), async {
            for handle in handles {
                handle.await.unwrap();
            }
        })
        .await
        .expect("sorted acquisition must not deadlock");
    }

    #[tokio::test]
    async fn clear_and_clear_all_drop_entries() {
        let manager = FileLockManager::new();
        {
            let _a = manager.acquire(Path::new("/ws/a")).await;
            let _b = manager.acquire(Path::new("/ws/b")).await;
        }
        assert_eq!(manager.tracked_paths(), 2);
        manager.clear(Path::new("/ws/a"));
        assert_eq!(manager.tracked_paths(), 1);
        manager.clear_all();
        assert_eq!(manager.tracked_paths(), 0);
    }

    #[tokio::test]
    async fn empty_path_set_is_a_noop() {
        let manager = FileLockManager::new();
        let guards = manager.acquire_all(&[]).await;
        assert!(guards.is_empty());
    }
}
