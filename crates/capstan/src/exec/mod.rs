//! Runtime resource control: locks, admission, retry, caching.
//!
//! - [`locks`] — per-path FIFO mutual exclusion for mutating tools.
//! - [`concurrency`] — global in-flight cap, queueing, timeouts, retries.
//! - [`retry`] — backoff policy shared by the concurrency manager.
//! - [`cache`] — session-scoped result cache for read-only tools.

pub mod cache;
pub mod concurrency;
pub mod locks;
pub mod retry;

pub use cache::ToolResultCache;
pub use concurrency::{
    ConcurrencyLimits, ConcurrencyManager, ExecEvent, ExecObserver, FnObserver, NoopObserver,
};
pub use locks::{FileLockManager, PathGuards};
pub use retry::RetryPolicy;
