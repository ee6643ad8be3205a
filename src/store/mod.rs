//! Storage layer for swarmq - SQLite-backed task persistence.
//!
//! The store is the single source of truth for task state. One logical
//! writer (callers serialize through a `Mutex`), many concurrent
//! readers; WAL journaling keeps readers unblocked by writer I/O.

mod task_store;

pub use task_store::{QueueStats, TaskStore, compute_project_hash};
