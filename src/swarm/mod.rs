//! Swarm orchestration: a bounded pool of agent workers consuming the
//! queue.
//!
//! This module provides:
//! - **Executor port**: the one external capability the core consumes,
//!   behind a registry that resolves worker-type tags up front.
//! - **SwarmOrchestrator**: claims Ready tasks under a semaphore,
//!   executes them with a bounded timeout, reports outcomes back to the
//!   queue service, and enforces the optional total-outcome cap.

mod executor;
mod orchestrator;

pub use executor::{Executor, ExecutorRegistry, ShellExecutor};
pub use orchestrator::{RunSummary, SwarmConfig, SwarmOrchestrator, TaskOutcome};
