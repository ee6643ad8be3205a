//! Task queue service: the lifecycle authority.
//!
//! All status transitions flow through `QueueService`, which validates
//! submissions (cycle + prerequisite checks), exposes atomic claim-next
//! semantics, and applies completion/failure/cancellation cascades.

mod service;

pub use service::{FailDisposition, QueueService, SubmitRequest, SweepReport, backoff_delay_ms};

use serde::{Deserialize, Serialize};

/// What happens to a permanently failed task's dependents.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Cancel every transitive dependent (default)
    #[default]
    CascadeCancel,
    /// Leave dependents Blocked pending manual salvage
    LeaveBlocked,
}

/// Tunables for the queue service.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Retry budget applied when a submission does not set one.
    pub default_max_retries: u32,
    /// First retry delay; doubles per retry.
    pub backoff_base_ms: u64,
    /// Upper bound on the retry delay.
    pub backoff_cap_ms: u64,
    /// Dependent policy on permanent failure.
    pub failure_policy: FailurePolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 60_000,
            failure_policy: FailurePolicy::default(),
        }
    }
}
