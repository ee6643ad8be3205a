//! Task record types for the task store.
//!
//! All tasks share the single `TaskRecord` shape regardless of worker
//! type; the `worker_type` tag selects which executor runs the task.

use serde::{Deserialize, Serialize};

use crate::id::{generate_task_id, now_ms};

/// Base priority bounds. Submissions outside the range are clamped.
pub const BASE_PRIORITY_MIN: i32 = 0;
pub const BASE_PRIORITY_MAX: i32 = 10;

/// The task record persisted in the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    /// Unique id: "{timestamp_ms}-{hex}"
    pub id: String,

    /// Short human-readable summary
    pub summary: String,

    /// Full work description handed to the executor
    pub description: String,

    /// Tag selecting the executor implementation
    pub worker_type: String,

    /// Origin classification, a priority input
    pub source: TaskSource,

    /// Declared priority, clamped to 0..=10
    pub base_priority: i32,

    /// Derived score; recalculated on triggering mutations, never an
    /// input to further computation
    pub computed_priority: f64,

    /// Current status
    pub status: TaskStatus,

    /// Failed attempts so far
    pub retry_count: u32,

    /// Retry budget
    pub max_retries: u32,

    /// Parent task for hierarchical decomposition (None for top-level)
    pub parent_task: Option<String>,

    /// Grouping/branch tag
    pub branch: Option<String>,

    /// Optional deadline (ms epoch) feeding the urgency score
    pub deadline: Option<i64>,

    /// Backoff gate: not claimable before this time (ms epoch, 0 = none)
    pub not_before: i64,

    /// Unix timestamp in milliseconds
    pub created_at: i64,

    /// Set when first claimed
    pub started_at: Option<i64>,

    /// Set on terminal transition
    pub completed_at: Option<i64>,

    /// Unix timestamp in milliseconds
    pub updated_at: i64,

    /// Result payload on success
    pub result: Option<String>,

    /// Last failure reason
    pub last_error: Option<String>,
}

impl TaskRecord {
    /// Create a new pending task record.
    pub fn new(summary: &str, description: &str, worker_type: &str, source: TaskSource) -> Self {
        let now = now_ms();
        Self {
            id: generate_task_id(),
            summary: summary.to_string(),
            description: description.to_string(),
            worker_type: worker_type.to_string(),
            source,
            base_priority: 5,
            computed_priority: 0.0,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries: 3,
            parent_task: None,
            branch: None,
            deadline: None,
            not_before: 0,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            result: None,
            last_error: None,
        }
    }

    /// Set the base priority, clamped to the legal range.
    pub fn with_base_priority(mut self, priority: i32) -> Self {
        self.base_priority = priority.clamp(BASE_PRIORITY_MIN, BASE_PRIORITY_MAX);
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the parent task reference.
    pub fn with_parent(mut self, parent_id: &str) -> Self {
        self.parent_task = Some(parent_id.to_string());
        self
    }

    /// Set the branch tag.
    pub fn with_branch(mut self, branch: &str) -> Self {
        self.branch = Some(branch.to_string());
        self
    }

    /// Set the deadline (ms epoch).
    pub fn with_deadline(mut self, deadline: i64) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Update the timestamp to now.
    pub fn touch(&mut self) {
        self.updated_at = now_ms();
    }

    /// Check whether the retry budget still has room.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Origin classification for a task.
///
/// Human submissions outrank machine-origin tiers when scoring.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskSource {
    /// Submitted directly by a person
    Human,
    /// Subtask produced by decomposing a larger task
    Decomposition,
    /// Proposed autonomously by an agent
    Agent,
    /// Periodic/maintenance work
    Maintenance,
}

impl TaskSource {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskSource::Human => "human",
            TaskSource::Decomposition => "decomposition",
            TaskSource::Agent => "agent",
            TaskSource::Maintenance => "maintenance",
        }
    }

    /// Parse from the string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "human" => Some(TaskSource::Human),
            "decomposition" => Some(TaskSource::Decomposition),
            "agent" => Some(TaskSource::Agent),
            "maintenance" => Some(TaskSource::Maintenance),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Task status state machine.
///
/// Legal transitions:
/// `Pending -> Blocked -> Ready -> Running -> {Completed, Failed, Cancelled}`,
/// plus `Failed-attempt -> Pending` as bounded retry re-entry and
/// `Cancelled` from any non-terminal status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Validated, not yet routed to Blocked/Ready
    Pending,
    /// At least one prerequisite unmet
    Blocked,
    /// All prerequisites satisfied, claimable
    Ready,
    /// Claimed by a worker
    Running,
    /// Finished successfully
    Completed,
    /// Retries exhausted or unrecoverable
    Failed,
    /// Cancelled directly or by cascade
    Cancelled,
}

impl TaskStatus {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Parse from the string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "blocked" => Some(TaskStatus::Blocked),
            "ready" => Some(TaskStatus::Ready),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Check if this status counts as a met prerequisite.
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, TaskStatus::Completed)
    }

    /// Check whether a transition to `next` is legal from this status.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            // Cancellation is legal from any non-terminal status
            (s, Cancelled) if !s.is_terminal() => true,
            (Pending, Blocked) | (Pending, Ready) => true,
            (Blocked, Ready) => true,
            (Ready, Running) => true,
            // Ready/Blocked can flip back when an edge is added
            (Ready, Blocked) => true,
            (Running, Completed) | (Running, Failed) => true,
            // Retry re-entry
            (Running, Pending) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of prerequisite edge.
///
/// Readiness is conjunctive over all edges in both cases; the kind
/// records whether the edge came from a single-prerequisite chain or a
/// declared parallel join set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DepKind {
    Sequential,
    ParallelJoin,
}

impl DepKind {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DepKind::Sequential => "sequential",
            DepKind::ParallelJoin => "parallel_join",
        }
    }

    /// Parse from the string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sequential" => Some(DepKind::Sequential),
            "parallel_join" => Some(DepKind::ParallelJoin),
            _ => None,
        }
    }
}

/// A directed prerequisite edge: `task_id` waits for `depends_on`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DepEdge {
    pub task_id: String,
    pub depends_on: String,
    pub kind: DepKind,
}

impl DepEdge {
    /// Create a new edge.
    pub fn new(task_id: &str, depends_on: &str, kind: DepKind) -> Self {
        Self {
            task_id: task_id.to_string(),
            depends_on: depends_on.to_string(),
            kind,
        }
    }
}
