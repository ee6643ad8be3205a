//! Audit event types for observability.
//!
//! One `TaskEvent` row is appended for every status transition, inside
//! the same transaction that applies the transition.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::{generate_event_id, now_ms};

/// Event type constants
pub mod event_types {
    pub const TASK_SUBMITTED: &str = "task.submitted";
    pub const TASK_READY: &str = "task.ready";
    pub const TASK_CLAIMED: &str = "task.claimed";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_RETRIED: &str = "task.retried";
    pub const TASK_FAILED: &str = "task.failed";
    pub const TASK_CANCELLED: &str = "task.cancelled";
    pub const TASK_REQUEUED: &str = "task.requeued";
}

/// Append-only audit record of a task status transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskEvent {
    /// Unique event identifier
    pub id: String,
    /// Task this event belongs to
    pub task_id: String,
    /// Event type (e.g., "task.claimed")
    pub event_type: String,
    /// Event-specific payload data
    pub payload: Value,
    /// Unix timestamp in milliseconds
    pub created_at: i64,
}

impl TaskEvent {
    /// Create a new event with the given type and payload
    pub fn new(event_type: &str, task_id: &str, payload: Value) -> Self {
        Self {
            id: generate_event_id(),
            task_id: task_id.to_string(),
            event_type: event_type.to_string(),
            payload,
            created_at: now_ms(),
        }
    }

    /// Create a task.submitted event
    pub fn submitted(task_id: &str, status: &str) -> Self {
        Self::new(
            event_types::TASK_SUBMITTED,
            task_id,
            serde_json::json!({ "status": status }),
        )
    }

    /// Create a task.ready event
    pub fn ready(task_id: &str) -> Self {
        Self::new(event_types::TASK_READY, task_id, Value::Null)
    }

    /// Create a task.claimed event
    pub fn claimed(task_id: &str) -> Self {
        Self::new(event_types::TASK_CLAIMED, task_id, Value::Null)
    }

    /// Create a task.completed event
    pub fn completed(task_id: &str) -> Self {
        Self::new(event_types::TASK_COMPLETED, task_id, Value::Null)
    }

    /// Create a task.retried event
    pub fn retried(task_id: &str, retry_count: u32, not_before: i64) -> Self {
        Self::new(
            event_types::TASK_RETRIED,
            task_id,
            serde_json::json!({ "retry_count": retry_count, "not_before": not_before }),
        )
    }

    /// Create a task.failed event
    pub fn failed(task_id: &str, reason: &str, retry_count: u32) -> Self {
        Self::new(
            event_types::TASK_FAILED,
            task_id,
            serde_json::json!({ "reason": reason, "retry_count": retry_count }),
        )
    }

    /// Create a task.cancelled event
    pub fn cancelled(task_id: &str, cascade_from: Option<&str>) -> Self {
        Self::new(
            event_types::TASK_CANCELLED,
            task_id,
            serde_json::json!({ "cascade_from": cascade_from }),
        )
    }

    /// Create a task.requeued event (crash recovery)
    pub fn requeued(task_id: &str) -> Self {
        Self::new(event_types::TASK_REQUEUED, task_id, Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_new() {
        let event = TaskEvent::new("test.event", "task-123", Value::Null);
        assert!(event.id.starts_with("evt-"));
        assert_eq!(event.event_type, "test.event");
        assert_eq!(event.task_id, "task-123");
        assert!(event.created_at > 0);
    }

    #[test]
    fn test_submitted() {
        let event = TaskEvent::submitted("task-1", "ready");
        assert_eq!(event.event_type, event_types::TASK_SUBMITTED);
        assert_eq!(event.payload["status"], "ready");
    }

    #[test]
    fn test_retried() {
        let event = TaskEvent::retried("task-1", 2, 1738300800123);
        assert_eq!(event.event_type, event_types::TASK_RETRIED);
        assert_eq!(event.payload["retry_count"], 2);
        assert_eq!(event.payload["not_before"], 1738300800123i64);
    }

    #[test]
    fn test_failed() {
        let event = TaskEvent::failed("task-1", "provider timeout", 3);
        assert_eq!(event.event_type, event_types::TASK_FAILED);
        assert_eq!(event.payload["reason"], "provider timeout");
        assert_eq!(event.payload["retry_count"], 3);
    }

    #[test]
    fn test_cancelled_cascade() {
        let event = TaskEvent::cancelled("task-2", Some("task-1"));
        assert_eq!(event.event_type, event_types::TASK_CANCELLED);
        assert_eq!(event.payload["cascade_from"], "task-1");

        let direct = TaskEvent::cancelled("task-1", None);
        assert!(direct.payload["cascade_from"].is_null());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let event = TaskEvent::claimed("task-7");
        let json = serde_json::to_string(&event).unwrap();
        let deserialized: TaskEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, deserialized);
    }
}
