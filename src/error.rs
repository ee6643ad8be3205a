//! Error types for swarmq
//!
//! Centralized error handling using thiserror. Variants fall into four
//! groups: validation errors (rejected at the API boundary, nothing
//! mutated), execution errors (recoverable, drive the retry path),
//! exhaustion errors (terminal), and integrity errors (store-level,
//! fatal to the current operation).

use thiserror::Error;

/// All error types that can occur in swarmq
#[derive(Debug, Error)]
pub enum SwarmError {
    /// Task not found in the store
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Submitting or adding an edge would close a dependency cycle
    #[error("Circular dependency: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    /// A declared prerequisite does not exist
    #[error("Missing prerequisite: {task_id} depends on unknown task {depends_on}")]
    MissingPrerequisite { task_id: String, depends_on: String },

    /// Worker type tag has no registered executor
    #[error("Unknown worker type: {0}")]
    UnknownWorkerType(String),

    /// Requested status transition is not legal from the current status
    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },

    /// Execution provider reported a failure
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Execution provider did not respond within the configured timeout
    #[error("Execution timed out after {0}ms")]
    ExecutionTimeout(u64),

    /// Retry budget spent; task is permanently failed
    #[error("Retries exhausted for task {task_id} after {retries} retries: {last_error}")]
    RetriesExhausted {
        task_id: String,
        retries: u32,
        last_error: String,
    },

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SwarmError {
    /// Check whether this error is a submission-time validation error.
    ///
    /// Validation errors are rejected synchronously and leave the store
    /// untouched; everything else may have partial context worth logging.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SwarmError::CircularDependency(_)
                | SwarmError::MissingPrerequisite { .. }
                | SwarmError::UnknownWorkerType(_)
                | SwarmError::InvalidTransition { .. }
        )
    }

    /// Check whether this error is recoverable via the retry path.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SwarmError::ExecutionFailed(_) | SwarmError::ExecutionTimeout(_)
        )
    }
}

/// Result type alias for swarmq operations
pub type Result<T> = std::result::Result<T, SwarmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circular_dependency_display() {
        let err = SwarmError::CircularDependency(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
        ]);
        assert_eq!(err.to_string(), "Circular dependency: a -> b -> a");
    }

    #[test]
    fn test_missing_prerequisite_display() {
        let err = SwarmError::MissingPrerequisite {
            task_id: "t1".to_string(),
            depends_on: "ghost".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Missing prerequisite: t1 depends on unknown task ghost"
        );
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = SwarmError::InvalidTransition {
            task_id: "t1".to_string(),
            from: "completed".to_string(),
            to: "running".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid transition for task t1: completed -> running"
        );
    }

    #[test]
    fn test_retries_exhausted_display() {
        let err = SwarmError::RetriesExhausted {
            task_id: "t1".to_string(),
            retries: 3,
            last_error: "provider timeout".to_string(),
        };
        assert!(err.to_string().contains("after 3 retries"));
        assert!(err.to_string().contains("provider timeout"));
    }

    #[test]
    fn test_is_validation() {
        assert!(SwarmError::UnknownWorkerType("x".to_string()).is_validation());
        assert!(SwarmError::CircularDependency(vec![]).is_validation());
        assert!(!SwarmError::ExecutionFailed("x".to_string()).is_validation());
        assert!(!SwarmError::Storage("x".to_string()).is_validation());
    }

    #[test]
    fn test_is_retryable() {
        assert!(SwarmError::ExecutionFailed("x".to_string()).is_retryable());
        assert!(SwarmError::ExecutionTimeout(30_000).is_retryable());
        assert!(!SwarmError::TaskNotFound("x".to_string()).is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SwarmError = io_err.into();
        assert!(matches!(err, SwarmError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: SwarmError = json_err.into();
        assert!(matches!(err, SwarmError::Json(_)));
    }
}
