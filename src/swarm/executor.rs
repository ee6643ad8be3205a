//! Execution provider port and registry.
//!
//! Worker behavior is selected by the task's worker-type tag. Tags are
//! bound to implementations at registration time; resolving an unknown
//! tag is an error surfaced immediately, not at invocation time.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::TaskRecord;
use crate::error::{Result, SwarmError};

/// The single external capability the core consumes: perform a task's
/// work and return a result payload or a typed failure.
///
/// Implementations must be cancellation-safe: the orchestrator bounds
/// each invocation with a timeout and may discard a late result.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, task: &TaskRecord) -> Result<String>;
}

impl std::fmt::Debug for dyn Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Executor")
    }
}

/// Registry mapping worker-type tags to executor implementations.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a worker-type tag to an executor. Re-registering a tag
    /// replaces the previous binding.
    pub fn register(&mut self, worker_type: &str, executor: Arc<dyn Executor>) {
        self.executors.insert(worker_type.to_string(), executor);
    }

    /// Resolve a tag to its executor.
    pub fn resolve(&self, worker_type: &str) -> Result<Arc<dyn Executor>> {
        self.executors
            .get(worker_type)
            .cloned()
            .ok_or_else(|| SwarmError::UnknownWorkerType(worker_type.to_string()))
    }

    /// Check whether a tag is registered.
    pub fn contains(&self, worker_type: &str) -> bool {
        self.executors.contains_key(worker_type)
    }

    /// The set of registered tags, for submission-time validation.
    pub fn worker_types(&self) -> HashSet<String> {
        self.executors.keys().cloned().collect()
    }

    /// Number of registered executors.
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("worker_types", &self.worker_types())
            .finish()
    }
}

/// Executor that runs the task description as a shell command.
///
/// The default worker type for CLI-submitted tasks.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
}

impl ShellExecutor {
    /// Create a shell executor using `sh`.
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    /// Use a different shell binary.
    pub fn with_shell(mut self, shell: &str) -> Self {
        self.shell = shell.to_string();
        self
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    async fn execute(&self, task: &TaskRecord) -> Result<String> {
        let output = tokio::process::Command::new(&self.shell)
            .arg("-c")
            .arg(&task.description)
            .output()
            .await
            .map_err(|e| SwarmError::ExecutionFailed(e.to_string()))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(SwarmError::ExecutionFailed(format!(
                "exit {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskSource;

    struct EchoExecutor;

    #[async_trait]
    impl Executor for EchoExecutor {
        async fn execute(&self, task: &TaskRecord) -> Result<String> {
            Ok(format!("echo: {}", task.summary))
        }
    }

    fn task(summary: &str, worker_type: &str) -> TaskRecord {
        TaskRecord::new(summary, summary, worker_type, TaskSource::Human)
    }

    #[test]
    fn test_registry_register_and_resolve() {
        let mut registry = ExecutorRegistry::new();
        assert!(registry.is_empty());

        registry.register("echo", Arc::new(EchoExecutor));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("echo"));
        assert!(registry.resolve("echo").is_ok());
    }

    #[test]
    fn test_registry_unknown_tag_fails_fast() {
        let registry = ExecutorRegistry::new();
        let err = registry.resolve("warp-drive").unwrap_err();
        assert!(matches!(err, SwarmError::UnknownWorkerType(_)));
    }

    #[test]
    fn test_registry_worker_types() {
        let mut registry = ExecutorRegistry::new();
        registry.register("echo", Arc::new(EchoExecutor));
        registry.register("shell", Arc::new(ShellExecutor::new()));

        let types = registry.worker_types();
        assert_eq!(types.len(), 2);
        assert!(types.contains("echo"));
        assert!(types.contains("shell"));
    }

    #[tokio::test]
    async fn test_echo_executor() {
        let registry = {
            let mut r = ExecutorRegistry::new();
            r.register("echo", Arc::new(EchoExecutor));
            r
        };
        let executor = registry.resolve("echo").unwrap();
        let result = executor.execute(&task("hello", "echo")).await.unwrap();
        assert_eq!(result, "echo: hello");
    }

    #[tokio::test]
    async fn test_shell_executor_success() {
        let executor = ShellExecutor::new();
        let mut t = task("print", "shell");
        t.description = "printf ok".to_string();

        let result = executor.execute(&t).await.unwrap();
        assert_eq!(result, "ok");
    }

    #[tokio::test]
    async fn test_shell_executor_failure() {
        let executor = ShellExecutor::new();
        let mut t = task("fail", "shell");
        t.description = "exit 3".to_string();

        let err = executor.execute(&t).await.unwrap_err();
        assert!(matches!(err, SwarmError::ExecutionFailed(_)));
        assert!(err.to_string().contains("exit 3"));
    }
}
