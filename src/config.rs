//! Configuration loading for the swarmq binary.
//!
//! Settings come from an optional YAML file (`swarmq.yml` in the
//! working directory, or an explicit `--config` path) with documented
//! defaults for every field.

use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use swarmq::queue::{FailurePolicy, QueueConfig};
use swarmq::swarm::SwarmConfig;

/// Default config file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "swarmq.yml";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum tasks in flight at once.
    pub max_concurrent: usize,
    /// Per-run outcome cap; absent means run until drained.
    pub task_limit: Option<usize>,
    /// Orchestrator idle poll interval (ms).
    pub poll_interval_ms: u64,
    /// Per-task execution timeout (ms).
    pub execution_timeout_ms: u64,
    /// Retry budget for submissions that do not set one.
    pub default_max_retries: u32,
    /// First retry delay (ms); doubles per retry.
    pub backoff_base_ms: u64,
    /// Retry delay cap (ms).
    pub backoff_cap_ms: u64,
    /// Dependent policy when retries are exhausted.
    pub failure_policy: FailurePolicy,
    /// Store location override; defaults to `~/.swarmq/<project-hash>`.
    pub data_dir: Option<PathBuf>,
    /// Verbose diagnostics.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            task_limit: None,
            poll_interval_ms: 200,
            execution_timeout_ms: 300_000,
            default_max_retries: 3,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 60_000,
            failure_policy: FailurePolicy::default(),
            data_dir: None,
            debug: false,
        }
    }
}

impl Config {
    /// Load configuration from the given path, the default file, or
    /// built-in defaults when neither exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Queue service tunables.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            default_max_retries: self.default_max_retries,
            backoff_base_ms: self.backoff_base_ms,
            backoff_cap_ms: self.backoff_cap_ms,
            failure_policy: self.failure_policy,
        }
    }

    /// Orchestrator tunables.
    pub fn swarm_config(&self) -> SwarmConfig {
        SwarmConfig::default()
            .with_max_concurrent(self.max_concurrent)
            .with_task_limit(self.task_limit)
            .with_poll_interval_ms(self.poll_interval_ms)
            .with_execution_timeout_ms(self.execution_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.task_limit, None);
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.failure_policy, FailurePolicy::CascadeCancel);
        assert!(!config.debug);
    }

    #[test]
    fn test_load_missing_path_uses_defaults() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.max_concurrent, Config::default().max_concurrent);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "max_concurrent: 12\ntask_limit: 100\nfailure_policy: leave-blocked\ndebug: true"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.max_concurrent, 12);
        assert_eq!(config.task_limit, Some(100));
        assert_eq!(config.failure_policy, FailurePolicy::LeaveBlocked);
        assert!(config.debug);
        // Unset fields fall back to defaults
        assert_eq!(config.backoff_base_ms, 1_000);
    }

    #[test]
    fn test_load_invalid_yaml_errors() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_concurrent: [not a number").unwrap();
        assert!(Config::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_queue_and_swarm_configs_derived() {
        let mut config = Config::default();
        config.max_concurrent = 7;
        config.task_limit = Some(9);
        config.backoff_base_ms = 250;

        let queue = config.queue_config();
        assert_eq!(queue.backoff_base_ms, 250);

        let swarm = config.swarm_config();
        assert_eq!(swarm.max_concurrent, 7);
        assert_eq!(swarm.task_limit, Some(9));
    }
}
