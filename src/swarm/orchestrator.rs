//! SwarmOrchestrator: the bounded worker pool consuming the queue.
//!
//! The orchestrator runs a claim/execute/report loop:
//! 1. Drain outcome reports from finished workers
//! 2. Claim Ready tasks while the semaphore and outcome budget allow
//! 3. Spawn each claimed task against its registered executor
//! 4. Wait for the next outcome or poll tick
//!
//! The per-run outcome counter increments when a worker REPORTS a
//! success or permanent failure, never when a task is spawned: with
//! concurrency > 1 several tasks can be in flight before any has
//! reported, and counting spawns would stop the run early or blow past
//! the limit by the width of the concurrency window. Claims are instead
//! bounded by `limit - outcomes - in_flight`, which makes a finite run
//! produce exactly `limit` outcomes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::domain::{TaskRecord, TaskStatus};
use crate::error::{Result, SwarmError};
use crate::id::now_ms;
use crate::queue::{FailDisposition, QueueService};
use crate::swarm::ExecutorRegistry;

/// Meta key the final checkpoint is written under.
pub const CHECKPOINT_KEY: &str = "swarm.last_run";

/// Configuration for the SwarmOrchestrator.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Maximum tasks in flight at once.
    pub max_concurrent: usize,
    /// Stop claiming after this many reported outcomes; None runs until
    /// the queue is drained.
    pub task_limit: Option<usize>,
    /// Idle poll interval (ms).
    pub poll_interval_ms: u64,
    /// Per-invocation execution timeout (ms); expiry counts as a
    /// provider failure.
    pub execution_timeout_ms: u64,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            task_limit: None,
            poll_interval_ms: 200,
            execution_timeout_ms: 300_000,
        }
    }
}

impl SwarmConfig {
    /// Set the concurrency bound.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Set the outcome cap.
    pub fn with_task_limit(mut self, task_limit: Option<usize>) -> Self {
        self.task_limit = task_limit;
        self
    }

    /// Set the poll interval.
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the execution timeout.
    pub fn with_execution_timeout_ms(mut self, ms: u64) -> Self {
        self.execution_timeout_ms = ms;
        self
    }
}

/// Report sent from a worker back to the orchestrator.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// Executor returned a result payload.
    Succeeded { task_id: String, result: String },
    /// Executor failed or timed out.
    Failed { task_id: String, error: String },
}

impl TaskOutcome {
    /// The task this outcome belongs to.
    pub fn task_id(&self) -> &str {
        match self {
            TaskOutcome::Succeeded { task_id, .. } | TaskOutcome::Failed { task_id, .. } => task_id,
        }
    }
}

/// Totals for one orchestrator run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Tasks completed successfully.
    pub completed: usize,
    /// Tasks permanently failed.
    pub failed: usize,
    /// Outcomes discarded (task cancelled while in flight).
    pub discarded: usize,
    /// Tasks requeued from a previous crashed run.
    pub requeued: usize,
}

impl RunSummary {
    /// Reported outcomes: successes plus permanent failures.
    ///
    /// Retries and discards are not outcomes; they leave the task's
    /// story unfinished.
    pub fn outcomes(&self) -> usize {
        self.completed + self.failed
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Checkpoint {
    #[serde(flatten)]
    summary: RunSummary,
    finished_at: i64,
}

/// Orchestrates task execution under a concurrency bound.
pub struct SwarmOrchestrator {
    config: SwarmConfig,
    queue: Arc<QueueService>,
    registry: Arc<ExecutorRegistry>,
    stop: Arc<AtomicBool>,
}

impl SwarmOrchestrator {
    /// Create an orchestrator with default configuration.
    pub fn new(queue: Arc<QueueService>, registry: Arc<ExecutorRegistry>) -> Self {
        Self {
            config: SwarmConfig::default(),
            queue,
            registry,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create an orchestrator with custom configuration.
    pub fn with_config(
        queue: Arc<QueueService>,
        registry: Arc<ExecutorRegistry>,
        config: SwarmConfig,
    ) -> Self {
        Self {
            config,
            queue,
            registry,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that requests a graceful stop: no new claims, in-flight
    /// tasks still drain.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Run until the task limit is reached, the queue drains, or a stop
    /// is requested. In-flight tasks are always awaited before the
    /// final checkpoint is written.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        if self.config.task_limit == Some(0) {
            tracing::info!("Task limit is zero, claiming nothing");
            self.write_checkpoint(&summary)?;
            return Ok(summary);
        }

        summary.requeued = self.queue.requeue_orphaned()?;

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let (outcome_tx, mut outcome_rx) = mpsc::channel::<TaskOutcome>(100);
        let mut in_flight: HashMap<String, JoinHandle<()>> = HashMap::new();
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));

        loop {
            // Apply everything already reported
            while let Ok(outcome) = outcome_rx.try_recv() {
                self.apply_outcome(outcome, &mut in_flight, &mut summary)?;
            }
            self.reap(&mut outcome_rx, &mut in_flight, &mut summary)?;

            if self.stop.load(Ordering::Relaxed) {
                tracing::info!("Stop requested, draining in-flight tasks");
                break;
            }
            if let Some(limit) = self.config.task_limit
                && summary.outcomes() >= limit
            {
                tracing::info!(limit, "Task limit reached, draining in-flight tasks");
                break;
            }

            // Claim while slots and the outcome budget allow. The budget
            // subtracts in-flight claims so draining them can never push
            // the outcome count past the limit.
            loop {
                let budget = match self.config.task_limit {
                    Some(limit) => limit.saturating_sub(summary.outcomes() + in_flight.len()),
                    None => usize::MAX,
                };
                if budget == 0 {
                    break;
                }
                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    break;
                };
                match self.queue.claim_next()? {
                    Some(task) => {
                        let handle = self.spawn_worker(task.clone(), permit, outcome_tx.clone());
                        in_flight.insert(task.id, handle);
                    }
                    None => {
                        drop(permit);
                        break;
                    }
                }
            }

            if in_flight.is_empty() {
                // Nothing running, nothing claimable. Run the safety-net
                // sweep, wait out backoff gates, otherwise the queue is
                // drained.
                if self.queue.sweep()?.promoted > 0 {
                    continue;
                }
                if self.queue.next_eligible_at()?.is_some() {
                    tokio::time::sleep(poll).await;
                    continue;
                }
                tracing::info!("Queue drained of eligible work");
                break;
            }

            match tokio::time::timeout(poll, outcome_rx.recv()).await {
                Ok(Some(outcome)) => {
                    self.apply_outcome(outcome, &mut in_flight, &mut summary)?;
                }
                Ok(None) | Err(_) => {}
            }
        }

        // Graceful shutdown: stop claiming but await every in-flight task
        while !in_flight.is_empty() {
            match tokio::time::timeout(Duration::from_secs(1), outcome_rx.recv()).await {
                Ok(Some(outcome)) => {
                    self.apply_outcome(outcome, &mut in_flight, &mut summary)?;
                }
                Ok(None) | Err(_) => {
                    self.reap(&mut outcome_rx, &mut in_flight, &mut summary)?;
                }
            }
        }

        self.write_checkpoint(&summary)?;
        tracing::info!(
            completed = summary.completed,
            failed = summary.failed,
            discarded = summary.discarded,
            "Swarm run finished"
        );
        Ok(summary)
    }

    /// Spawn a worker holding its semaphore permit for the duration of
    /// the execution.
    fn spawn_worker(
        &self,
        task: TaskRecord,
        permit: OwnedSemaphorePermit,
        outcome_tx: mpsc::Sender<TaskOutcome>,
    ) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let timeout_ms = self.config.execution_timeout_ms;

        tokio::spawn(async move {
            let _permit = permit;
            let task_id = task.id.clone();

            let outcome = match registry.resolve(&task.worker_type) {
                Err(e) => TaskOutcome::Failed {
                    task_id,
                    error: e.to_string(),
                },
                Ok(executor) => {
                    let bounded = tokio::time::timeout(
                        Duration::from_millis(timeout_ms),
                        executor.execute(&task),
                    );
                    match bounded.await {
                        Ok(Ok(result)) => TaskOutcome::Succeeded { task_id, result },
                        Ok(Err(e)) => TaskOutcome::Failed {
                            task_id,
                            error: e.to_string(),
                        },
                        Err(_) => TaskOutcome::Failed {
                            task_id,
                            error: SwarmError::ExecutionTimeout(timeout_ms).to_string(),
                        },
                    }
                }
            };

            // Receiver only closes after every worker is drained
            let _ = outcome_tx.send(outcome).await;
        })
    }

    /// Apply a reported outcome to the queue and the run summary.
    fn apply_outcome(
        &self,
        outcome: TaskOutcome,
        in_flight: &mut HashMap<String, JoinHandle<()>>,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let task_id = outcome.task_id().to_string();
        in_flight.remove(&task_id);

        // Cooperative cancellation: a task cancelled while in flight
        // keeps running to completion, but its result is discarded.
        match self.queue.get(&task_id)? {
            None => {
                tracing::warn!(task_id = %task_id, "Task vanished mid-flight, discarding outcome");
                summary.discarded += 1;
                return Ok(());
            }
            Some(task) if task.status == TaskStatus::Cancelled => {
                tracing::info!(task_id = %task_id, "Discarding outcome of cancelled task");
                summary.discarded += 1;
                return Ok(());
            }
            Some(_) => {}
        }

        match outcome {
            TaskOutcome::Succeeded { result, .. } => {
                match self.queue.complete(&task_id, Some(result)) {
                    Ok(promoted) => {
                        summary.completed += 1;
                        tracing::debug!(
                            task_id = %task_id,
                            promoted = promoted.len(),
                            "Outcome applied: completed"
                        );
                    }
                    Err(e) if e.is_validation() => {
                        tracing::warn!(task_id = %task_id, error = %e, "Stale success discarded");
                        summary.discarded += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
            TaskOutcome::Failed { error, .. } => match self.queue.fail(&task_id, &error) {
                Ok(FailDisposition::Retried { not_before, .. }) => {
                    tracing::debug!(task_id = %task_id, not_before, "Outcome applied: retry");
                }
                Ok(FailDisposition::Exhausted { .. }) => {
                    summary.failed += 1;
                    tracing::debug!(task_id = %task_id, "Outcome applied: permanent failure");
                }
                Err(e) if e.is_validation() => {
                    tracing::warn!(task_id = %task_id, error = %e, "Stale failure discarded");
                    summary.discarded += 1;
                }
                Err(e) => return Err(e),
            },
        }

        Ok(())
    }

    /// Detect workers that died without reporting.
    ///
    /// A worker's last act is sending its outcome, so a finished handle
    /// whose outcome is absent after a channel drain can only have
    /// panicked; its task is failed through the normal path.
    fn reap(
        &self,
        outcome_rx: &mut mpsc::Receiver<TaskOutcome>,
        in_flight: &mut HashMap<String, JoinHandle<()>>,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let finished: Vec<String> = in_flight
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        if finished.is_empty() {
            return Ok(());
        }

        while let Ok(outcome) = outcome_rx.try_recv() {
            self.apply_outcome(outcome, in_flight, summary)?;
        }

        for task_id in finished {
            if in_flight.remove(&task_id).is_some() {
                tracing::error!(task_id = %task_id, "Worker task panicked");
                self.apply_outcome(
                    TaskOutcome::Failed {
                        task_id,
                        error: "worker panicked".to_string(),
                    },
                    in_flight,
                    summary,
                )?;
            }
        }
        Ok(())
    }

    /// Persist the final run checkpoint so a restart neither duplicates
    /// nor drops outcomes.
    fn write_checkpoint(&self, summary: &RunSummary) -> Result<()> {
        let checkpoint = Checkpoint {
            summary: *summary,
            finished_at: now_ms(),
        };
        self.queue
            .set_checkpoint(CHECKPOINT_KEY, &serde_json::to_string(&checkpoint)?)
    }
}
