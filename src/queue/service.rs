//! QueueService implementation.
//!
//! Writers serialize through the store mutex; every compound mutation
//! is a single store transaction, so a validation failure or crash
//! leaves nothing partially applied. The resolver score cache feeds
//! priority calculation only.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::{DepEdge, DepKind, TaskEvent, TaskRecord, TaskSource, TaskStatus};
use crate::error::{Result, SwarmError};
use crate::id::now_ms;
use crate::queue::{FailurePolicy, QueueConfig};
use crate::resolver::{ExecutionPlan, GraphSnapshot, ScoreCache, execution_plan, find_cycle};
use crate::scheduler::{PriorityInputs, calculate_priority};
use crate::store::{QueueStats, TaskStore};

/// Exponential backoff delay for the given retry attempt.
///
/// `base * 2^retry_count`, capped.
pub fn backoff_delay_ms(base_ms: u64, cap_ms: u64, retry_count: u32) -> u64 {
    base_ms
        .checked_shl(retry_count)
        .unwrap_or(cap_ms)
        .min(cap_ms)
}

/// A validated submission.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub summary: String,
    pub description: String,
    pub worker_type: String,
    pub source: TaskSource,
    pub base_priority: i32,
    pub max_retries: Option<u32>,
    pub depends_on: Vec<String>,
    pub parent_task: Option<String>,
    pub branch: Option<String>,
    pub deadline: Option<i64>,
}

impl SubmitRequest {
    /// Create a request with defaults (human source, priority 5).
    pub fn new(summary: &str, worker_type: &str) -> Self {
        Self {
            summary: summary.to_string(),
            description: summary.to_string(),
            worker_type: worker_type.to_string(),
            source: TaskSource::Human,
            base_priority: 5,
            max_retries: None,
            depends_on: Vec::new(),
            parent_task: None,
            branch: None,
            deadline: None,
        }
    }

    /// Set the full work description.
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Set the origin classification.
    pub fn with_source(mut self, source: TaskSource) -> Self {
        self.source = source;
        self
    }

    /// Set the base priority.
    pub fn with_base_priority(mut self, priority: i32) -> Self {
        self.base_priority = priority;
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Declare prerequisites.
    pub fn with_depends_on<S: AsRef<str>>(mut self, ids: &[S]) -> Self {
        self.depends_on = ids.iter().map(|s| s.as_ref().to_string()).collect();
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

    /// Set a deadline (ms epoch).
    pub fn with_deadline(mut self, deadline: i64) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Outcome of reporting a failure.
#[derive(Debug, Clone)]
pub enum FailDisposition {
    /// Retry budget remains; task re-entered scheduling behind a
    /// backoff gate.
    Retried { task: TaskRecord, not_before: i64 },
    /// Budget spent; task is permanently failed. `cancelled` holds the
    /// dependents cancelled by the cascade policy (empty under
    /// leave-blocked).
    Exhausted {
        task: TaskRecord,
        cancelled: Vec<TaskRecord>,
    },
}

/// Result of a maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Blocked/pending tasks promoted to Ready.
    pub promoted: usize,
    /// Tasks whose computed priority was refreshed.
    pub refreshed: usize,
}

/// The lifecycle authority over the task store.
pub struct QueueService {
    store: Arc<Mutex<TaskStore>>,
    config: QueueConfig,
    /// Worker-type tags accepted at submission; None disables the check.
    known_worker_types: Option<HashSet<String>>,
    scores: Mutex<ScoreCache>,
}

impl QueueService {
    /// Create a service over a shared store.
    pub fn new(store: Arc<Mutex<TaskStore>>) -> Self {
        Self {
            store,
            config: QueueConfig::default(),
            known_worker_types: None,
            scores: Mutex::new(ScoreCache::new()),
        }
    }

    /// Create a service with custom configuration.
    pub fn with_config(store: Arc<Mutex<TaskStore>>, config: QueueConfig) -> Self {
        Self {
            store,
            config,
            known_worker_types: None,
            scores: Mutex::new(ScoreCache::new()),
        }
    }

    /// Restrict submissions to the given worker-type tags.
    ///
    /// Unknown tags are rejected at submission time rather than when a
    /// worker first picks the task up.
    pub fn with_worker_types(mut self, types: HashSet<String>) -> Self {
        self.known_worker_types = Some(types);
        self
    }

    /// Get the shared store handle.
    pub fn store(&self) -> Arc<Mutex<TaskStore>> {
        self.store.clone()
    }

    /// Get the configured failure policy.
    pub fn failure_policy(&self) -> FailurePolicy {
        self.config.failure_policy
    }

    fn lock_store(&self) -> Result<MutexGuard<'_, TaskStore>> {
        self.store
            .lock()
            .map_err(|e| SwarmError::Storage(e.to_string()))
    }

    fn lock_scores(&self) -> Result<MutexGuard<'_, ScoreCache>> {
        self.scores
            .lock()
            .map_err(|e| SwarmError::Storage(e.to_string()))
    }

    // ---- lifecycle operations ----

    /// Validate and persist a submission atomically.
    ///
    /// Errors: `UnknownWorkerType`, `MissingPrerequisite`, or
    /// `CircularDependency` - in every case nothing is persisted.
    pub fn submit(&self, req: SubmitRequest) -> Result<TaskRecord> {
        if let Some(ref known) = self.known_worker_types
            && !known.contains(&req.worker_type)
        {
            return Err(SwarmError::UnknownWorkerType(req.worker_type));
        }

        let mut store = self.lock_store()?;
        let now = now_ms();

        let mut task = TaskRecord::new(&req.summary, &req.description, &req.worker_type, req.source)
            .with_base_priority(req.base_priority)
            .with_max_retries(req.max_retries.unwrap_or(self.config.default_max_retries));
        if let Some(ref parent) = req.parent_task {
            task.parent_task = Some(parent.clone());
        }
        task.branch = req.branch.clone();
        task.deadline = req.deadline;

        // Prerequisites must exist before we touch the graph
        let mut unmet = 0usize;
        let mut dep_ids: Vec<String> = Vec::new();
        for dep_id in &req.depends_on {
            let prereq = store
                .get(dep_id)?
                .ok_or_else(|| SwarmError::MissingPrerequisite {
                    task_id: task.id.clone(),
                    depends_on: dep_id.clone(),
                })?;
            if !dep_ids.contains(dep_id) {
                if !prereq.status.is_terminal_success() {
                    unmet += 1;
                }
                dep_ids.push(dep_id.clone());
            }
        }

        let kind = if dep_ids.len() > 1 {
            DepKind::ParallelJoin
        } else {
            DepKind::Sequential
        };
        let edges: Vec<DepEdge> = dep_ids
            .iter()
            .map(|dep_id| DepEdge::new(&task.id, dep_id, kind))
            .collect();

        // Cycle check over existing edges plus the candidate set
        let mut snapshot = GraphSnapshot::from_edges(&store.all_edges()?);
        for edge in &edges {
            snapshot.add_edge(&edge.task_id, &edge.depends_on);
        }
        if let Some(cycle) = find_cycle(&snapshot, &task.id) {
            return Err(SwarmError::CircularDependency(cycle));
        }

        task.status = if unmet == 0 {
            TaskStatus::Ready
        } else {
            TaskStatus::Blocked
        };
        task.computed_priority =
            calculate_priority(&PriorityInputs::from_task(&task, 0, now));

        store.insert_task(&task, &edges)?;
        tracing::info!(
            task_id = %task.id,
            status = %task.status,
            deps = edges.len(),
            "Task submitted"
        );

        // New edges boost every prerequisite this task waits on
        let mut scores = self.lock_scores()?;
        scores.invalidate_closure(&snapshot, &task.id);
        self.refresh_ancestors(&mut store, &mut scores, &snapshot, &task.id, now)?;

        Ok(task)
    }

    /// Add a prerequisite edge between existing tasks.
    ///
    /// Rejected when either endpoint is missing, the dependent is
    /// already running or terminal, or the edge would close a cycle.
    pub fn add_dependency(&self, task_id: &str, depends_on: &str, kind: DepKind) -> Result<TaskRecord> {
        let mut store = self.lock_store()?;
        let now = now_ms();

        let task = store
            .get(task_id)?
            .ok_or_else(|| SwarmError::TaskNotFound(task_id.to_string()))?;
        store
            .get(depends_on)?
            .ok_or_else(|| SwarmError::MissingPrerequisite {
                task_id: task_id.to_string(),
                depends_on: depends_on.to_string(),
            })?;

        if task.status == TaskStatus::Running || task.status.is_terminal() {
            return Err(SwarmError::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.status.as_str().to_string(),
                to: TaskStatus::Blocked.as_str().to_string(),
            });
        }

        let mut snapshot = GraphSnapshot::from_edges(&store.all_edges()?);
        snapshot.add_edge(task_id, depends_on);
        if let Some(cycle) = find_cycle(&snapshot, task_id) {
            return Err(SwarmError::CircularDependency(cycle));
        }

        let updated = store.add_edge(&DepEdge::new(task_id, depends_on, kind), now)?;
        tracing::info!(task_id = %task_id, depends_on = %depends_on, "Dependency added");

        let mut scores = self.lock_scores()?;
        scores.invalidate_closure(&snapshot, task_id);
        self.refresh_ancestors(&mut store, &mut scores, &snapshot, task_id, now)?;

        Ok(updated)
    }

    /// Claim the highest-priority eligible Ready task.
    ///
    /// Atomic: two concurrent callers never receive the same task.
    pub fn claim_next(&self) -> Result<Option<TaskRecord>> {
        let claimed = self.lock_store()?.claim_ready(now_ms())?;
        if let Some(ref task) = claimed {
            tracing::debug!(task_id = %task.id, priority = task.computed_priority, "Task claimed");
        }
        Ok(claimed)
    }

    /// Complete a running task, promoting dependents whose prerequisites
    /// are now all satisfied. Returns the promoted records.
    pub fn complete(&self, id: &str, result: Option<String>) -> Result<Vec<TaskRecord>> {
        let mut store = self.lock_store()?;
        let now = now_ms();

        let (task, promoted) = store.complete_task(id, result, now)?;
        tracing::info!(task_id = %id, promoted = promoted.len(), "Task completed");

        // Dependency scores shift for everything upstream of the
        // completed task's dependents
        let snapshot = GraphSnapshot::from_edges(&store.all_edges()?);
        let mut scores = self.lock_scores()?;
        scores.invalidate_closure(&snapshot, &task.id);
        for dependent in &promoted {
            self.refresh_priority(&mut store, &mut scores, &snapshot, dependent, now)?;
        }

        Ok(promoted)
    }

    /// Report a failed attempt.
    ///
    /// Under budget the task re-enters scheduling behind an exponential
    /// backoff gate; otherwise it is permanently failed and the
    /// configured dependent policy applies.
    pub fn fail(&self, id: &str, error: &str) -> Result<FailDisposition> {
        let mut store = self.lock_store()?;
        let now = now_ms();

        let task = store
            .get(id)?
            .ok_or_else(|| SwarmError::TaskNotFound(id.to_string()))?;

        if task.can_retry() {
            let delay = backoff_delay_ms(
                self.config.backoff_base_ms,
                self.config.backoff_cap_ms,
                task.retry_count,
            );
            let not_before = now + delay as i64;
            let task = store.retry_task(id, error, not_before, now)?;
            tracing::warn!(
                task_id = %id,
                retry_count = task.retry_count,
                delay_ms = delay,
                error = %error,
                "Task attempt failed, retrying"
            );
            Ok(FailDisposition::Retried { task, not_before })
        } else {
            let cascade = self.config.failure_policy == FailurePolicy::CascadeCancel;
            let (task, cancelled) = store.fail_task(id, error, cascade, now)?;
            tracing::error!(
                task_id = %id,
                retries = task.retry_count,
                cancelled = cancelled.len(),
                error = %error,
                "Task failed permanently"
            );
            Ok(FailDisposition::Exhausted { task, cancelled })
        }
    }

    /// Cancel a task and every transitive dependent.
    pub fn cancel(&self, id: &str) -> Result<Vec<TaskRecord>> {
        let cancelled = self.lock_store()?.cancel_task(id, now_ms())?;
        tracing::info!(task_id = %id, cascade = cancelled.len() - 1, "Task cancelled");
        Ok(cancelled)
    }

    /// Maintenance pass: re-evaluate blocked readiness and refresh
    /// starvation-driven priorities.
    pub fn sweep(&self) -> Result<SweepReport> {
        let mut store = self.lock_store()?;
        let now = now_ms();

        let promoted = store.sweep_promote(now)?;

        let snapshot = GraphSnapshot::from_edges(&store.all_edges()?);
        let mut scores = self.lock_scores()?;
        let mut refreshed = 0usize;
        for status in [TaskStatus::Ready, TaskStatus::Pending, TaskStatus::Blocked] {
            for task in store.list_by_status(status)? {
                self.refresh_priority(&mut store, &mut scores, &snapshot, &task, now)?;
                refreshed += 1;
            }
        }

        if !promoted.is_empty() {
            tracing::info!(promoted = promoted.len(), "Sweep promoted stalled tasks");
        }
        Ok(SweepReport {
            promoted: promoted.len(),
            refreshed,
        })
    }

    /// Requeue tasks left Running by a dead process.
    pub fn requeue_orphaned(&self) -> Result<usize> {
        let count = self.lock_store()?.requeue_running(now_ms())?;
        if count > 0 {
            tracing::warn!(count, "Requeued tasks orphaned by a previous run");
        }
        Ok(count)
    }

    // ---- queries ----

    /// Get a task by id.
    pub fn get(&self, id: &str) -> Result<Option<TaskRecord>> {
        self.lock_store()?.get(id)
    }

    /// List tasks, optionally filtered by status and/or branch.
    pub fn list(&self, status: Option<TaskStatus>, branch: Option<&str>) -> Result<Vec<TaskRecord>> {
        let store = self.lock_store()?;
        let tasks = match status {
            Some(status) => store.list_by_status(status)?,
            None => store.list_all()?,
        };
        Ok(match branch {
            Some(branch) => tasks
                .into_iter()
                .filter(|t| t.branch.as_deref() == Some(branch))
                .collect(),
            None => tasks,
        })
    }

    /// Queue statistics.
    pub fn stats(&self) -> Result<QueueStats> {
        self.lock_store()?.stats()
    }

    /// Batch execution plan over the current graph.
    pub fn plan(&self) -> Result<ExecutionPlan> {
        let store = self.lock_store()?;
        let tasks = store.list_all()?;
        let edges = store.all_edges()?;
        Ok(execution_plan(&tasks, &edges))
    }

    /// Audit trail for a task.
    pub fn events_for(&self, id: &str) -> Result<Vec<TaskEvent>> {
        self.lock_store()?.events_for(id)
    }

    /// Earliest backoff expiry among gated Ready tasks.
    pub fn next_eligible_at(&self) -> Result<Option<i64>> {
        self.lock_store()?.next_eligible_at(now_ms())
    }

    /// Write an orchestrator checkpoint value.
    pub fn set_checkpoint(&self, key: &str, value: &str) -> Result<()> {
        self.lock_store()?.meta_set(key, value)
    }

    /// Read an orchestrator checkpoint value.
    pub fn get_checkpoint(&self, key: &str) -> Result<Option<String>> {
        self.lock_store()?.meta_get(key)
    }

    // ---- priority refresh ----

    fn refresh_priority(
        &self,
        store: &mut TaskStore,
        scores: &mut ScoreCache,
        snapshot: &GraphSnapshot,
        task: &TaskRecord,
        now: i64,
    ) -> Result<()> {
        let graph_scores = scores.get_or_compute(snapshot, &task.id);
        let value = calculate_priority(&PriorityInputs::from_task(
            task,
            graph_scores.dependents,
            now,
        ));
        store.update_priority(&task.id, value, now)
    }

    /// Refresh priorities of every task the given task transitively
    /// depends on - their dependent counts just changed.
    fn refresh_ancestors(
        &self,
        store: &mut TaskStore,
        scores: &mut ScoreCache,
        snapshot: &GraphSnapshot,
        task_id: &str,
        now: i64,
    ) -> Result<()> {
        let mut queue: Vec<String> = snapshot.prerequisites(task_id).cloned().collect();
        let mut seen: HashSet<String> = queue.iter().cloned().collect();

        while let Some(id) = queue.pop() {
            if let Some(task) = store.get(&id)?
                && !task.status.is_terminal()
            {
                self.refresh_priority(store, scores, snapshot, &task, now)?;
            }
            for dep in snapshot.prerequisites(&id) {
                if seen.insert(dep.clone()) {
                    queue.push(dep.clone());
                }
            }
        }
        Ok(())
    }
}
