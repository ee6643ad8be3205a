//! TaskStore implementation with SQLite persistence.
//!
//! Each task row carries a handful of indexed columns for queries plus
//! the full record as JSON (`json_data`). Prerequisite edges and audit
//! events live in their own tables. Every compound mutation
//! (submit-with-edges, complete-with-propagation, cancel-with-cascade)
//! runs inside a single transaction so a crash can never leave
//! partially-applied state.

use rusqlite::{Connection, params};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::{DepEdge, DepKind, TaskEvent, TaskRecord, TaskStatus};
use crate::error::{Result, SwarmError};

/// Counts of tasks per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub blocked: usize,
    pub ready: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl QueueStats {
    /// Total tasks across all statuses.
    pub fn total(&self) -> usize {
        self.pending
            + self.blocked
            + self.ready
            + self.running
            + self.completed
            + self.failed
            + self.cancelled
    }
}

/// TaskStore manages task records, dependency edges, and audit events.
pub struct TaskStore {
    /// Base directory for this project's store
    base_dir: PathBuf,

    /// SQLite connection
    db: Connection,
}

impl TaskStore {
    /// Open or create a TaskStore for the given project directory.
    ///
    /// The store is created at `~/.swarmq/<project-hash>/`.
    pub fn open(project_dir: &Path) -> Result<Self> {
        let project_hash = compute_project_hash(project_dir)?;
        let swarmq_dir = dirs::home_dir()
            .ok_or_else(|| SwarmError::Storage("Cannot determine home directory".to_string()))?
            .join(".swarmq")
            .join(&project_hash);

        Self::open_at(&swarmq_dir)
    }

    /// Open or create a TaskStore at the specified directory.
    ///
    /// Useful for testing with custom paths.
    pub fn open_at(base_dir: &Path) -> Result<Self> {
        fs::create_dir_all(base_dir)?;

        let db_path = base_dir.join("swarmq.db");
        let db = Connection::open(&db_path)?;

        // WAL keeps readers off the writer's back; NORMAL sync is durable
        // enough with WAL and much cheaper than FULL.
        db.pragma_update(None, "journal_mode", "WAL")?;
        db.pragma_update(None, "synchronous", "NORMAL")?;

        Self::init_schema(&db)?;

        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            db,
        })
    }

    /// Initialize the SQLite schema.
    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                worker_type TEXT NOT NULL,
                source TEXT NOT NULL,
                status TEXT NOT NULL,
                branch TEXT,
                parent_task TEXT,
                computed_priority REAL NOT NULL,
                not_before INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                json_data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent_task);
            CREATE INDEX IF NOT EXISTS idx_tasks_created ON tasks(created_at);
            CREATE INDEX IF NOT EXISTS idx_tasks_claim ON tasks(status, computed_priority);

            CREATE TABLE IF NOT EXISTS task_deps (
                task_id TEXT NOT NULL,
                depends_on TEXT NOT NULL,
                kind TEXT NOT NULL,
                UNIQUE(task_id, depends_on)
            );

            CREATE INDEX IF NOT EXISTS idx_deps_task ON task_deps(task_id);
            CREATE INDEX IF NOT EXISTS idx_deps_prereq ON task_deps(depends_on);

            CREATE TABLE IF NOT EXISTS task_events (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_task ON task_events(task_id);

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;

        Ok(())
    }

    // ---- row helpers (usable on a connection or an open transaction) ----

    /// Write a record, replacing any existing row with the same id.
    fn put(conn: &Connection, task: &TaskRecord) -> Result<()> {
        let json_data = serde_json::to_string(task)?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO tasks
            (id, worker_type, source, status, branch, parent_task,
             computed_priority, not_before, created_at, updated_at, json_data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                task.id,
                task.worker_type,
                task.source.as_str(),
                task.status.as_str(),
                task.branch,
                task.parent_task,
                task.computed_priority,
                task.not_before,
                task.created_at,
                task.updated_at,
                json_data,
            ],
        )?;

        Ok(())
    }

    /// Read a record by id.
    fn fetch(conn: &Connection, id: &str) -> Result<Option<TaskRecord>> {
        let result = conn.query_row("SELECT json_data FROM tasks WHERE id = ?1", [id], |row| {
            row.get::<_, String>(0)
        });

        match result {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Append an audit event.
    fn record_event(conn: &Connection, event: &TaskEvent) -> Result<()> {
        conn.execute(
            "INSERT INTO task_events (id, task_id, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.id,
                event.task_id,
                event.event_type,
                serde_json::to_string(&event.payload)?,
                event.created_at,
            ],
        )?;
        Ok(())
    }

    /// Count prerequisites of `task_id` that are not terminal-success.
    ///
    /// This is the live readiness check: an edge + status join, never a
    /// cached score.
    fn unmet_count(conn: &Connection, task_id: &str) -> Result<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM task_deps d
             LEFT JOIN tasks t ON t.id = d.depends_on
             WHERE d.task_id = ?1 AND (t.id IS NULL OR t.status != 'completed')",
            [task_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Ids of tasks with an edge pointing at `task_id`.
    fn dependent_ids(conn: &Connection, task_id: &str) -> Result<Vec<String>> {
        let mut stmt =
            conn.prepare("SELECT task_id FROM task_deps WHERE depends_on = ?1 ORDER BY task_id")?;
        let rows = stmt.query_map([task_id], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    fn guard_transition(task: &TaskRecord, to: TaskStatus) -> Result<()> {
        if !task.status.can_transition_to(to) {
            return Err(SwarmError::InvalidTransition {
                task_id: task.id.clone(),
                from: task.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        Ok(())
    }

    // ---- compound atomic mutations ----

    /// Insert a task and its prerequisite edges as one atomic unit.
    ///
    /// Validation (missing prerequisites, cycles) happens in the queue
    /// service before this is called; a duplicate edge still surfaces
    /// here as a constraint error and rolls the whole insert back.
    pub fn insert_task(&mut self, task: &TaskRecord, deps: &[DepEdge]) -> Result<()> {
        let tx = self.db.transaction()?;

        Self::put(&tx, task)?;
        for edge in deps {
            tx.execute(
                "INSERT INTO task_deps (task_id, depends_on, kind) VALUES (?1, ?2, ?3)",
                params![edge.task_id, edge.depends_on, edge.kind.as_str()],
            )?;
        }
        Self::record_event(&tx, &TaskEvent::submitted(&task.id, task.status.as_str()))?;
        if task.status == TaskStatus::Ready {
            Self::record_event(&tx, &TaskEvent::ready(&task.id))?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Add a prerequisite edge between existing tasks, demoting the
    /// dependent back to Blocked when the new prerequisite is unmet.
    ///
    /// Cycle validation happens in the queue service; this only applies
    /// the edge and the status consequence atomically.
    pub fn add_edge(&mut self, edge: &DepEdge, now: i64) -> Result<TaskRecord> {
        let tx = self.db.transaction()?;

        let mut task = Self::fetch(&tx, &edge.task_id)?
            .ok_or_else(|| SwarmError::TaskNotFound(edge.task_id.clone()))?;

        tx.execute(
            "INSERT INTO task_deps (task_id, depends_on, kind) VALUES (?1, ?2, ?3)",
            params![edge.task_id, edge.depends_on, edge.kind.as_str()],
        )?;

        if task.status == TaskStatus::Ready && Self::unmet_count(&tx, &task.id)? > 0 {
            Self::guard_transition(&task, TaskStatus::Blocked)?;
            task.status = TaskStatus::Blocked;
            task.updated_at = now;
            Self::put(&tx, &task)?;
        }

        tx.commit()?;
        Ok(task)
    }

    /// Claim the highest-priority eligible Ready task, transitioning it
    /// to Running.
    ///
    /// The UPDATE is guarded on the expected prior status, so two
    /// callers racing this method can never both observe a claim of the
    /// same task.
    pub fn claim_ready(&mut self, now: i64) -> Result<Option<TaskRecord>> {
        let tx = self.db.transaction()?;

        let claimed = loop {
            let candidate = {
                let mut stmt = tx.prepare(
                    "SELECT json_data FROM tasks
                     WHERE status = 'ready' AND not_before <= ?1
                     ORDER BY computed_priority DESC, created_at ASC, id ASC
                     LIMIT 1",
                )?;
                let mut rows = stmt.query_map([now], |row| row.get::<_, String>(0))?;
                match rows.next() {
                    Some(json) => Some(serde_json::from_str::<TaskRecord>(&json?)?),
                    None => None,
                }
            };

            let Some(mut task) = candidate else {
                break None;
            };

            let affected = tx.execute(
                "UPDATE tasks SET status = 'running' WHERE id = ?1 AND status = 'ready'",
                [&task.id],
            )?;
            if affected == 1 {
                task.status = TaskStatus::Running;
                task.started_at = Some(now);
                task.updated_at = now;
                Self::put(&tx, &task)?;
                Self::record_event(&tx, &TaskEvent::claimed(&task.id))?;
                break Some(task);
            }
            // Guard lost; candidate changed under us. Re-select.
        };

        tx.commit()?;
        Ok(claimed)
    }

    /// Complete a running task and promote any dependents whose
    /// prerequisites are now all satisfied.
    ///
    /// Returns the completed record and the promoted dependents.
    pub fn complete_task(
        &mut self,
        id: &str,
        result: Option<String>,
        now: i64,
    ) -> Result<(TaskRecord, Vec<TaskRecord>)> {
        let tx = self.db.transaction()?;

        let mut task =
            Self::fetch(&tx, id)?.ok_or_else(|| SwarmError::TaskNotFound(id.to_string()))?;
        Self::guard_transition(&task, TaskStatus::Completed)?;

        task.status = TaskStatus::Completed;
        task.result = result;
        task.completed_at = Some(now);
        task.updated_at = now;
        Self::put(&tx, &task)?;
        Self::record_event(&tx, &TaskEvent::completed(id))?;

        // Readiness propagation: O(out-degree), each dependent checked
        // against the live edge + status join.
        let mut promoted = Vec::new();
        for dep_id in Self::dependent_ids(&tx, id)? {
            let Some(mut dependent) = Self::fetch(&tx, &dep_id)? else {
                continue;
            };
            if matches!(dependent.status, TaskStatus::Blocked | TaskStatus::Pending)
                && Self::unmet_count(&tx, &dep_id)? == 0
            {
                dependent.status = TaskStatus::Ready;
                dependent.updated_at = now;
                Self::put(&tx, &dependent)?;
                Self::record_event(&tx, &TaskEvent::ready(&dep_id))?;
                promoted.push(dependent);
            }
        }

        tx.commit()?;
        Ok((task, promoted))
    }

    /// Re-enter a failed attempt into scheduling with a backoff gate.
    ///
    /// The task returns to Ready (or Blocked if a prerequisite has
    /// since been invalidated) with `not_before` holding the backoff
    /// eligibility time.
    pub fn retry_task(
        &mut self,
        id: &str,
        error: &str,
        not_before: i64,
        now: i64,
    ) -> Result<TaskRecord> {
        let tx = self.db.transaction()?;

        let mut task =
            Self::fetch(&tx, id)?.ok_or_else(|| SwarmError::TaskNotFound(id.to_string()))?;
        Self::guard_transition(&task, TaskStatus::Pending)?;

        task.retry_count += 1;
        task.last_error = Some(error.to_string());
        task.not_before = not_before;
        task.started_at = None;
        task.status = if Self::unmet_count(&tx, id)? == 0 {
            TaskStatus::Ready
        } else {
            TaskStatus::Blocked
        };
        task.updated_at = now;
        Self::put(&tx, &task)?;
        Self::record_event(&tx, &TaskEvent::retried(id, task.retry_count, not_before))?;

        tx.commit()?;
        Ok(task)
    }

    /// Mark a running task permanently failed, optionally cascading
    /// cancellation to its transitive dependents.
    pub fn fail_task(
        &mut self,
        id: &str,
        error: &str,
        cascade: bool,
        now: i64,
    ) -> Result<(TaskRecord, Vec<TaskRecord>)> {
        let tx = self.db.transaction()?;

        let mut task =
            Self::fetch(&tx, id)?.ok_or_else(|| SwarmError::TaskNotFound(id.to_string()))?;
        Self::guard_transition(&task, TaskStatus::Failed)?;

        task.status = TaskStatus::Failed;
        task.last_error = Some(error.to_string());
        task.completed_at = Some(now);
        task.updated_at = now;
        Self::put(&tx, &task)?;
        Self::record_event(&tx, &TaskEvent::failed(id, error, task.retry_count))?;

        let cancelled = if cascade {
            Self::cancel_dependents(&tx, id, now)?
        } else {
            Vec::new()
        };

        tx.commit()?;
        Ok((task, cancelled))
    }

    /// Cancel a task and, recursively, every transitive dependent.
    ///
    /// Returns all records that were transitioned to Cancelled. A
    /// Running task is marked cancelled here; the orchestrator observes
    /// the intent and discards the late result.
    pub fn cancel_task(&mut self, id: &str, now: i64) -> Result<Vec<TaskRecord>> {
        let tx = self.db.transaction()?;

        let mut task =
            Self::fetch(&tx, id)?.ok_or_else(|| SwarmError::TaskNotFound(id.to_string()))?;
        Self::guard_transition(&task, TaskStatus::Cancelled)?;

        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(now);
        task.updated_at = now;
        Self::put(&tx, &task)?;
        Self::record_event(&tx, &TaskEvent::cancelled(id, None))?;

        let mut cancelled = vec![task];
        cancelled.extend(Self::cancel_dependents(&tx, id, now)?);

        tx.commit()?;
        Ok(cancelled)
    }

    /// Cancel all transitive dependents of `root` that are not already
    /// terminal. Traversal crosses terminal nodes so dependents further
    /// down are still reached.
    fn cancel_dependents(conn: &Connection, root: &str, now: i64) -> Result<Vec<TaskRecord>> {
        let mut cancelled = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut frontier = Self::dependent_ids(conn, root)?;

        while let Some(id) = frontier.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            frontier.extend(Self::dependent_ids(conn, &id)?);

            let Some(mut task) = Self::fetch(conn, &id)? else {
                continue;
            };
            if task.status.is_terminal() {
                continue;
            }
            task.status = TaskStatus::Cancelled;
            task.completed_at = Some(now);
            task.updated_at = now;
            Self::put(conn, &task)?;
            Self::record_event(conn, &TaskEvent::cancelled(&id, Some(root)))?;
            cancelled.push(task);
        }

        Ok(cancelled)
    }

    /// Promote every Pending/Blocked task whose prerequisites are all
    /// satisfied. Safety net for missed propagation.
    pub fn sweep_promote(&mut self, now: i64) -> Result<Vec<TaskRecord>> {
        let tx = self.db.transaction()?;

        let stalled: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM tasks WHERE status IN ('pending', 'blocked') ORDER BY created_at",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            ids
        };

        let mut promoted = Vec::new();
        for id in stalled {
            if Self::unmet_count(&tx, &id)? == 0 {
                let Some(mut task) = Self::fetch(&tx, &id)? else {
                    continue;
                };
                task.status = TaskStatus::Ready;
                task.updated_at = now;
                Self::put(&tx, &task)?;
                Self::record_event(&tx, &TaskEvent::ready(&id))?;
                promoted.push(task);
            }
        }

        tx.commit()?;
        Ok(promoted)
    }

    /// Requeue tasks left Running by a dead process.
    ///
    /// Their outcome was never reported, so the attempt does not count
    /// against the retry budget.
    pub fn requeue_running(&mut self, now: i64) -> Result<usize> {
        let tx = self.db.transaction()?;

        let orphaned: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM tasks WHERE status = 'running'")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            ids
        };

        let count = orphaned.len();
        for id in orphaned {
            let Some(mut task) = Self::fetch(&tx, &id)? else {
                continue;
            };
            task.status = TaskStatus::Ready;
            task.started_at = None;
            task.updated_at = now;
            Self::put(&tx, &task)?;
            Self::record_event(&tx, &TaskEvent::requeued(&id))?;
        }

        tx.commit()?;
        Ok(count)
    }

    /// Refresh a task's computed priority.
    pub fn update_priority(&mut self, id: &str, value: f64, now: i64) -> Result<()> {
        let mut task =
            Self::fetch(&self.db, id)?.ok_or_else(|| SwarmError::TaskNotFound(id.to_string()))?;
        task.computed_priority = value;
        task.updated_at = now;
        Self::put(&self.db, &task)
    }

    // ---- reads ----

    /// Get a task record by ID.
    pub fn get(&self, id: &str) -> Result<Option<TaskRecord>> {
        Self::fetch(&self.db, id)
    }

    /// List all task records.
    pub fn list_all(&self) -> Result<Vec<TaskRecord>> {
        self.query_records("SELECT json_data FROM tasks ORDER BY created_at, id", &[])
    }

    /// List task records by status.
    pub fn list_by_status(&self, status: TaskStatus) -> Result<Vec<TaskRecord>> {
        self.query_records(
            "SELECT json_data FROM tasks WHERE status = ?1 ORDER BY created_at, id",
            &[&status.as_str()],
        )
    }

    /// List task records by branch tag.
    pub fn list_by_branch(&self, branch: &str) -> Result<Vec<TaskRecord>> {
        self.query_records(
            "SELECT json_data FROM tasks WHERE branch = ?1 ORDER BY created_at, id",
            &[&branch],
        )
    }

    /// List child tasks of a parent.
    pub fn list_children(&self, parent_id: &str) -> Result<Vec<TaskRecord>> {
        self.query_records(
            "SELECT json_data FROM tasks WHERE parent_task = ?1 ORDER BY created_at, id",
            &[&parent_id],
        )
    }

    fn query_records(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<TaskRecord>> {
        let mut stmt = self.db.prepare(sql)?;
        let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(serde_json::from_str(&row?)?);
        }
        Ok(records)
    }

    /// Prerequisite edges of a task.
    pub fn deps_of(&self, task_id: &str) -> Result<Vec<DepEdge>> {
        self.query_edges(
            "SELECT task_id, depends_on, kind FROM task_deps WHERE task_id = ?1",
            &[&task_id],
        )
    }

    /// Edges whose prerequisite is `task_id`.
    pub fn dependents_of(&self, task_id: &str) -> Result<Vec<DepEdge>> {
        self.query_edges(
            "SELECT task_id, depends_on, kind FROM task_deps WHERE depends_on = ?1",
            &[&task_id],
        )
    }

    /// Every edge in the store.
    pub fn all_edges(&self) -> Result<Vec<DepEdge>> {
        self.query_edges("SELECT task_id, depends_on, kind FROM task_deps", &[])
    }

    fn query_edges(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<DepEdge>> {
        let mut stmt = self.db.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut edges = Vec::new();
        for row in rows {
            let (task_id, depends_on, kind) = row?;
            let kind = DepKind::parse(&kind)
                .ok_or_else(|| SwarmError::Storage(format!("bad dep kind: {kind}")))?;
            edges.push(DepEdge {
                task_id,
                depends_on,
                kind,
            });
        }
        Ok(edges)
    }

    /// Count prerequisites of `task_id` that are not yet satisfied.
    pub fn unmet_prereq_count(&self, task_id: &str) -> Result<i64> {
        Self::unmet_count(&self.db, task_id)
    }

    /// Count tasks with the given status.
    pub fn count_by_status(&self, status: TaskStatus) -> Result<usize> {
        let count: i64 = self.db.query_row(
            "SELECT COUNT(*) FROM tasks WHERE status = ?1",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Queue statistics: counts per status.
    pub fn stats(&self) -> Result<QueueStats> {
        let mut stmt = self
            .db
            .prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut stats = QueueStats::default();
        for row in rows {
            let (status, count) = row?;
            let count = count as usize;
            match TaskStatus::parse(&status) {
                Some(TaskStatus::Pending) => stats.pending = count,
                Some(TaskStatus::Blocked) => stats.blocked = count,
                Some(TaskStatus::Ready) => stats.ready = count,
                Some(TaskStatus::Running) => stats.running = count,
                Some(TaskStatus::Completed) => stats.completed = count,
                Some(TaskStatus::Failed) => stats.failed = count,
                Some(TaskStatus::Cancelled) => stats.cancelled = count,
                None => return Err(SwarmError::Storage(format!("bad status: {status}"))),
            }
        }
        Ok(stats)
    }

    /// Earliest `not_before` among Ready tasks still gated by backoff,
    /// or None when every Ready task is immediately eligible (or none
    /// exist).
    pub fn next_eligible_at(&self, now: i64) -> Result<Option<i64>> {
        let result = self.db.query_row(
            "SELECT MIN(not_before) FROM tasks WHERE status = 'ready' AND not_before > ?1",
            [now],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(result)
    }

    /// Audit events for a task, oldest first.
    pub fn events_for(&self, task_id: &str) -> Result<Vec<TaskEvent>> {
        let mut stmt = self.db.prepare(
            "SELECT id, task_id, event_type, payload, created_at
             FROM task_events WHERE task_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map([task_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, task_id, event_type, payload, created_at) = row?;
            events.push(TaskEvent {
                id,
                task_id,
                event_type,
                payload: serde_json::from_str(&payload)?,
                created_at,
            });
        }
        Ok(events)
    }

    /// Write a checkpoint value.
    pub fn meta_set(&mut self, key: &str, value: &str) -> Result<()> {
        self.db.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Read a checkpoint value.
    pub fn meta_get(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .db
            .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            });
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Get the base directory for this store.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

/// Compute a hash of the project directory path for storage isolation.
pub fn compute_project_hash(project_dir: &Path) -> Result<String> {
    let canonical = project_dir.canonicalize()?;

    let path_str = canonical.to_string_lossy();
    let mut hasher = Sha256::new();
    hasher.update(path_str.as_bytes());
    let result = hasher.finalize();

    // Take first 16 chars of hex
    Ok(hex::encode(&result[..8]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskSource;
    use crate::id::now_ms;
    use tempfile::TempDir;

    fn create_temp_store() -> (TaskStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = TaskStore::open_at(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    fn ready_task(summary: &str) -> TaskRecord {
        let mut task = TaskRecord::new(summary, summary, "shell", TaskSource::Human);
        task.status = TaskStatus::Ready;
        task
    }

    #[test]
    fn test_open_creates_database() {
        let temp_dir = TempDir::new().unwrap();
        let _store = TaskStore::open_at(temp_dir.path()).unwrap();
        assert!(temp_dir.path().join("swarmq.db").exists());
    }

    #[test]
    fn test_insert_and_get() {
        let (mut store, _temp) = create_temp_store();

        let task = ready_task("Test task");
        store.insert_task(&task, &[]).unwrap();

        let retrieved = store.get(&task.id).unwrap().unwrap();
        assert_eq!(retrieved, task);
    }

    #[test]
    fn test_get_nonexistent() {
        let (store, _temp) = create_temp_store();
        assert!(store.get("nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_insert_with_deps() {
        let (mut store, _temp) = create_temp_store();

        let a = ready_task("A");
        store.insert_task(&a, &[]).unwrap();

        let mut b = TaskRecord::new("B", "B", "shell", TaskSource::Human);
        b.status = TaskStatus::Blocked;
        let edges = vec![DepEdge::new(&b.id, &a.id, DepKind::Sequential)];
        store.insert_task(&b, &edges).unwrap();

        let deps = store.deps_of(&b.id).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].depends_on, a.id);

        let dependents = store.dependents_of(&a.id).unwrap();
        assert_eq!(dependents.len(), 1);
        assert_eq!(dependents[0].task_id, b.id);
    }

    #[test]
    fn test_duplicate_edge_rejected() {
        let (mut store, _temp) = create_temp_store();

        let a = ready_task("A");
        store.insert_task(&a, &[]).unwrap();

        let mut b = TaskRecord::new("B", "B", "shell", TaskSource::Human);
        b.status = TaskStatus::Blocked;
        let edges = vec![
            DepEdge::new(&b.id, &a.id, DepKind::Sequential),
            DepEdge::new(&b.id, &a.id, DepKind::Sequential),
        ];
        let result = store.insert_task(&b, &edges);
        assert!(result.is_err());

        // Whole insert rolled back, including the task row
        assert!(store.get(&b.id).unwrap().is_none());
    }

    #[test]
    fn test_claim_highest_priority_first() {
        let (mut store, _temp) = create_temp_store();

        let mut low = ready_task("low");
        low.computed_priority = 1.0;
        let mut high = ready_task("high");
        high.computed_priority = 9.0;

        store.insert_task(&low, &[]).unwrap();
        store.insert_task(&high, &[]).unwrap();

        let claimed = store.claim_ready(now_ms()).unwrap().unwrap();
        assert_eq!(claimed.id, high.id);
        assert_eq!(claimed.status, TaskStatus::Running);
        assert!(claimed.started_at.is_some());
    }

    #[test]
    fn test_claim_each_task_once() {
        let (mut store, _temp) = create_temp_store();

        let a = ready_task("A");
        let b = ready_task("B");
        store.insert_task(&a, &[]).unwrap();
        store.insert_task(&b, &[]).unwrap();

        let first = store.claim_ready(now_ms()).unwrap().unwrap();
        let second = store.claim_ready(now_ms()).unwrap().unwrap();
        assert_ne!(first.id, second.id);

        assert!(store.claim_ready(now_ms()).unwrap().is_none());
    }

    #[test]
    fn test_claim_skips_blocked_and_backoff() {
        let (mut store, _temp) = create_temp_store();

        let mut blocked = ready_task("blocked");
        blocked.status = TaskStatus::Blocked;
        store.insert_task(&blocked, &[]).unwrap();

        let now = now_ms();
        let mut gated = ready_task("gated");
        gated.not_before = now + 60_000;
        store.insert_task(&gated, &[]).unwrap();

        assert!(store.claim_ready(now).unwrap().is_none());

        // After the gate passes, the task is claimable
        let claimed = store.claim_ready(now + 61_000).unwrap().unwrap();
        assert_eq!(claimed.id, gated.id);
    }

    #[test]
    fn test_complete_promotes_dependent() {
        let (mut store, _temp) = create_temp_store();

        let mut a = ready_task("A");
        a.status = TaskStatus::Running;
        store.insert_task(&a, &[]).unwrap();

        let mut b = TaskRecord::new("B", "B", "shell", TaskSource::Human);
        b.status = TaskStatus::Blocked;
        store
            .insert_task(&b, &[DepEdge::new(&b.id, &a.id, DepKind::Sequential)])
            .unwrap();

        let (completed, promoted) = store
            .complete_task(&a.id, Some("done".to_string()), now_ms())
            .unwrap();
        assert_eq!(completed.status, TaskStatus::Completed);
        assert_eq!(completed.result, Some("done".to_string()));
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].id, b.id);
        assert_eq!(promoted[0].status, TaskStatus::Ready);
    }

    #[test]
    fn test_complete_leaves_partially_blocked() {
        let (mut store, _temp) = create_temp_store();

        let mut a = ready_task("A");
        a.status = TaskStatus::Running;
        let b = ready_task("B");
        store.insert_task(&a, &[]).unwrap();
        store.insert_task(&b, &[]).unwrap();

        let mut c = TaskRecord::new("C", "C", "shell", TaskSource::Human);
        c.status = TaskStatus::Blocked;
        store
            .insert_task(
                &c,
                &[
                    DepEdge::new(&c.id, &a.id, DepKind::ParallelJoin),
                    DepEdge::new(&c.id, &b.id, DepKind::ParallelJoin),
                ],
            )
            .unwrap();

        // Only A completes; C stays blocked on B
        let (_, promoted) = store.complete_task(&a.id, None, now_ms()).unwrap();
        assert!(promoted.is_empty());
        assert_eq!(
            store.get(&c.id).unwrap().unwrap().status,
            TaskStatus::Blocked
        );
    }

    #[test]
    fn test_complete_requires_running() {
        let (mut store, _temp) = create_temp_store();

        let task = ready_task("A");
        store.insert_task(&task, &[]).unwrap();

        let err = store.complete_task(&task.id, None, now_ms()).unwrap_err();
        assert!(matches!(err, SwarmError::InvalidTransition { .. }));
    }

    #[test]
    fn test_retry_sets_backoff_gate() {
        let (mut store, _temp) = create_temp_store();

        let mut task = ready_task("A");
        task.status = TaskStatus::Running;
        store.insert_task(&task, &[]).unwrap();

        let now = now_ms();
        let retried = store
            .retry_task(&task.id, "transient error", now + 2_000, now)
            .unwrap();
        assert_eq!(retried.status, TaskStatus::Ready);
        assert_eq!(retried.retry_count, 1);
        assert_eq!(retried.not_before, now + 2_000);
        assert_eq!(retried.last_error, Some("transient error".to_string()));
        assert!(retried.started_at.is_none());

        // Not claimable until the gate passes
        assert!(store.claim_ready(now).unwrap().is_none());
        assert!(store.claim_ready(now + 3_000).unwrap().is_some());
    }

    #[test]
    fn test_fail_without_cascade() {
        let (mut store, _temp) = create_temp_store();

        let mut a = ready_task("A");
        a.status = TaskStatus::Running;
        store.insert_task(&a, &[]).unwrap();

        let mut b = TaskRecord::new("B", "B", "shell", TaskSource::Human);
        b.status = TaskStatus::Blocked;
        store
            .insert_task(&b, &[DepEdge::new(&b.id, &a.id, DepKind::Sequential)])
            .unwrap();

        let (failed, cancelled) = store.fail_task(&a.id, "boom", false, now_ms()).unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.last_error, Some("boom".to_string()));
        assert!(cancelled.is_empty());

        // Dependent left blocked pending manual intervention
        assert_eq!(
            store.get(&b.id).unwrap().unwrap().status,
            TaskStatus::Blocked
        );
    }

    #[test]
    fn test_fail_with_cascade() {
        let (mut store, _temp) = create_temp_store();

        let mut a = ready_task("A");
        a.status = TaskStatus::Running;
        store.insert_task(&a, &[]).unwrap();

        let mut b = TaskRecord::new("B", "B", "shell", TaskSource::Human);
        b.status = TaskStatus::Blocked;
        store
            .insert_task(&b, &[DepEdge::new(&b.id, &a.id, DepKind::Sequential)])
            .unwrap();
        let mut c = TaskRecord::new("C", "C", "shell", TaskSource::Human);
        c.status = TaskStatus::Blocked;
        store
            .insert_task(&c, &[DepEdge::new(&c.id, &b.id, DepKind::Sequential)])
            .unwrap();

        let (_, cancelled) = store.fail_task(&a.id, "boom", true, now_ms()).unwrap();
        assert_eq!(cancelled.len(), 2);
        assert_eq!(
            store.get(&b.id).unwrap().unwrap().status,
            TaskStatus::Cancelled
        );
        assert_eq!(
            store.get(&c.id).unwrap().unwrap().status,
            TaskStatus::Cancelled
        );
    }

    #[test]
    fn test_cancel_cascades_transitively() {
        let (mut store, _temp) = create_temp_store();

        let a = ready_task("A");
        store.insert_task(&a, &[]).unwrap();
        let mut b = TaskRecord::new("B", "B", "shell", TaskSource::Human);
        b.status = TaskStatus::Blocked;
        store
            .insert_task(&b, &[DepEdge::new(&b.id, &a.id, DepKind::Sequential)])
            .unwrap();
        let mut c = TaskRecord::new("C", "C", "shell", TaskSource::Human);
        c.status = TaskStatus::Blocked;
        store
            .insert_task(&c, &[DepEdge::new(&c.id, &b.id, DepKind::Sequential)])
            .unwrap();

        let cancelled = store.cancel_task(&a.id, now_ms()).unwrap();
        assert_eq!(cancelled.len(), 3);
        for id in [&a.id, &b.id, &c.id] {
            assert_eq!(
                store.get(id).unwrap().unwrap().status,
                TaskStatus::Cancelled
            );
        }
    }

    #[test]
    fn test_cancel_terminal_rejected() {
        let (mut store, _temp) = create_temp_store();

        let mut task = ready_task("A");
        task.status = TaskStatus::Running;
        store.insert_task(&task, &[]).unwrap();
        store.complete_task(&task.id, None, now_ms()).unwrap();

        let err = store.cancel_task(&task.id, now_ms()).unwrap_err();
        assert!(matches!(err, SwarmError::InvalidTransition { .. }));
    }

    #[test]
    fn test_add_edge_demotes_ready_task() {
        let (mut store, _temp) = create_temp_store();

        let a = ready_task("A");
        let b = ready_task("B");
        store.insert_task(&a, &[]).unwrap();
        store.insert_task(&b, &[]).unwrap();

        let updated = store
            .add_edge(&DepEdge::new(&b.id, &a.id, DepKind::Sequential), now_ms())
            .unwrap();
        assert_eq!(updated.status, TaskStatus::Blocked);
    }

    #[test]
    fn test_add_edge_on_completed_prereq_keeps_ready() {
        let (mut store, _temp) = create_temp_store();

        let mut a = ready_task("A");
        a.status = TaskStatus::Running;
        store.insert_task(&a, &[]).unwrap();
        store.complete_task(&a.id, None, now_ms()).unwrap();

        let b = ready_task("B");
        store.insert_task(&b, &[]).unwrap();

        let updated = store
            .add_edge(&DepEdge::new(&b.id, &a.id, DepKind::Sequential), now_ms())
            .unwrap();
        assert_eq!(updated.status, TaskStatus::Ready);
    }

    #[test]
    fn test_sweep_promotes_stalled_tasks() {
        let (mut store, _temp) = create_temp_store();

        let mut a = ready_task("A");
        a.status = TaskStatus::Running;
        store.insert_task(&a, &[]).unwrap();

        let mut b = TaskRecord::new("B", "B", "shell", TaskSource::Human);
        b.status = TaskStatus::Blocked;
        store
            .insert_task(&b, &[DepEdge::new(&b.id, &a.id, DepKind::Sequential)])
            .unwrap();

        // Simulate missed propagation: complete A through a raw update
        let mut completed = store.get(&a.id).unwrap().unwrap();
        completed.status = TaskStatus::Completed;
        TaskStore::put(&store.db, &completed).unwrap();

        let promoted = store.sweep_promote(now_ms()).unwrap();
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].id, b.id);
        assert_eq!(promoted[0].status, TaskStatus::Ready);
    }

    #[test]
    fn test_requeue_running() {
        let (mut store, _temp) = create_temp_store();

        let mut a = ready_task("A");
        a.status = TaskStatus::Running;
        let mut b = ready_task("B");
        b.status = TaskStatus::Running;
        let c = ready_task("C");
        store.insert_task(&a, &[]).unwrap();
        store.insert_task(&b, &[]).unwrap();
        store.insert_task(&c, &[]).unwrap();

        let requeued = store.requeue_running(now_ms()).unwrap();
        assert_eq!(requeued, 2);
        assert_eq!(store.count_by_status(TaskStatus::Ready).unwrap(), 3);
        assert_eq!(store.count_by_status(TaskStatus::Running).unwrap(), 0);
    }

    #[test]
    fn test_events_recorded_in_order() {
        let (mut store, _temp) = create_temp_store();

        let task = ready_task("A");
        store.insert_task(&task, &[]).unwrap();
        store.claim_ready(now_ms()).unwrap().unwrap();
        store.complete_task(&task.id, None, now_ms()).unwrap();

        let events = store.events_for(&task.id).unwrap();
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            types,
            vec!["task.submitted", "task.ready", "task.claimed", "task.completed"]
        );
    }

    #[test]
    fn test_stats() {
        let (mut store, _temp) = create_temp_store();

        store.insert_task(&ready_task("A"), &[]).unwrap();
        store.insert_task(&ready_task("B"), &[]).unwrap();
        let mut blocked = ready_task("C");
        blocked.status = TaskStatus::Blocked;
        store.insert_task(&blocked, &[]).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.ready, 2);
        assert_eq!(stats.blocked, 1);
        assert_eq!(stats.total(), 3);
    }

    #[test]
    fn test_next_eligible_at() {
        let (mut store, _temp) = create_temp_store();
        let now = now_ms();

        assert_eq!(store.next_eligible_at(now).unwrap(), None);

        let mut gated = ready_task("gated");
        gated.not_before = now + 5_000;
        store.insert_task(&gated, &[]).unwrap();

        assert_eq!(store.next_eligible_at(now).unwrap(), Some(now + 5_000));
        assert_eq!(store.next_eligible_at(now + 6_000).unwrap(), None);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let task = ready_task("Persistent task");

        {
            let mut store = TaskStore::open_at(temp_dir.path()).unwrap();
            store.insert_task(&task, &[]).unwrap();
        }

        {
            let store = TaskStore::open_at(temp_dir.path()).unwrap();
            let all = store.list_all().unwrap();
            assert_eq!(all.len(), 1);
            assert_eq!(all[0].id, task.id);
        }
    }

    #[test]
    fn test_meta_roundtrip() {
        let (mut store, _temp) = create_temp_store();

        assert!(store.meta_get("checkpoint").unwrap().is_none());
        store.meta_set("checkpoint", "{\"outcomes\":5}").unwrap();
        assert_eq!(
            store.meta_get("checkpoint").unwrap(),
            Some("{\"outcomes\":5}".to_string())
        );

        store.meta_set("checkpoint", "{\"outcomes\":6}").unwrap();
        assert_eq!(
            store.meta_get("checkpoint").unwrap(),
            Some("{\"outcomes\":6}".to_string())
        );
    }

    #[test]
    fn test_list_by_branch_and_children() {
        let (mut store, _temp) = create_temp_store();

        let parent = ready_task("parent");
        store.insert_task(&parent, &[]).unwrap();

        let mut child = TaskRecord::new("child", "child", "shell", TaskSource::Decomposition)
            .with_parent(&parent.id)
            .with_branch("feature-x");
        child.status = TaskStatus::Ready;
        store.insert_task(&child, &[]).unwrap();

        let children = store.list_children(&parent.id).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, child.id);

        let branch = store.list_by_branch("feature-x").unwrap();
        assert_eq!(branch.len(), 1);
        assert_eq!(branch[0].id, child.id);
    }

    #[test]
    fn test_compute_project_hash() {
        let temp_dir = TempDir::new().unwrap();
        let hash = compute_project_hash(temp_dir.path()).unwrap();

        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));

        let hash2 = compute_project_hash(temp_dir.path()).unwrap();
        assert_eq!(hash, hash2);
    }
}
