//! Structural graph scores for priority calculation.
//!
//! Two metrics per task:
//! - `depth`: length of the longest outgoing prerequisite chain
//! - `dependents`: direct + transitive dependent count ("how many other
//!   tasks wait on this one")
//!
//! Scores are cached per task id and invalidated when an edge touching
//! the task's closure is added or a task completes. The cache feeds
//! priority scoring only; readiness decisions never read it.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::resolver::GraphSnapshot;

/// Structural scores for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GraphScores {
    /// Longest prerequisite chain below this task
    pub depth: usize,
    /// Direct + transitive dependents waiting on this task
    pub dependents: usize,
}

/// Compute the longest prerequisite chain length for `task_id`.
pub fn longest_chain(snapshot: &GraphSnapshot, task_id: &str) -> usize {
    fn walk(snapshot: &GraphSnapshot, node: &str, memo: &mut HashMap<String, usize>) -> usize {
        if let Some(&depth) = memo.get(node) {
            return depth;
        }
        // Mark before recursing so an unexpected cycle terminates
        memo.insert(node.to_string(), 0);
        let depth = snapshot
            .prerequisites(node)
            .map(|dep| walk(snapshot, dep, memo) + 1)
            .max()
            .unwrap_or(0);
        memo.insert(node.to_string(), depth);
        depth
    }
    walk(snapshot, task_id, &mut HashMap::new())
}

/// Count direct + transitive dependents of `task_id`.
pub fn transitive_dependents(snapshot: &GraphSnapshot, task_id: &str) -> usize {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    queue.push_back(task_id);

    while let Some(node) = queue.pop_front() {
        for dependent in snapshot.dependents(node) {
            if seen.insert(dependent.as_str()) {
                queue.push_back(dependent.as_str());
            }
        }
    }

    seen.len()
}

/// Cache of graph scores keyed by task id.
///
/// Entries are advisory: a stale score can only skew a priority value,
/// never a readiness decision.
#[derive(Debug, Default)]
pub struct ScoreCache {
    entries: HashMap<String, GraphScores>,
}

impl ScoreCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the cached scores for a task, computing them on miss.
    pub fn get_or_compute(&mut self, snapshot: &GraphSnapshot, task_id: &str) -> GraphScores {
        if let Some(&scores) = self.entries.get(task_id) {
            return scores;
        }
        let scores = GraphScores {
            depth: longest_chain(snapshot, task_id),
            dependents: transitive_dependents(snapshot, task_id),
        };
        self.entries.insert(task_id.to_string(), scores);
        scores
    }

    /// Invalidate `task_id` and its transitive prerequisite closure.
    ///
    /// Adding an edge below a task changes the dependent counts of every
    /// task it (transitively) depends on, so the whole closure is
    /// dropped.
    pub fn invalidate_closure(&mut self, snapshot: &GraphSnapshot, task_id: &str) {
        self.entries.remove(task_id);
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut seen: HashSet<String> = HashSet::new();
        queue.push_back(task_id.to_string());

        while let Some(node) = queue.pop_front() {
            for dep in snapshot.prerequisites(&node) {
                if seen.insert(dep.clone()) {
                    self.entries.remove(dep);
                    queue.push_back(dep.clone());
                }
            }
        }
    }

    /// Drop every cached entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
