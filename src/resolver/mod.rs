//! Dependency resolver: pure graph algorithms over prerequisite edges.
//!
//! This module provides:
//! - **Cycle detection**: three-color DFS run at submission/edge-add time.
//! - **Graph scores**: longest prerequisite chain and transitive dependent
//!   counts, cached per task id.
//! - **Execution plan**: Kahn's algorithm producing parallel waves, used
//!   only for batch plan queries, never on the claim path.
//!
//! Readiness itself is deliberately NOT computed here from cached state:
//! the store derives it live from the edge + status join so that cache
//! staleness can never produce an incorrect readiness decision.

mod cycle;
mod plan;
mod scores;

pub use cycle::find_cycle;
pub use plan::{ExecutionPlan, execution_plan};
pub use scores::{GraphScores, ScoreCache};

use std::collections::{HashMap, HashSet};

use crate::domain::DepEdge;

/// Id-indexed adjacency over the prerequisite edge set.
///
/// - `forward`: task -> tasks it depends on (its prerequisites)
/// - `reverse`: task -> tasks that depend on it (its dependents)
///
/// Both maps are kept in sync; traversals are index-based so cycle
/// checks and scoring never chase object references.
#[derive(Debug, Default)]
pub struct GraphSnapshot {
    forward: HashMap<String, HashSet<String>>,
    reverse: HashMap<String, HashSet<String>>,
}

impl GraphSnapshot {
    /// Build a snapshot from a flat edge list.
    pub fn from_edges(edges: &[DepEdge]) -> Self {
        let mut snapshot = Self::default();
        for edge in edges {
            snapshot.add_edge(&edge.task_id, &edge.depends_on);
        }
        snapshot
    }

    /// Add a single edge: `task_id` depends on `depends_on`.
    pub fn add_edge(&mut self, task_id: &str, depends_on: &str) {
        self.forward
            .entry(task_id.to_string())
            .or_default()
            .insert(depends_on.to_string());
        self.reverse
            .entry(depends_on.to_string())
            .or_default()
            .insert(task_id.to_string());
    }

    /// Prerequisites of a task.
    pub fn prerequisites(&self, task_id: &str) -> impl Iterator<Item = &String> {
        self.forward.get(task_id).into_iter().flatten()
    }

    /// Direct dependents of a task.
    pub fn dependents(&self, task_id: &str) -> impl Iterator<Item = &String> {
        self.reverse.get(task_id).into_iter().flatten()
    }

    /// Whether a task has any prerequisites in the snapshot.
    pub fn has_prerequisites(&self, task_id: &str) -> bool {
        self.forward.get(task_id).is_some_and(|deps| !deps.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DepKind;

    #[test]
    fn test_snapshot_from_edges() {
        let edges = vec![
            DepEdge::new("b", "a", DepKind::Sequential),
            DepEdge::new("c", "a", DepKind::ParallelJoin),
            DepEdge::new("c", "b", DepKind::ParallelJoin),
        ];
        let snapshot = GraphSnapshot::from_edges(&edges);

        assert!(snapshot.has_prerequisites("b"));
        assert!(snapshot.has_prerequisites("c"));
        assert!(!snapshot.has_prerequisites("a"));

        let deps_of_c: Vec<&String> = snapshot.prerequisites("c").collect();
        assert_eq!(deps_of_c.len(), 2);

        let dependents_of_a: Vec<&String> = snapshot.dependents("a").collect();
        assert_eq!(dependents_of_a.len(), 2);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = GraphSnapshot::from_edges(&[]);
        assert!(!snapshot.has_prerequisites("anything"));
        assert_eq!(snapshot.dependents("anything").count(), 0);
    }
}
