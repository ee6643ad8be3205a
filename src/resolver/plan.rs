//! Batch execution planning via Kahn's algorithm.
//!
//! Produces waves of tasks that could run in parallel, honoring
//! prerequisite order. O(V+E); used for the `plan` query only, never on
//! the hot claim path.

use std::collections::{HashMap, VecDeque};

use crate::domain::{DepEdge, TaskRecord, TaskStatus};

/// A batch execution plan over the current non-terminal tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    /// Waves of task ids; every task in wave N only depends on tasks in
    /// earlier waves or on already-completed work.
    pub waves: Vec<Vec<String>>,
    /// Tasks that can never become ready on the current graph (a
    /// prerequisite is failed or cancelled).
    pub unreachable: Vec<String>,
}

impl ExecutionPlan {
    /// Total number of schedulable tasks across all waves.
    pub fn scheduled_count(&self) -> usize {
        self.waves.iter().map(|w| w.len()).sum()
    }
}

/// Compute the execution plan for the given tasks and edges.
///
/// Completed prerequisites are treated as satisfied; terminal tasks are
/// excluded from the waves. Repeatedly removes zero-in-degree nodes;
/// whatever remains when no node has zero in-degree is unreachable.
pub fn execution_plan(tasks: &[TaskRecord], edges: &[DepEdge]) -> ExecutionPlan {
    let status_by_id: HashMap<&str, TaskStatus> =
        tasks.iter().map(|t| (t.id.as_str(), t.status)).collect();

    // Only non-terminal tasks participate in the plan
    let mut in_degree: HashMap<&str, usize> = tasks
        .iter()
        .filter(|t| !t.status.is_terminal())
        .map(|t| (t.id.as_str(), 0))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for edge in edges {
        if !in_degree.contains_key(edge.task_id.as_str()) {
            continue;
        }
        match status_by_id.get(edge.depends_on.as_str()) {
            // Satisfied prerequisite contributes nothing
            Some(status) if status.is_terminal_success() => {}
            // Pending prerequisite inside the plan
            Some(status) if !status.is_terminal() => {
                *in_degree.get_mut(edge.task_id.as_str()).unwrap() += 1;
                dependents
                    .entry(edge.depends_on.as_str())
                    .or_default()
                    .push(edge.task_id.as_str());
            }
            // Failed/cancelled prerequisite, or unknown id: dependent can
            // never be scheduled on this graph
            _ => {
                let deg = in_degree.get_mut(edge.task_id.as_str()).unwrap();
                *deg = deg.saturating_add(usize::MAX / 2);
            }
        }
    }

    let mut waves: Vec<Vec<String>> = Vec::new();
    let mut frontier: VecDeque<&str> = in_degree
        .iter()
        .filter_map(|(id, deg)| if *deg == 0 { Some(*id) } else { None })
        .collect();

    let mut scheduled: usize = 0;
    while !frontier.is_empty() {
        let mut wave: Vec<String> = frontier.iter().map(|id| id.to_string()).collect();
        wave.sort();
        scheduled += wave.len();

        let mut next: VecDeque<&str> = VecDeque::new();
        for id in frontier.drain(..) {
            for &dependent in dependents.get(id).into_iter().flatten() {
                let deg = in_degree.get_mut(dependent).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    next.push_back(dependent);
                }
            }
        }
        waves.push(wave);
        frontier = next;
    }

    let mut unreachable: Vec<String> = Vec::new();
    if scheduled < in_degree.len() {
        let placed: std::collections::HashSet<&str> = waves
            .iter()
            .flatten()
            .map(|s| s.as_str())
            .collect();
        unreachable = in_degree
            .keys()
            .filter(|id| !placed.contains(**id))
            .map(|id| id.to_string())
            .collect();
        unreachable.sort();
    }

    ExecutionPlan { waves, unreachable }
}
