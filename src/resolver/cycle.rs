//! Cycle detection over the prerequisite graph.
//!
//! Runs at submission/edge-add time only, over the candidate task's
//! transitive neighborhood. A back-edge into an in-progress node means
//! the candidate edge would close a cycle; the offending path is
//! returned so validation errors can name it.

use std::collections::HashMap;

use crate::resolver::GraphSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// Not yet visited
    White,
    /// On the current DFS path
    Gray,
    /// Fully explored
    Black,
}

/// Search for a cycle reachable from `start`.
///
/// Returns the cycle path (first node repeated at the end) or None when
/// the neighborhood is acyclic. Because edges are only ever added with
/// `start` as the dependent, any cycle the new edges could introduce
/// must pass through `start`, so the traversal is bounded by its
/// transitive prerequisite closure rather than the whole graph.
pub fn find_cycle(snapshot: &GraphSnapshot, start: &str) -> Option<Vec<String>> {
    let mut colors: HashMap<String, Color> = HashMap::new();
    let mut path: Vec<String> = Vec::new();
    dfs(snapshot, start, &mut colors, &mut path)
}

fn dfs(
    snapshot: &GraphSnapshot,
    node: &str,
    colors: &mut HashMap<String, Color>,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    colors.insert(node.to_string(), Color::Gray);
    path.push(node.to_string());

    for dep in snapshot.prerequisites(node) {
        match colors.get(dep.as_str()).copied().unwrap_or(Color::White) {
            Color::Gray => {
                // Back-edge: extract the cycle from the current path
                let pos = path.iter().position(|n| n == dep).unwrap_or(0);
                let mut cycle: Vec<String> = path[pos..].to_vec();
                cycle.push(dep.clone());
                return Some(cycle);
            }
            Color::White => {
                if let Some(cycle) = dfs(snapshot, dep, colors, path) {
                    return Some(cycle);
                }
            }
            Color::Black => {}
        }
    }

    colors.insert(node.to_string(), Color::Black);
    path.pop();
    None
}
