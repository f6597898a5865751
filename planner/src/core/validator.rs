//! Incremental dependency validation for one batch of tasks.
//!
//! Proposed edges are tested one at a time in the order the oracle returned
//! them. Accepted edges are inserted immediately, so later proposals are
//! checked against everything accepted before them. The result is greedy and
//! order-dependent, not a globally optimal edge selection.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use super::types::{Task, TaskId};

/// Why a proposed edge was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// The id did not parse as a uuid.
    Malformed,
    SelfDependency,
    /// The id names no task in the current batch.
    UnknownTask,
    Duplicate,
    /// Accepting the edge would close a cycle.
    Cycle,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Rejection::Malformed => "malformed id",
            Rejection::SelfDependency => "self dependency",
            Rejection::UnknownTask => "unknown task",
            Rejection::Duplicate => "duplicate",
            Rejection::Cycle => "would close a cycle",
        };
        f.write_str(text)
    }
}

/// A dropped edge `task -> dependency`, kept for logs and the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedEdge {
    pub task: TaskId,
    /// Raw proposed id, which may not even be a uuid.
    pub dependency: String,
    pub reason: Rejection,
}

/// True if adding `target -> candidate` would create a cycle in `tasks`.
///
/// Walks the graph depth-first from `candidate` along existing dependency
/// edges. `path` holds the nodes on the current DFS stack and starts with
/// `target`, so reaching any node still on the path (in particular the target)
/// signals a cycle. `visited` holds fully explored nodes, which are never
/// expanded twice. Ids without a task in the batch are leaves.
pub fn closes_cycle(tasks: &[Task], target: TaskId, candidate: TaskId) -> bool {
    let mut visited = HashSet::new();
    let mut path = HashSet::from([target]);
    reaches_path(tasks, candidate, &mut visited, &mut path)
}

fn reaches_path(
    tasks: &[Task],
    node: TaskId,
    visited: &mut HashSet<TaskId>,
    path: &mut HashSet<TaskId>,
) -> bool {
    if path.contains(&node) {
        return true;
    }
    if !visited.insert(node) {
        return false;
    }
    let Some(task) = tasks.iter().find(|t| t.uuid == node) else {
        return false;
    };

    path.insert(node);
    for dep in &task.dependency_tasks {
        if reaches_path(tasks, *dep, visited, path) {
            return true;
        }
    }
    path.remove(&node);
    false
}

/// Filter `proposed` dependency ids for `tasks[index]` and insert the survivors.
///
/// Each id is checked in order against the batch as it stands, including
/// edges accepted earlier in this call. Returns every rejected edge.
///
/// # Panics
///
/// Panics if `index` is out of bounds.
pub fn accept_dependencies(
    tasks: &mut [Task],
    index: usize,
    proposed: &[String],
) -> Vec<RejectedEdge> {
    let target = tasks[index].uuid;
    let batch: HashSet<TaskId> = tasks.iter().map(|t| t.uuid).collect();
    let mut rejected = Vec::new();

    for raw in proposed {
        let reason = match raw.parse::<TaskId>() {
            Err(_) => Some(Rejection::Malformed),
            Ok(dep) if dep == target => Some(Rejection::SelfDependency),
            Ok(dep) if !batch.contains(&dep) => Some(Rejection::UnknownTask),
            Ok(dep) if tasks[index].depends_on(dep) => Some(Rejection::Duplicate),
            Ok(dep) if closes_cycle(tasks, target, dep) => Some(Rejection::Cycle),
            Ok(dep) => {
                tasks[index].dependency_tasks.push(dep);
                None
            }
        };
        if let Some(reason) = reason {
            rejected.push(RejectedEdge {
                task: target,
                dependency: raw.clone(),
                reason,
            });
        }
    }

    rejected
}
