//! Batch-wide removal of mutual dependency pairs.

use serde::{Deserialize, Serialize};

use super::types::{Task, TaskId};

/// Which direction of a mutual pair survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutualTieBreak {
    /// The task later in the batch keeps its edge, so later work depends on earlier work.
    #[default]
    LaterInBatch,
    /// The task with the lexicographically smaller uuid keeps its edge.
    SmallerId,
}

/// An edge `task -> dependency` removed because `dependency -> task` also existed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovedEdge {
    pub task: TaskId,
    pub dependency: TaskId,
}

/// Remove one direction of every symmetric pair in `tasks`, in batch order.
///
/// Running it again on its own output removes nothing.
pub fn resolve_mutual_edges(tasks: &mut [Task], tie_break: MutualTieBreak) -> Vec<RemovedEdge> {
    let mut removed = Vec::new();

    for index in 0..tasks.len() {
        let task_id = tasks[index].uuid;
        let deps = tasks[index].dependency_tasks.clone();
        for dep in deps {
            let mutual = tasks
                .iter()
                .any(|other| other.uuid == dep && other.depends_on(task_id));
            if !mutual {
                continue;
            }
            let loses = match tie_break {
                MutualTieBreak::LaterInBatch => true,
                MutualTieBreak::SmallerId => task_id.to_string() > dep.to_string(),
            };
            if loses {
                tasks[index].dependency_tasks.retain(|d| *d != dep);
                removed.push(RemovedEdge {
                    task: task_id,
                    dependency: dep,
                });
            }
        }
    }

    removed
}
