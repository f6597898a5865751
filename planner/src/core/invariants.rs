//! Batch invariants checked after dependency resolution and by `planner check`.

use std::collections::{HashMap, HashSet};

use super::types::{Task, TaskId};

/// Check a batch of tasks for graph invariant violations:
/// - No duplicate task ids
/// - No task depends on itself
/// - Every dependency names a task in the batch
/// - No mutual pair `A -> B`, `B -> A`
/// - No cycle
pub fn validate_batch(tasks: &[Task]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for task in tasks {
        if !seen.insert(task.uuid) {
            errors.push(format!("duplicate id '{}'", task.uuid));
        }
    }

    for task in tasks {
        for dep in &task.dependency_tasks {
            if *dep == task.uuid {
                errors.push(format!("{}: depends on itself", task.uuid));
            } else if !seen.contains(dep) {
                errors.push(format!("{}: unknown dependency '{}'", task.uuid, dep));
            }
        }
    }

    let by_id: HashMap<TaskId, &Task> = tasks.iter().map(|t| (t.uuid, t)).collect();
    for task in tasks {
        for dep in &task.dependency_tasks {
            let Some(other) = by_id.get(dep) else {
                continue;
            };
            if task.uuid < *dep && other.depends_on(task.uuid) {
                errors.push(format!("{} and {}: mutual dependency", task.uuid, dep));
            }
        }
    }

    if let Some(cycle) = find_cycle(tasks) {
        let path: Vec<String> = cycle.iter().map(TaskId::short).collect();
        errors.push(format!("cycle: {}", path.join(" -> ")));
    }

    errors
}

/// Return one cycle as a list of ids (first id repeated at the end), if any.
///
/// Self loops count; dangling ids are ignored.
pub fn find_cycle(tasks: &[Task]) -> Option<Vec<TaskId>> {
    let by_id: HashMap<TaskId, &Task> = tasks.iter().map(|t| (t.uuid, t)).collect();
    let mut done = HashSet::new();
    let mut stack = Vec::new();

    for task in tasks {
        if let Some(cycle) = visit(task.uuid, &by_id, &mut done, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

fn visit(
    node: TaskId,
    by_id: &HashMap<TaskId, &Task>,
    done: &mut HashSet<TaskId>,
    stack: &mut Vec<TaskId>,
) -> Option<Vec<TaskId>> {
    if let Some(pos) = stack.iter().position(|id| *id == node) {
        let mut cycle = stack[pos..].to_vec();
        cycle.push(node);
        return Some(cycle);
    }
    if done.contains(&node) {
        return None;
    }
    let task = by_id.get(&node)?;

    stack.push(node);
    for dep in &task.dependency_tasks {
        if let Some(cycle) = visit(*dep, by_id, done, stack) {
            return Some(cycle);
        }
    }
    stack.pop();
    done.insert(node);
    None
}
