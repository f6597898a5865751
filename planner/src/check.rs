//! `planner check`: report (and optionally repair) graph violations in a task batch file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde::Serialize;
use serde_json::Value;

use crate::core::invariants::validate_batch;
use crate::core::resolver::{MutualTieBreak, RemovedEdge, resolve_mutual_edges};
use crate::core::types::{Task, TaskId};
use crate::core::validator::{RejectedEdge, accept_dependencies};

const TASK_BATCH_SCHEMA: &str = include_str!("../schemas/task_batch.schema.json");

/// Result of checking one batch file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub violations: Vec<String>,
    /// Present with `--repair`: the batch after re-validation.
    pub repaired: Option<Vec<Task>>,
    pub rejected_edges: Vec<RejectedEdge>,
    pub removed_mutual_edges: Vec<RemovedEdge>,
    /// Violations the repair could not fix (duplicate ids).
    pub remaining: Vec<String>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// A task read from a batch file. Its dependency ids stay raw strings,
/// since the file may name ids that are not uuids at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedTask {
    /// The task with an empty `dependency_tasks`.
    pub task: Task,
    pub dependencies: Vec<String>,
}

/// Load a JSON array of tasks, checked against the batch schema.
///
/// Task ids must be uuids (format-checked); dependency ids may be any string.
pub fn load_batch(path: &Path) -> Result<Vec<LoadedTask>> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let instance: Value =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    let schema: Value = serde_json::from_str(TASK_BATCH_SCHEMA).context("parse batch schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .should_validate_formats(true)
        .build(&schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(&instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }

    let Value::Array(entries) = instance else {
        bail!("{} is not an array of tasks", path.display());
    };
    entries
        .into_iter()
        .enumerate()
        .map(|(idx, mut entry)| {
            let dependencies = match entry.as_object_mut() {
                Some(obj) => obj.remove("dependency_tasks"),
                None => None,
            };
            let dependencies: Vec<String> = match dependencies {
                Some(deps) => serde_json::from_value(deps)
                    .with_context(|| format!("parse dependencies of task {}", idx + 1))?,
                None => Vec::new(),
            };
            let task: Task = serde_json::from_value(entry)
                .with_context(|| format!("parse task {} in {}", idx + 1, path.display()))?;
            Ok(LoadedTask { task, dependencies })
        })
        .collect()
}

/// Violations of the batch as written: unparsable dependency ids plus every
/// graph invariant over the ids that do parse.
pub fn batch_violations(loaded: &[LoadedTask]) -> Vec<String> {
    let mut malformed = Vec::new();
    let tasks: Vec<Task> = loaded
        .iter()
        .map(|entry| {
            let mut task = entry.task.clone();
            for raw in &entry.dependencies {
                match raw.parse::<TaskId>() {
                    Ok(dep) => task.dependency_tasks.push(dep),
                    Err(_) => malformed.push(format!(
                        "{}: unknown dependency '{}' (not a uuid)",
                        task.uuid, raw
                    )),
                }
            }
            task
        })
        .collect();

    let mut violations = validate_batch(&tasks);
    violations.extend(malformed);
    violations
}

/// Re-run every task's raw dependency ids through the validator in batch
/// order, then remove mutual pairs.
pub fn repair_batch(
    loaded: Vec<LoadedTask>,
    tie_break: MutualTieBreak,
) -> (Vec<Task>, Vec<RejectedEdge>, Vec<RemovedEdge>) {
    let (mut tasks, proposals): (Vec<Task>, Vec<Vec<String>>) = loaded
        .into_iter()
        .map(|entry| (entry.task, entry.dependencies))
        .unzip();

    let mut rejected = Vec::new();
    for (index, proposed) in proposals.iter().enumerate() {
        rejected.extend(accept_dependencies(&mut tasks, index, proposed));
    }
    let removed = resolve_mutual_edges(&mut tasks, tie_break);
    (tasks, rejected, removed)
}

pub fn check_tasks_file(
    path: &Path,
    repair: bool,
    tie_break: MutualTieBreak,
) -> Result<CheckReport> {
    let loaded = load_batch(path)?;
    let violations = batch_violations(&loaded);
    if !repair {
        return Ok(CheckReport {
            violations,
            repaired: None,
            rejected_edges: Vec::new(),
            removed_mutual_edges: Vec::new(),
            remaining: Vec::new(),
        });
    }

    let (repaired, rejected_edges, removed_mutual_edges) = repair_batch(loaded, tie_break);
    let remaining = validate_batch(&repaired);
    Ok(CheckReport {
        violations,
        repaired: Some(repaired),
        rejected_edges,
        removed_mutual_edges,
        remaining,
    })
}
