//! `planner regenerate`: rebuild one stored task's phase data.
//!
//! This is the only path that changes a task after it was written.

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::envelope::ResultEnvelope;
use crate::core::types::{PhaseData, TaskId};
use crate::io::prompt::PromptEngine;
use crate::io::store::TaskStore;

/// Re-render phase data for `task_id` with its stored workflow and write it back.
///
/// `previous_error` is folded into the new steps where the workflow has a fix step.
/// Store errors propagate; a missing task or a declined write is a failed envelope.
#[instrument(skip_all, fields(task = %task_id.short()))]
pub fn regenerate_phase_data<S: TaskStore>(
    store: &S,
    prompts: &PromptEngine,
    task_id: TaskId,
    previous_error: Option<&str>,
) -> Result<ResultEnvelope<Vec<PhaseData>>> {
    let Some(stored) = store.find_task(task_id)? else {
        warn!("task not found");
        return Ok(ResultEnvelope::failure(
            "phase data not regenerated",
            format!("task {task_id} not found"),
            None,
        ));
    };

    let phases = prompts.render_phases(stored.workflow, &stored.task, previous_error)?;
    if !store.update_task_phase_data(task_id, &phases)? {
        warn!("store did not acknowledge phase data update");
        return Ok(ResultEnvelope::failure(
            "phase data not regenerated",
            format!("store did not acknowledge update of task {task_id}"),
            Some(phases),
        ));
    }

    info!(phases = phases.len(), "phase data regenerated");
    Ok(ResultEnvelope::ok("phase data regenerated", phases))
}
