//! The four pipeline phases.

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use tracing::{debug, info, warn};

use super::{Pipeline, PhaseReport, RunContext};
use crate::core::invariants::validate_batch;
use crate::core::resolver::resolve_mutual_edges;
use crate::core::retry::RetryPolicy;
use crate::core::state::Phase;
use crate::core::types::{
    Issue, IssueDraft, IssueId, IssueStatus, SystemPrompt, Task, TaskBatch, TaskId,
};
use crate::core::validator::accept_dependencies;
use crate::io::store::{StoredIssue, StoredSystemPrompt, StoredTask, TaskStore};
use crate::oracle::{Oracle, is_malformed};

/// Count a store acknowledgement. A declined or failed write is logged and skipped.
/// Returns whether the record was stored.
fn record_write(report: &mut PhaseReport, what: &str, id: &str, result: Result<bool>) -> bool {
    match result {
        Ok(true) => {
            report.persisted += 1;
            true
        }
        Ok(false) => {
            warn!(what, id, "store did not acknowledge write, skipping");
            report.persistence_failures += 1;
            false
        }
        Err(err) => {
            warn!(what, id, err = %format!("{err:#}"), "store write failed, skipping");
            report.persistence_failures += 1;
            false
        }
    }
}

/// Ask for issues until a non-empty answer arrives or the retry bound is hit.
///
/// Answers from failed attempts are dropped. Issues are chained in answer
/// order and written once the phase has succeeded. An issue whose
/// predecessor was not stored keeps the link; the dangling id is logged.
pub(super) fn generate_issues<O: Oracle, S: TaskStore>(
    pipeline: &Pipeline<'_, O, S>,
    ctx: &mut RunContext,
    report: &mut PhaseReport,
) -> Result<()> {
    let policy = RetryPolicy::new(Phase::IssueGeneration, pipeline.config.issue_attempts);
    let (drafts, attempts) = policy.run(|attempt| {
        report.attempts = attempt;
        let scope = ctx.scope(&format!("issues-{attempt}"));
        let result = pipeline.oracle.propose_issues(&scope).and_then(|drafts| {
            let drafts: Vec<IssueDraft> = drafts
                .into_iter()
                .filter(|d| !d.title.trim().is_empty())
                .collect();
            if drafts.is_empty() {
                bail!("oracle proposed no issues");
            }
            Ok(drafts)
        });
        if let Err(err) = &result {
            warn!(attempt, err = %format!("{err:#}"), "issue generation attempt failed");
        }
        result
    })?;
    info!(attempts, issues = drafts.len(), "issues generated");

    ctx.issues = Issue::chain(drafts);
    let now = Utc::now();
    let mut unstored: Option<IssueId> = None;
    for issue in &ctx.issues {
        if let Some(predecessor) = unstored.filter(|id| issue.predecessor_uuid == Some(*id)) {
            warn!(
                issue = %issue.uuid,
                predecessor = %predecessor,
                "predecessor issue was not stored, link is dangling"
            );
        }
        let stored = StoredIssue {
            issue: issue.clone(),
            run_id: ctx.run_id.clone(),
            repo_owner: ctx.checkout.repo_owner.clone(),
            repo_name: ctx.checkout.repo_name.clone(),
            fork_url: ctx.checkout.fork_url.clone(),
            fork_owner: ctx.checkout.fork_owner.clone(),
            created_at: now,
        };
        let result = pipeline.store.insert_issue(&stored);
        if !record_write(report, "issue", &issue.uuid.to_string(), result) {
            unstored = Some(issue.uuid);
        }
    }
    Ok(())
}

/// Decompose every issue into a batch of tasks, in issue order.
///
/// An oracle invocation error aborts the run. A malformed answer leaves the
/// issue with an empty batch.
pub(super) fn decompose_tasks<O: Oracle, S: TaskStore>(
    pipeline: &Pipeline<'_, O, S>,
    ctx: &mut RunContext,
    report: &mut PhaseReport,
) -> Result<()> {
    for index in 0..ctx.issues.len() {
        report.attempts += 1;
        let issue = &ctx.issues[index];
        let scope = ctx.scope(&format!("tasks-{}", index + 1));
        let drafts = match pipeline.oracle.propose_tasks(&scope, issue) {
            Ok(drafts) => drafts,
            Err(err) if is_malformed(&err) => {
                warn!(issue = %issue.title, err = %format!("{err:#}"), "malformed task answer, using no tasks");
                report.oracle_fallbacks += 1;
                Vec::new()
            }
            Err(err) => {
                return Err(err.context(format!("decompose issue '{}'", issue.title)));
            }
        };

        let tasks: Vec<Task> = drafts
            .into_iter()
            .filter(|d| !d.title.trim().is_empty())
            .map(Task::from_draft)
            .collect();
        info!(issue = %issue.title, tasks = tasks.len(), "issue decomposed");
        let batch = TaskBatch {
            issue_uuid: issue.uuid,
            tasks,
        };
        ctx.batches.push(batch);
    }
    Ok(())
}

/// Resolve dependencies batch by batch, then finalize and write each task.
///
/// Per task: ask the oracle, filter through the validator in proposal order.
/// Per batch: remove mutual pairs, render phase data, write every task.
/// Oracle errors degrade to no dependencies for that task.
pub(super) fn resolve_dependencies<O: Oracle, S: TaskStore>(
    pipeline: &Pipeline<'_, O, S>,
    ctx: &mut RunContext,
    report: &mut PhaseReport,
) -> Result<()> {
    for b in 0..ctx.batches.len() {
        let count = ctx.batches[b].tasks.len();
        for i in 0..count {
            report.attempts += 1;
            let proposed = propose_for(pipeline, ctx, b, i, report);
            let rejected = accept_dependencies(&mut ctx.batches[b].tasks, i, &proposed);
            for edge in &rejected {
                warn!(
                    task = %edge.task.short(),
                    dependency = %edge.dependency,
                    reason = %edge.reason,
                    "dependency rejected"
                );
            }
            report.rejected_edges.extend(rejected);
        }

        let removed = resolve_mutual_edges(&mut ctx.batches[b].tasks, pipeline.config.tie_break);
        for edge in &removed {
            warn!(
                task = %edge.task.short(),
                dependency = %edge.dependency.short(),
                "mutual dependency removed"
            );
        }
        report.removed_mutual_edges.extend(removed);

        let violations = validate_batch(&ctx.batches[b].tasks);
        if !violations.is_empty() {
            return Err(anyhow!(
                "dependency graph invariants failed: {}",
                violations.join("; ")
            ));
        }

        finalize_batch(pipeline, ctx, b, report)?;
    }
    Ok(())
}

/// Proposed dependency ids for task `i` of batch `b`, or none if the oracle failed.
fn propose_for<O: Oracle, S: TaskStore>(
    pipeline: &Pipeline<'_, O, S>,
    ctx: &RunContext,
    b: usize,
    i: usize,
    report: &mut PhaseReport,
) -> Vec<String> {
    let batch = &ctx.batches[b];
    let target = &batch.tasks[i];
    let candidates: Vec<Task> = batch
        .tasks
        .iter()
        .filter(|t| t.uuid != target.uuid)
        .cloned()
        .collect();
    let scope = ctx.scope(&format!("dependencies-{}-{}", b + 1, i + 1));

    match pipeline
        .oracle
        .propose_dependencies(&scope, target, &candidates)
    {
        Ok(proposal) => {
            let proposed: Vec<String> = proposal
                .into_iter()
                .filter(|(key, _)| key.parse::<TaskId>().ok() == Some(target.uuid))
                .flat_map(|(_, deps)| deps)
                .collect();
            debug!(task = %target.uuid.short(), proposed = proposed.len(), "dependencies proposed");
            proposed
        }
        Err(err) => {
            warn!(task = %target.uuid.short(), err = %format!("{err:#}"), "dependency proposal failed, using none");
            report.oracle_fallbacks += 1;
            Vec::new()
        }
    }
}

fn finalize_batch<O: Oracle, S: TaskStore>(
    pipeline: &Pipeline<'_, O, S>,
    ctx: &mut RunContext,
    b: usize,
    report: &mut PhaseReport,
) -> Result<()> {
    let issue_uuid = ctx.batches[b].issue_uuid;
    let now = Utc::now();
    for i in 0..ctx.batches[b].tasks.len() {
        let phase_data = pipeline
            .prompts
            .render_phases(pipeline.config.workflow, &ctx.batches[b].tasks[i], None)
            .context("render phase data")?;
        let task = &mut ctx.batches[b].tasks[i];
        task.phase_data = phase_data;

        let stored = StoredTask {
            task: task.clone(),
            issue_uuid,
            run_id: ctx.run_id.clone(),
            repo_owner: ctx.checkout.repo_owner.clone(),
            repo_name: ctx.checkout.repo_name.clone(),
            workflow: pipeline.config.workflow,
            status: IssueStatus::Initialized,
            created_at: now,
            updated_at: now,
        };
        let result = pipeline.store.insert_task(&stored);
        record_write(report, "task", &stored.task.uuid.to_string(), result);
    }
    Ok(())
}

/// One oracle call over every issue and task. Any failure aborts the run.
pub(super) fn generate_system_prompt<O: Oracle, S: TaskStore>(
    pipeline: &Pipeline<'_, O, S>,
    ctx: &mut RunContext,
    report: &mut PhaseReport,
) -> Result<()> {
    report.attempts = 1;
    let scope = ctx.scope("system-prompt");
    let prompt = pipeline
        .oracle
        .propose_system_prompt(&scope, &ctx.issues, &ctx.batches)
        .context("generate system prompt")?;
    let prompt = prompt.trim();
    if prompt.is_empty() {
        bail!("oracle proposed an empty system prompt");
    }

    let system_prompt = SystemPrompt {
        prompt: prompt.to_string(),
        run_id: ctx.run_id.clone(),
    };
    let stored = StoredSystemPrompt {
        system_prompt: system_prompt.clone(),
        repo_owner: ctx.checkout.repo_owner.clone(),
        repo_name: ctx.checkout.repo_name.clone(),
        created_at: Utc::now(),
    };
    let result = pipeline.store.insert_system_prompt(&stored);
    record_write(report, "system prompt", &ctx.run_id, result);
    ctx.system_prompt = Some(system_prompt);
    Ok(())
}
