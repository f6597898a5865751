//! Phase pipeline controller.
//!
//! A run walks the fixed phase sequence once. The [`RunContext`] is the only
//! mutable run state; each phase receives it by reference and records what
//! it did in a [`PhaseReport`]. Issue generation retries under a
//! [`RetryPolicy`](crate::core::retry::RetryPolicy); any other phase error
//! fails the run immediately. Records already persisted are never rolled back.

mod phases;

use std::fmt;
use std::path::PathBuf;

use anyhow::{Result, anyhow};
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::core::resolver::{MutualTieBreak, RemovedEdge};
use crate::core::state::{Phase, PipelineState};
use crate::core::types::{Issue, SystemPrompt, TaskBatch, WorkflowKind};
use crate::core::validator::RejectedEdge;
use crate::io::config::PlannerConfig;
use crate::io::prompt::PromptEngine;
use crate::io::repository::RepoCheckout;
use crate::io::store::TaskStore;
use crate::oracle::{Oracle, OracleScope};

/// A phase failed and the run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseFailure {
    pub phase: Phase,
}

impl fmt::Display for PhaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "phase {} failed", self.phase.as_str())
    }
}

impl std::error::Error for PhaseFailure {}

/// What one phase did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub success: bool,
    pub attempts: u32,
    /// Records the store acknowledged.
    pub persisted: usize,
    /// Records the store declined or failed to write.
    pub persistence_failures: usize,
    /// Oracle errors degraded to an empty result.
    pub oracle_fallbacks: usize,
    pub rejected_edges: Vec<RejectedEdge>,
    pub removed_mutual_edges: Vec<RemovedEdge>,
}

impl PhaseReport {
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            success: false,
            attempts: 0,
            persisted: 0,
            persistence_failures: 0,
            oracle_fallbacks: 0,
            rejected_edges: Vec::new(),
            removed_mutual_edges: Vec::new(),
        }
    }
}

/// Pipeline knobs taken from [`PlannerConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub issue_attempts: u32,
    pub tie_break: MutualTieBreak,
    pub workflow: WorkflowKind,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&PlannerConfig::default())
    }
}

impl From<&PlannerConfig> for PipelineConfig {
    fn from(cfg: &PlannerConfig) -> Self {
        Self {
            issue_attempts: cfg.issue_generation_attempts,
            tie_break: cfg.mutual_tie_break,
            workflow: cfg.workflow,
        }
    }
}

/// Single-owner state of one pipeline run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub feature_spec: String,
    pub checkout: RepoCheckout,
    /// Root for per-call oracle artifacts.
    pub run_dir: PathBuf,
    pub state: PipelineState,
    pub issues: Vec<Issue>,
    pub batches: Vec<TaskBatch>,
    pub system_prompt: Option<SystemPrompt>,
    pub reports: Vec<PhaseReport>,
}

impl RunContext {
    pub fn new(
        run_id: impl Into<String>,
        feature_spec: impl Into<String>,
        checkout: RepoCheckout,
        run_dir: PathBuf,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            feature_spec: feature_spec.into(),
            checkout,
            run_dir,
            state: PipelineState::NotStarted,
            issues: Vec::new(),
            batches: Vec::new(),
            system_prompt: None,
            reports: Vec::new(),
        }
    }

    /// Oracle scope for one call, with artifacts under `<run_dir>/<label>`.
    pub fn scope(&self, label: &str) -> OracleScope<'_> {
        OracleScope::new(
            &self.checkout.clone_path,
            &self.feature_spec,
            self.run_dir.join(label),
        )
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            run_id: self.run_id.clone(),
            state: self.state,
            repo_owner: self.checkout.repo_owner.clone(),
            repo_name: self.checkout.repo_name.clone(),
            issues: self.issues.clone(),
            batches: self.batches.clone(),
            system_prompt: self.system_prompt.clone(),
            phases: self.reports.clone(),
        }
    }
}

/// Serializable summary of a run, used as the result envelope payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub state: PipelineState,
    pub repo_owner: String,
    pub repo_name: String,
    pub issues: Vec<Issue>,
    pub batches: Vec<TaskBatch>,
    pub system_prompt: Option<SystemPrompt>,
    pub phases: Vec<PhaseReport>,
}

/// Runs the phases against an oracle and a store.
pub struct Pipeline<'a, O: Oracle, S: TaskStore> {
    oracle: &'a O,
    store: &'a S,
    config: PipelineConfig,
    prompts: PromptEngine,
}

impl<'a, O: Oracle, S: TaskStore> Pipeline<'a, O, S> {
    pub fn new(oracle: &'a O, store: &'a S, config: PipelineConfig) -> Self {
        Self {
            oracle,
            store,
            config,
            prompts: PromptEngine::new(),
        }
    }

    /// Run every phase in order.
    ///
    /// On error `ctx.state` is `Failed` and the error carries a [`PhaseFailure`].
    #[instrument(skip_all, fields(run_id = %ctx.run_id))]
    pub fn run(&self, ctx: &mut RunContext) -> Result<()> {
        for phase in Phase::ALL {
            info!(phase = phase.as_str(), "phase started");
            let mut report = PhaseReport::new(phase);
            let outcome = match phase {
                Phase::IssueGeneration => phases::generate_issues(self, ctx, &mut report),
                Phase::TaskDecomposition => phases::decompose_tasks(self, ctx, &mut report),
                Phase::DependencyResolution => {
                    phases::resolve_dependencies(self, ctx, &mut report)
                }
                Phase::SystemPromptGeneration => {
                    phases::generate_system_prompt(self, ctx, &mut report)
                }
            };
            report.success = outcome.is_ok();
            ctx.reports.push(report);

            if let Err(err) = outcome {
                error!(phase = phase.as_str(), err = %format!("{err:#}"), "phase failed");
                ctx.state = PipelineState::Failed;
                return Err(err.context(PhaseFailure { phase }));
            }
            ctx.state = ctx.state.advance_to(phase.target_state()).map_err(|e| anyhow!(e))?;
            info!(phase = phase.as_str(), state = ?ctx.state, "phase finished");
        }

        ctx.state = ctx
            .state
            .advance_to(PipelineState::Completed)
            .map_err(|e| anyhow!(e))?;
        info!(
            issues = ctx.issues.len(),
            tasks = ctx.batches.iter().map(|b| b.tasks.len()).sum::<usize>(),
            "run completed"
        );
        Ok(())
    }
}
