//! `planner run`: one full pipeline run against a repository checkout.

use std::path::PathBuf;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::core::envelope::ResultEnvelope;
use crate::io::config::PlannerConfig;
use crate::io::repository::{RepoGuard, Repository};
use crate::io::run_log::{RunPaths, write_json};
use crate::io::store::TaskStore;
use crate::oracle::Oracle;
use crate::pipeline::{PhaseFailure, Pipeline, PipelineConfig, RunContext, RunReport};

/// What to plan and where.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub repo_url: String,
    pub fork_url: Option<String>,
    pub feature_spec: String,
}

/// Envelope of a finished run and where it was written.
#[derive(Debug)]
pub struct RunOutcome {
    pub envelope: ResultEnvelope<RunReport>,
    pub result_path: PathBuf,
}

/// Sortable run id: UTC timestamp plus a random suffix.
pub fn new_run_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%SZ"), &suffix[..8])
}

/// Set up the repository, run the pipeline and write `result.json`.
///
/// Never returns an error: setup and phase failures become a failed envelope.
/// The checkout is released before this returns, on every path.
#[instrument(skip_all, fields(repo = %request.repo_url))]
pub fn run_planner<R: Repository, O: Oracle, S: TaskStore>(
    cfg: &PlannerConfig,
    repo: &R,
    oracle: &O,
    store: &S,
    request: &RunRequest,
) -> RunOutcome {
    let run_id = new_run_id();
    let paths = RunPaths::new(&cfg.state_dir, &run_id);
    info!(run_id = %run_id, "run started");

    let envelope = match RepoGuard::acquire(repo, &request.repo_url, request.fork_url.as_deref()) {
        Err(err) => {
            warn!(err = %format!("{err:#}"), "repository setup failed");
            ResultEnvelope::failure("repository setup failed", format!("{err:#}"), None)
        }
        Ok(guard) => {
            let mut ctx = RunContext::new(
                run_id.as_str(),
                request.feature_spec.as_str(),
                guard.checkout().clone(),
                paths.dir.clone(),
            );
            let pipeline = Pipeline::new(oracle, store, PipelineConfig::from(cfg));
            match pipeline.run(&mut ctx) {
                Ok(()) => ResultEnvelope::ok("planning completed", ctx.report()),
                Err(err) => {
                    let message = match err.downcast_ref::<PhaseFailure>() {
                        Some(failure) => failure.to_string(),
                        None => "planning failed".to_string(),
                    };
                    ResultEnvelope::failure(message, format!("{err:#}"), Some(ctx.report()))
                }
            }
        }
    };

    if let Err(err) = write_json(&paths.result_path, &envelope) {
        warn!(err = %format!("{err:#}"), "failed to write run result");
    }
    info!(run_id = %run_id, success = envelope.success, "run finished");
    RunOutcome {
        envelope,
        result_path: paths.result_path,
    }
}
