//! Dependency-ordered task planner.
//!
//! Turns a feature request into issues, tasks with a validated dependency
//! graph, per-task phase data and a shared system prompt, persisted under
//! `.planner/`.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use planner::check::check_tasks_file;
use planner::core::envelope::ResultEnvelope;
use planner::core::types::TaskId;
use planner::exit_codes;
use planner::io::config::{DEFAULT_CONFIG_PATH, PlannerConfig, load_config};
use planner::io::executor::CodexExecutor;
use planner::io::prompt::PromptEngine;
use planner::io::repository::GitRepository;
use planner::io::store::JsonFileStore;
use planner::logging;
use planner::oracle::AgentOracle;
use planner::oracle::agent::AgentOracleConfig;
use planner::regenerate::regenerate_phase_data;
use planner::run::{RunRequest, run_planner};

#[derive(Parser)]
#[command(
    name = "planner",
    version,
    about = "Decompose a feature request into dependency-ordered agent tasks"
)]
struct Cli {
    /// Path to the planner config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan a feature against a repository and persist the result.
    Run {
        /// Repository URL (GitHub).
        #[arg(long)]
        repo: String,
        /// Fork to clone instead of the upstream repository.
        #[arg(long)]
        fork: Option<String>,
        /// File containing the feature request.
        #[arg(long)]
        spec: PathBuf,
    },
    /// Check a JSON array of tasks for cycles, mutual pairs and dangling ids.
    Check {
        tasks: PathBuf,
        /// Re-validate dependencies and print the repaired batch.
        #[arg(long)]
        repair: bool,
    },
    /// Re-render the phase data of one stored task.
    Regenerate {
        #[arg(long)]
        task: TaskId,
        /// Error from the previous attempt, folded into the new phases.
        #[arg(long)]
        error: Option<String>,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;
    match cli.command {
        Command::Run { repo, fork, spec } => cmd_run(&cfg, repo, fork, spec),
        Command::Check { tasks, repair } => cmd_check(&cfg, tasks, repair),
        Command::Regenerate { task, error } => cmd_regenerate(&cfg, task, error),
    }
}

fn cmd_run(cfg: &PlannerConfig, repo: String, fork: Option<String>, spec: PathBuf) -> Result<i32> {
    let feature_spec =
        fs::read_to_string(&spec).with_context(|| format!("read {}", spec.display()))?;
    let store = JsonFileStore::open(&cfg.state_dir)?;
    let repository = GitRepository::new(cfg.required_env.clone(), cfg.oracle_timeout());
    let oracle = AgentOracle::new(
        CodexExecutor {
            reasoning_effort: cfg.oracle.reasoning_effort.clone(),
        },
        AgentOracleConfig {
            timeout: cfg.oracle_timeout(),
            output_limit_bytes: cfg.oracle_output_limit_bytes,
        },
    )?;
    let request = RunRequest {
        repo_url: repo,
        fork_url: fork,
        feature_spec,
    };

    let outcome = run_planner(cfg, &repository, &oracle, &store, &request);
    print_json(&outcome.envelope)?;
    Ok(if outcome.envelope.success {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn cmd_check(cfg: &PlannerConfig, tasks: PathBuf, repair: bool) -> Result<i32> {
    let report = check_tasks_file(&tasks, repair, cfg.mutual_tie_break)?;
    let clean = report.is_clean();
    let envelope = if clean {
        ResultEnvelope::ok("no violations", report)
    } else {
        let error = report.violations.join("; ");
        ResultEnvelope::failure("violations found", error, Some(report))
    };
    print_json(&envelope)?;
    Ok(if clean {
        exit_codes::OK
    } else {
        exit_codes::VIOLATIONS
    })
}

fn cmd_regenerate(cfg: &PlannerConfig, task: TaskId, error: Option<String>) -> Result<i32> {
    let store = JsonFileStore::open(&cfg.state_dir)?;
    let envelope = regenerate_phase_data(&store, &PromptEngine::new(), task, error.as_deref())?;
    print_json(&envelope)?;
    Ok(if envelope.success {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
