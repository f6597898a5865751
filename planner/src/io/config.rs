//! Planner configuration stored under `.planner/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::resolver::MutualTieBreak;
use crate::core::types::WorkflowKind;

/// Default config location, relative to the invocation directory.
pub const DEFAULT_CONFIG_PATH: &str = ".planner/config.toml";

/// Planner configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlannerConfig {
    /// Attempts allowed for issue generation before the run fails.
    pub issue_generation_attempts: u32,

    /// Wall-clock budget for one oracle call, in seconds.
    pub oracle_timeout_secs: u64,

    /// Truncate oracle executor stdout/stderr logs beyond this many bytes.
    pub oracle_output_limit_bytes: usize,

    /// Phase templates given to finalized tasks.
    pub workflow: WorkflowKind,

    /// Which direction of a mutual dependency pair survives.
    pub mutual_tie_break: MutualTieBreak,

    /// Root of the document store and per-run artifacts.
    pub state_dir: PathBuf,

    /// Environment variables that must be set before repository setup.
    pub required_env: Vec<String>,

    pub oracle: OracleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    /// Forwarded to `codex exec` as `model_reasoning_effort`.
    pub reasoning_effort: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            reasoning_effort: "medium".to_string(),
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            issue_generation_attempts: 3,
            oracle_timeout_secs: 10 * 60,
            oracle_output_limit_bytes: 100_000,
            workflow: WorkflowKind::default(),
            mutual_tie_break: MutualTieBreak::default(),
            state_dir: PathBuf::from(".planner"),
            required_env: vec!["GITHUB_TOKEN".to_string(), "GITHUB_USERNAME".to_string()],
            oracle: OracleConfig::default(),
        }
    }
}

impl PlannerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.issue_generation_attempts == 0 {
            return Err(anyhow!("issue_generation_attempts must be > 0"));
        }
        if self.oracle_timeout_secs == 0 {
            return Err(anyhow!("oracle_timeout_secs must be > 0"));
        }
        if self.oracle_output_limit_bytes == 0 {
            return Err(anyhow!("oracle_output_limit_bytes must be > 0"));
        }
        if self.state_dir.as_os_str().is_empty() {
            return Err(anyhow!("state_dir must not be empty"));
        }
        if self.required_env.iter().any(|name| name.trim().is_empty()) {
            return Err(anyhow!("required_env entries must be non-empty"));
        }
        if self.oracle.reasoning_effort.trim().is_empty() {
            return Err(anyhow!("oracle.reasoning_effort must be non-empty"));
        }
        Ok(())
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PlannerConfig::default()`.
pub fn load_config(path: &Path) -> Result<PlannerConfig> {
    if !path.exists() {
        let cfg = PlannerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PlannerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
