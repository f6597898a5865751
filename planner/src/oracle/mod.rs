//! Oracle adapter: the external generative model behind every proposal.
//!
//! Oracle answers are untrusted. Implementations only guarantee that an `Ok`
//! value has the right shape; callers still validate ids and graph structure.
//! Shape problems surface as [`MalformedOutput`] so callers can tell them
//! apart from invocation failures.

pub mod agent;

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::core::types::{DependencyProposal, Issue, IssueDraft, Task, TaskBatch, TaskDraft};

pub use agent::AgentOracle;

/// Where and about what one oracle call runs.
#[derive(Debug, Clone)]
pub struct OracleScope<'a> {
    /// Repository checkout the oracle may read.
    pub workdir: &'a Path,
    pub feature_spec: &'a str,
    /// Directory for this call's prompt, schema, output and logs.
    pub artifact_dir: PathBuf,
}

impl<'a> OracleScope<'a> {
    pub fn new(workdir: &'a Path, feature_spec: &'a str, artifact_dir: PathBuf) -> Self {
        Self {
            workdir,
            feature_spec,
            artifact_dir,
        }
    }
}

pub trait Oracle {
    fn propose_issues(&self, scope: &OracleScope<'_>) -> Result<Vec<IssueDraft>>;

    fn propose_tasks(&self, scope: &OracleScope<'_>, issue: &Issue) -> Result<Vec<TaskDraft>>;

    /// Dependency ids keyed by task id. The entry for `target` may be missing.
    fn propose_dependencies(
        &self,
        scope: &OracleScope<'_>,
        target: &Task,
        candidates: &[Task],
    ) -> Result<DependencyProposal>;

    fn propose_system_prompt(
        &self,
        scope: &OracleScope<'_>,
        issues: &[Issue],
        batches: &[TaskBatch],
    ) -> Result<String>;
}

/// The oracle answered, but not in the expected shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedOutput {
    pub call: String,
    pub reason: String,
}

impl fmt::Display for MalformedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed {} answer: {}", self.call, self.reason)
    }
}

impl std::error::Error for MalformedOutput {}

pub fn malformed(call: &str, reason: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(MalformedOutput {
        call: call.to_string(),
        reason: reason.into(),
    })
}

/// True if `err` (or anything in its chain) is a [`MalformedOutput`].
pub fn is_malformed(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<MalformedOutput>().is_some())
}
