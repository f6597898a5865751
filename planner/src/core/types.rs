//! Entity types shared by the planner core.
//!
//! These types define the contracts between the pipeline phases, the oracle
//! and the store. They carry no I/O and serialize deterministically.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a generated task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters of the uuid, for log lines.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

/// Identifier of a generated issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueId(pub Uuid);

impl IssueId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IssueId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Title and description of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub title: String,
    pub description: String,
}

/// One step an executing agent follows for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseData {
    pub prompt: String,
    pub tools: Vec<String>,
}

/// A unit of generated work.
///
/// `dependency_tasks` keeps acceptance order and never contains duplicates,
/// `uuid` itself, or ids from outside the task's batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub uuid: TaskId,
    pub info: TaskInfo,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub dependency_tasks: Vec<TaskId>,
    #[serde(default)]
    pub phase_data: Vec<PhaseData>,
}

impl Task {
    /// Create a task with a fresh id and no dependencies from an oracle draft.
    pub fn from_draft(draft: TaskDraft) -> Self {
        Self {
            uuid: TaskId::new(),
            info: TaskInfo {
                title: draft.title.trim().to_string(),
                description: draft.description.trim().to_string(),
            },
            tools: draft.tools,
            acceptance_criteria: draft.acceptance_criteria,
            dependency_tasks: Vec::new(),
            phase_data: Vec::new(),
        }
    }

    pub fn depends_on(&self, id: TaskId) -> bool {
        self.dependency_tasks.contains(&id)
    }
}

/// Task proposal returned by the oracle, before an id is assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

/// Issue proposal returned by the oracle, before an id is assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueDraft {
    pub title: String,
    pub description: String,
}

/// Lifecycle of an issue. Transitions past `Initialized` belong to downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    #[default]
    Initialized,
    InProgress,
    Completed,
}

/// A higher-level grouping that tasks are generated under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub uuid: IssueId,
    pub title: String,
    pub description: String,
    pub predecessor_uuid: Option<IssueId>,
    pub status: IssueStatus,
}

impl Issue {
    /// Turn approved drafts into issues linked in approval order.
    ///
    /// The first issue has no predecessor; every later issue points at the one before it.
    pub fn chain(drafts: Vec<IssueDraft>) -> Vec<Issue> {
        let mut issues: Vec<Issue> = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let predecessor_uuid = issues.last().map(|prev| prev.uuid);
            issues.push(Issue {
                uuid: IssueId::new(),
                title: draft.title.trim().to_string(),
                description: draft.description.trim().to_string(),
                predecessor_uuid,
                status: IssueStatus::Initialized,
            });
        }
        issues
    }
}

/// The tasks generated for one issue; dependency edges never leave a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskBatch {
    pub issue_uuid: IssueId,
    pub tasks: Vec<Task>,
}

/// Run-level prompt generated once, after all tasks are final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemPrompt {
    pub prompt: String,
    pub run_id: String,
}

/// Raw dependency proposals keyed by task id, exactly as the oracle returned them.
///
/// Keys and values are unvalidated strings; the validator decides what survives.
pub type DependencyProposal = BTreeMap<String, Vec<String>>;

/// Which family of phase templates finalized tasks receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    #[default]
    BuildFeature,
    DocumentSummarizer,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::BuildFeature => "build_feature",
            WorkflowKind::DocumentSummarizer => "document_summarizer",
        }
    }
}
