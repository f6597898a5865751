//! Pipeline state machine.

use serde::Serialize;

/// Progress of one pipeline run. Only moves forward, or to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    NotStarted,
    IssuesGenerated,
    TasksGenerated,
    DependenciesResolved,
    SystemPromptGenerated,
    Completed,
    Failed,
}

impl PipelineState {
    /// The next state on success, or `None` for terminal states.
    pub fn successor(self) -> Option<Self> {
        match self {
            PipelineState::NotStarted => Some(PipelineState::IssuesGenerated),
            PipelineState::IssuesGenerated => Some(PipelineState::TasksGenerated),
            PipelineState::TasksGenerated => Some(PipelineState::DependenciesResolved),
            PipelineState::DependenciesResolved => Some(PipelineState::SystemPromptGenerated),
            PipelineState::SystemPromptGenerated => Some(PipelineState::Completed),
            PipelineState::Completed | PipelineState::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed)
    }

    /// Validate a transition. `Failed` is reachable from every non-terminal state.
    pub fn advance_to(self, next: Self) -> Result<Self, String> {
        if next == PipelineState::Failed && !self.is_terminal() {
            return Ok(next);
        }
        if self.successor() == Some(next) {
            return Ok(next);
        }
        Err(format!("invalid transition {:?} -> {:?}", self, next))
    }
}

/// A stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    IssueGeneration,
    TaskDecomposition,
    DependencyResolution,
    SystemPromptGeneration,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::IssueGeneration,
        Phase::TaskDecomposition,
        Phase::DependencyResolution,
        Phase::SystemPromptGeneration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::IssueGeneration => "issue_generation",
            Phase::TaskDecomposition => "task_decomposition",
            Phase::DependencyResolution => "dependency_resolution",
            Phase::SystemPromptGeneration => "system_prompt_generation",
        }
    }

    /// State the pipeline enters when this phase succeeds.
    pub fn target_state(&self) -> PipelineState {
        match self {
            Phase::IssueGeneration => PipelineState::IssuesGenerated,
            Phase::TaskDecomposition => PipelineState::TasksGenerated,
            Phase::DependencyResolution => PipelineState::DependenciesResolved,
            Phase::SystemPromptGeneration => PipelineState::SystemPromptGenerated,
        }
    }
}
