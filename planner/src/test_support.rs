//! Test-only fakes for the oracle, store and repository, plus entity builders.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow, bail};
use chrono::Utc;

use crate::core::types::{
    DependencyProposal, Issue, IssueDraft, IssueId, IssueStatus, PhaseData, Task, TaskBatch,
    TaskDraft, TaskId, WorkflowKind,
};
use crate::io::repository::{RepoCheckout, Repository, SetupFailure};
use crate::io::store::{StoredIssue, StoredSystemPrompt, StoredTask, TaskStore};
use crate::oracle::{Oracle, OracleScope, malformed};

/// Scripted answer for one oracle call.
#[derive(Debug, Clone)]
pub enum Reply<T> {
    Ok(T),
    /// Invocation failure (process error, timeout).
    Fail(String),
    /// Answer with the wrong shape.
    Malformed(String),
}

impl<T> Reply<T> {
    fn into_result(self, call: &str) -> Result<T> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Fail(reason) => Err(anyhow!("{call} oracle call failed: {reason}")),
            Reply::Malformed(reason) => Err(malformed(call, reason)),
        }
    }
}

/// Scripted dependency answer for one target task.
#[derive(Debug, Clone)]
pub enum DependencyReply {
    /// Candidate titles, resolved to their ids. Unknown titles pass through verbatim.
    Titles(Vec<String>),
    /// Raw strings keyed by the target's id.
    Raw(Vec<String>),
    /// Titles keyed by a different task's title.
    KeyedTo { key: String, titles: Vec<String> },
    Fail(String),
    Malformed(String),
}

/// Oracle that replays queued answers and counts calls.
///
/// Issue and system prompt queues fail once exhausted; task queues answer with
/// no tasks; dependency answers default to none for unscripted titles.
#[derive(Default)]
pub struct ScriptedOracle {
    issues: RefCell<VecDeque<Reply<Vec<IssueDraft>>>>,
    tasks: RefCell<VecDeque<Reply<Vec<TaskDraft>>>>,
    dependencies: RefCell<HashMap<String, DependencyReply>>,
    system_prompts: RefCell<VecDeque<Reply<String>>>,
    pub issue_calls: Cell<u32>,
    pub task_calls: Cell<u32>,
    /// Target titles in the order dependencies were requested.
    pub dependency_calls: RefCell<Vec<String>>,
    pub system_prompt_calls: Cell<u32>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_issues(self, reply: Reply<Vec<IssueDraft>>) -> Self {
        self.issues.borrow_mut().push_back(reply);
        self
    }

    pub fn with_tasks(self, reply: Reply<Vec<TaskDraft>>) -> Self {
        self.tasks.borrow_mut().push_back(reply);
        self
    }

    pub fn with_dependencies(self, target_title: &str, reply: DependencyReply) -> Self {
        self.dependencies
            .borrow_mut()
            .insert(target_title.to_string(), reply);
        self
    }

    pub fn with_system_prompt(self, reply: Reply<String>) -> Self {
        self.system_prompts.borrow_mut().push_back(reply);
        self
    }
}

fn bump(counter: &Cell<u32>) {
    counter.set(counter.get() + 1);
}

fn id_for_title(title: &str, target: &Task, candidates: &[Task]) -> String {
    std::iter::once(target)
        .chain(candidates)
        .find(|t| t.info.title == title)
        .map(|t| t.uuid.to_string())
        .unwrap_or_else(|| title.to_string())
}

impl Oracle for ScriptedOracle {
    fn propose_issues(&self, _scope: &OracleScope<'_>) -> Result<Vec<IssueDraft>> {
        bump(&self.issue_calls);
        match self.issues.borrow_mut().pop_front() {
            Some(reply) => reply.into_result("issues"),
            None => bail!("no scripted issue reply"),
        }
    }

    fn propose_tasks(&self, _scope: &OracleScope<'_>, _issue: &Issue) -> Result<Vec<TaskDraft>> {
        bump(&self.task_calls);
        match self.tasks.borrow_mut().pop_front() {
            Some(reply) => reply.into_result("tasks"),
            None => Ok(Vec::new()),
        }
    }

    fn propose_dependencies(
        &self,
        _scope: &OracleScope<'_>,
        target: &Task,
        candidates: &[Task],
    ) -> Result<DependencyProposal> {
        self.dependency_calls
            .borrow_mut()
            .push(target.info.title.clone());
        let reply = self.dependencies.borrow().get(&target.info.title).cloned();
        let resolve = |titles: &[String]| -> Vec<String> {
            titles
                .iter()
                .map(|t| id_for_title(t, target, candidates))
                .collect()
        };

        let mut proposal = DependencyProposal::new();
        match reply {
            None => {}
            Some(DependencyReply::Titles(titles)) => {
                proposal.insert(target.uuid.to_string(), resolve(&titles));
            }
            Some(DependencyReply::Raw(raw)) => {
                proposal.insert(target.uuid.to_string(), raw);
            }
            Some(DependencyReply::KeyedTo { key, titles }) => {
                proposal.insert(id_for_title(&key, target, candidates), resolve(&titles));
            }
            Some(DependencyReply::Fail(reason)) => {
                bail!("dependencies oracle call failed: {reason}")
            }
            Some(DependencyReply::Malformed(reason)) => {
                return Err(malformed("dependencies", reason));
            }
        }
        Ok(proposal)
    }

    fn propose_system_prompt(
        &self,
        _scope: &OracleScope<'_>,
        _issues: &[Issue],
        _batches: &[TaskBatch],
    ) -> Result<String> {
        bump(&self.system_prompt_calls);
        match self.system_prompts.borrow_mut().pop_front() {
            Some(reply) => reply.into_result("system prompt"),
            None => bail!("no scripted system prompt reply"),
        }
    }
}

/// In-memory store. Task titles listed in `decline` are answered with `Ok(false)`,
/// titles in `fail` with an error.
#[derive(Default)]
pub struct MemoryStore {
    pub tasks: RefCell<Vec<StoredTask>>,
    pub issues: RefCell<Vec<StoredIssue>>,
    pub system_prompts: RefCell<Vec<StoredSystemPrompt>>,
    /// Task or issue titles whose inserts are declined.
    pub decline: Vec<String>,
    pub fail: Vec<String>,
    /// Every task title offered to `insert_task`, acknowledged or not.
    pub task_attempts: RefCell<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declining(titles: &[&str]) -> Self {
        Self {
            decline: titles.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn task_titles(&self) -> Vec<String> {
        self.tasks
            .borrow()
            .iter()
            .map(|t| t.task.info.title.clone())
            .collect()
    }
}

impl TaskStore for MemoryStore {
    fn insert_task(&self, task: &StoredTask) -> Result<bool> {
        let title = &task.task.info.title;
        self.task_attempts.borrow_mut().push(title.clone());
        if self.fail.contains(title) {
            bail!("store unavailable for {title}");
        }
        if self.decline.contains(title) {
            return Ok(false);
        }
        self.tasks.borrow_mut().push(task.clone());
        Ok(true)
    }

    fn insert_issue(&self, issue: &StoredIssue) -> Result<bool> {
        if self.decline.contains(&issue.issue.title) {
            return Ok(false);
        }
        self.issues.borrow_mut().push(issue.clone());
        Ok(true)
    }

    fn insert_system_prompt(&self, prompt: &StoredSystemPrompt) -> Result<bool> {
        self.system_prompts.borrow_mut().push(prompt.clone());
        Ok(true)
    }

    fn update_task_phase_data(&self, uuid: TaskId, phases: &[PhaseData]) -> Result<bool> {
        let mut updated = false;
        for stored in self
            .tasks
            .borrow_mut()
            .iter_mut()
            .filter(|t| t.task.uuid == uuid)
        {
            stored.task.phase_data = phases.to_vec();
            stored.updated_at = Utc::now();
            updated = true;
        }
        Ok(updated)
    }

    fn find_task(&self, uuid: TaskId) -> Result<Option<StoredTask>> {
        Ok(self
            .tasks
            .borrow()
            .iter()
            .rev()
            .find(|t| t.task.uuid == uuid)
            .cloned())
    }
}

/// Repository that hands out a fixed path and counts setup and cleanup calls.
pub struct FakeRepository {
    pub clone_path: PathBuf,
    pub fail_setup: bool,
    pub setups: Cell<u32>,
    pub cleanups: Cell<u32>,
}

impl FakeRepository {
    pub fn new(clone_path: &Path) -> Self {
        Self {
            clone_path: clone_path.to_path_buf(),
            fail_setup: false,
            setups: Cell::new(0),
            cleanups: Cell::new(0),
        }
    }

    pub fn failing(clone_path: &Path) -> Self {
        Self {
            fail_setup: true,
            ..Self::new(clone_path)
        }
    }
}

impl Repository for FakeRepository {
    fn setup(&self, url: &str, fork_url: Option<&str>) -> Result<RepoCheckout> {
        bump(&self.setups);
        if self.fail_setup {
            return Err(anyhow::Error::new(SetupFailure {
                reason: "missing environment variables: GITHUB_TOKEN".to_string(),
            }));
        }
        let mut checkout = checkout(&self.clone_path);
        checkout.repo_url = url.to_string();
        checkout.fork_url = fork_url.map(str::to_string);
        Ok(checkout)
    }

    fn cleanup(&self, _checkout: &RepoCheckout) -> Result<()> {
        bump(&self.cleanups);
        Ok(())
    }
}

pub fn checkout(path: &Path) -> RepoCheckout {
    RepoCheckout {
        clone_path: path.to_path_buf(),
        repo_url: "https://github.com/acme/widgets".to_string(),
        repo_owner: "acme".to_string(),
        repo_name: "widgets".to_string(),
        fork_url: None,
        fork_owner: None,
    }
}

pub fn issue_draft(title: &str) -> IssueDraft {
    IssueDraft {
        title: title.to_string(),
        description: format!("{title} description"),
    }
}

pub fn task_draft(title: &str) -> TaskDraft {
    TaskDraft {
        title: title.to_string(),
        description: format!("{title} description"),
        tools: vec!["read_file".to_string()],
        acceptance_criteria: vec![format!("{title} is done")],
    }
}

/// A task with a fresh id and no dependencies.
pub fn task(title: &str) -> Task {
    Task::from_draft(task_draft(title))
}

/// A stored task with deterministic coordinates and no phase data.
pub fn stored_task(title: &str, workflow: WorkflowKind) -> StoredTask {
    let now = Utc::now();
    StoredTask {
        task: task(title),
        issue_uuid: IssueId::new(),
        run_id: "run-test".to_string(),
        repo_owner: "acme".to_string(),
        repo_name: "widgets".to_string(),
        workflow,
        status: IssueStatus::Initialized,
        created_at: now,
        updated_at: now,
    }
}
