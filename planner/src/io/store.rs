//! Persistence sink for finalized tasks, issues and system prompts.
//!
//! Every write returns an acknowledgement flag. `Ok(false)` means the store
//! declined the record; callers log it and move on. Nothing deduplicates, so
//! retried inserts may store the same record twice.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::types::{
    Issue, IssueId, IssueStatus, PhaseData, SystemPrompt, Task, TaskId, WorkflowKind,
};

/// A task document with its run and repository coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTask {
    #[serde(flatten)]
    pub task: Task,
    pub issue_uuid: IssueId,
    pub run_id: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub workflow: WorkflowKind,
    pub status: IssueStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An issue document with its run, repository and fork coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredIssue {
    #[serde(flatten)]
    pub issue: Issue,
    pub run_id: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub fork_url: Option<String>,
    pub fork_owner: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSystemPrompt {
    #[serde(flatten)]
    pub system_prompt: SystemPrompt,
    pub repo_owner: String,
    pub repo_name: String,
    pub created_at: DateTime<Utc>,
}

/// Durable document store used by the pipeline and the regeneration flow.
pub trait TaskStore {
    fn insert_task(&self, task: &StoredTask) -> Result<bool>;
    fn insert_issue(&self, issue: &StoredIssue) -> Result<bool>;
    fn insert_system_prompt(&self, prompt: &StoredSystemPrompt) -> Result<bool>;
    /// Replace `phase_data` of every stored copy of `uuid`. `Ok(false)` if none exists.
    fn update_task_phase_data(&self, uuid: TaskId, phases: &[PhaseData]) -> Result<bool>;
    /// Most recently inserted copy of `uuid`, if any.
    fn find_task(&self, uuid: TaskId) -> Result<Option<StoredTask>>;
}

/// Document store backed by one JSON Lines file per collection.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open (creating if needed) the store under `<state_dir>/store/`.
    pub fn open(state_dir: &Path) -> Result<Self> {
        let dir = state_dir.join("store");
        fs::create_dir_all(&dir).with_context(|| format!("create store {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn tasks_path(&self) -> PathBuf {
        self.dir.join("tasks.jsonl")
    }

    pub fn issues_path(&self) -> PathBuf {
        self.dir.join("issues.jsonl")
    }

    pub fn system_prompts_path(&self) -> PathBuf {
        self.dir.join("system_prompts.jsonl")
    }

    pub fn load_tasks(&self) -> Result<Vec<StoredTask>> {
        read_lines(&self.tasks_path())
    }
}

impl TaskStore for JsonFileStore {
    #[instrument(skip_all, fields(task = %task.task.uuid.short()))]
    fn insert_task(&self, task: &StoredTask) -> Result<bool> {
        append_line(&self.tasks_path(), task)?;
        Ok(true)
    }

    #[instrument(skip_all, fields(issue = %issue.issue.uuid))]
    fn insert_issue(&self, issue: &StoredIssue) -> Result<bool> {
        append_line(&self.issues_path(), issue)?;
        Ok(true)
    }

    #[instrument(skip_all, fields(run_id = %prompt.system_prompt.run_id))]
    fn insert_system_prompt(&self, prompt: &StoredSystemPrompt) -> Result<bool> {
        append_line(&self.system_prompts_path(), prompt)?;
        Ok(true)
    }

    #[instrument(skip_all, fields(task = %uuid.short()))]
    fn update_task_phase_data(&self, uuid: TaskId, phases: &[PhaseData]) -> Result<bool> {
        let mut tasks = self.load_tasks()?;
        let now = Utc::now();
        let mut updated = 0usize;
        for stored in tasks.iter_mut().filter(|t| t.task.uuid == uuid) {
            stored.task.phase_data = phases.to_vec();
            stored.updated_at = now;
            updated += 1;
        }
        if updated == 0 {
            return Ok(false);
        }

        let mut buf = String::new();
        for stored in &tasks {
            buf.push_str(&serde_json::to_string(stored).context("serialize stored task")?);
            buf.push('\n');
        }
        write_atomic(&self.tasks_path(), &buf)?;
        debug!(updated, "updated task phase data");
        Ok(true)
    }

    fn find_task(&self, uuid: TaskId) -> Result<Option<StoredTask>> {
        let tasks = self.load_tasks()?;
        Ok(tasks.into_iter().rev().find(|t| t.task.uuid == uuid))
    }
}

fn append_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut line = serde_json::to_string(value).context("serialize record")?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append {}", path.display()))
}

fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("parse {} line {}", path.display(), idx + 1))
        })
        .collect()
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp_path = path.with_extension("jsonl.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp store {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace store {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskDraft;

    fn stored(title: &str) -> StoredTask {
        let now = Utc::now();
        StoredTask {
            task: Task::from_draft(TaskDraft {
                title: title.to_string(),
                description: "desc".to_string(),
                tools: Vec::new(),
                acceptance_criteria: Vec::new(),
            }),
            issue_uuid: IssueId::new(),
            run_id: "run-1".to_string(),
            repo_owner: "acme".to_string(),
            repo_name: "widgets".to_string(),
            workflow: WorkflowKind::BuildFeature,
            status: IssueStatus::Initialized,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn inserted_task_can_be_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::open(temp.path()).expect("open");
        let task = stored("first");

        assert!(store.insert_task(&task).expect("insert"));
        let found = store.find_task(task.task.uuid).expect("find");

        assert_eq!(found, Some(task));
        assert!(temp.path().join("store/tasks.jsonl").is_file());
    }

    /// Inserts carry no idempotency key; a repeated insert stores two lines.
    #[test]
    fn repeated_insert_duplicates_the_record() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::open(temp.path()).expect("open");
        let task = stored("dup");

        store.insert_task(&task).expect("insert");
        store.insert_task(&task).expect("insert again");

        assert_eq!(store.load_tasks().expect("load").len(), 2);
    }

    #[test]
    fn update_phase_data_rewrites_matching_task_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::open(temp.path()).expect("open");
        let target = stored("target");
        let other = stored("other");
        store.insert_task(&target).expect("insert");
        store.insert_task(&other).expect("insert");
        let phases = vec![PhaseData {
            prompt: "do it".to_string(),
            tools: vec!["read_file".to_string()],
        }];

        assert!(
            store
                .update_task_phase_data(target.task.uuid, &phases)
                .expect("update")
        );

        let found = store
            .find_task(target.task.uuid)
            .expect("find")
            .expect("present");
        assert_eq!(found.task.phase_data, phases);
        let untouched = store
            .find_task(other.task.uuid)
            .expect("find")
            .expect("present");
        assert!(untouched.task.phase_data.is_empty());
    }

    #[test]
    fn update_unknown_task_is_not_acknowledged() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::open(temp.path()).expect("open");

        let acked = store
            .update_task_phase_data(TaskId::new(), &[])
            .expect("update");

        assert!(!acked);
        assert!(!store.tasks_path().exists());
    }
}
