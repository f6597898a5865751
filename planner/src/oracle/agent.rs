//! Oracle backed by an [`Executor`] writing schema-constrained JSON answers.

use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Validator, validator_for};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{Oracle, OracleScope, malformed};
use crate::core::types::{DependencyProposal, Issue, IssueDraft, Task, TaskBatch, TaskDraft};
use crate::io::executor::{ExecRequest, Executor};
use crate::io::prompt::PromptEngine;
use crate::io::run_log::{CallPaths, write_text};

const ISSUES_SCHEMA: &str = include_str!("../../schemas/issues.schema.json");
const TASKS_SCHEMA: &str = include_str!("../../schemas/tasks.schema.json");
const DEPENDENCIES_SCHEMA: &str = include_str!("../../schemas/dependencies.schema.json");
const SYSTEM_PROMPT_SCHEMA: &str = include_str!("../../schemas/system_prompt.schema.json");

#[derive(Debug, Deserialize)]
struct IssuesAnswer {
    issues: Vec<IssueDraft>,
}

#[derive(Debug, Deserialize)]
struct TasksAnswer {
    tasks: Vec<TaskDraft>,
}

#[derive(Debug, Deserialize)]
struct DependencyEntry {
    task_uuid: String,
    depends_on: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DependenciesAnswer {
    dependencies: Vec<DependencyEntry>,
}

#[derive(Debug, Deserialize)]
struct SystemPromptAnswer {
    prompt: String,
}

/// A JSON Schema kept both as text (handed to the executor) and compiled.
struct AnswerSchema {
    source: &'static str,
    validator: Validator,
}

impl AnswerSchema {
    fn compile(name: &str, source: &'static str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(source).with_context(|| format!("parse {name} schema"))?;
        let validator =
            validator_for(&value).map_err(|err| anyhow!("invalid {name} schema: {err}"))?;
        Ok(Self { source, validator })
    }

    fn check(&self, call: &str, answer: &Value) -> Result<()> {
        if self.validator.is_valid(answer) {
            return Ok(());
        }
        let messages = self
            .validator
            .iter_errors(answer)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        Err(malformed(call, messages.join("; ")))
    }
}

/// Configuration for oracle calls.
#[derive(Debug, Clone)]
pub struct AgentOracleConfig {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Oracle that renders a prompt, runs the executor and validates its JSON answer.
pub struct AgentOracle<E: Executor> {
    executor: E,
    prompts: PromptEngine,
    config: AgentOracleConfig,
    issues: AnswerSchema,
    tasks: AnswerSchema,
    dependencies: AnswerSchema,
    system_prompt: AnswerSchema,
}

impl<E: Executor> AgentOracle<E> {
    pub fn new(executor: E, config: AgentOracleConfig) -> Result<Self> {
        Ok(Self {
            executor,
            prompts: PromptEngine::new(),
            config,
            issues: AnswerSchema::compile("issues", ISSUES_SCHEMA)?,
            tasks: AnswerSchema::compile("tasks", TASKS_SCHEMA)?,
            dependencies: AnswerSchema::compile("dependencies", DEPENDENCIES_SCHEMA)?,
            system_prompt: AnswerSchema::compile("system prompt", SYSTEM_PROMPT_SCHEMA)?,
        })
    }

    /// Run one call and decode its answer.
    ///
    /// Executor errors are returned as-is. A missing, unparsable or
    /// schema-violating answer is a `MalformedOutput`.
    #[instrument(skip_all, fields(call = %call, dir = %scope.artifact_dir.display()))]
    fn invoke<T: DeserializeOwned>(
        &self,
        scope: &OracleScope<'_>,
        call: &str,
        prompt: String,
        schema: &AnswerSchema,
    ) -> Result<T> {
        let paths = CallPaths::new(&scope.artifact_dir);
        write_text(&paths.prompt_path, &prompt)?;
        write_text(&paths.schema_path, schema.source)?;

        let request = ExecRequest {
            workdir: scope.workdir.to_path_buf(),
            prompt,
            output_schema_path: paths.schema_path.clone(),
            output_path: paths.output_path.clone(),
            executor_log_path: paths.executor_log_path.clone(),
            timeout: self.config.timeout,
            output_limit_bytes: self.config.output_limit_bytes,
        };
        self.executor
            .exec(&request)
            .with_context(|| format!("{call} oracle call"))?;

        if !paths.output_path.exists() {
            return Err(malformed(call, "no answer was written"));
        }
        let contents = fs::read_to_string(&paths.output_path)
            .with_context(|| format!("read oracle answer {}", paths.output_path.display()))?;
        let answer: Value = serde_json::from_str(&contents)
            .map_err(|err| malformed(call, format!("invalid JSON: {err}")))?;
        schema.check(call, &answer)?;
        let decoded = serde_json::from_value(answer)
            .map_err(|err| malformed(call, format!("unexpected shape: {err}")))?;
        debug!("oracle answer decoded");
        Ok(decoded)
    }
}

impl<E: Executor> Oracle for AgentOracle<E> {
    fn propose_issues(&self, scope: &OracleScope<'_>) -> Result<Vec<IssueDraft>> {
        let prompt = self.prompts.render_issues(scope.feature_spec)?;
        let answer: IssuesAnswer = self.invoke(scope, "issues", prompt, &self.issues)?;
        Ok(answer.issues)
    }

    fn propose_tasks(&self, scope: &OracleScope<'_>, issue: &Issue) -> Result<Vec<TaskDraft>> {
        let prompt = self.prompts.render_tasks(scope.feature_spec, issue)?;
        let answer: TasksAnswer = self.invoke(scope, "tasks", prompt, &self.tasks)?;
        Ok(answer.tasks)
    }

    fn propose_dependencies(
        &self,
        scope: &OracleScope<'_>,
        target: &Task,
        candidates: &[Task],
    ) -> Result<DependencyProposal> {
        let prompt = self.prompts.render_dependencies(target, candidates)?;
        let answer: DependenciesAnswer =
            self.invoke(scope, "dependencies", prompt, &self.dependencies)?;
        Ok(collect_proposal(answer.dependencies))
    }

    fn propose_system_prompt(
        &self,
        scope: &OracleScope<'_>,
        issues: &[Issue],
        batches: &[TaskBatch],
    ) -> Result<String> {
        let prompt = self
            .prompts
            .render_system_prompt(scope.feature_spec, issues, batches)?;
        let answer: SystemPromptAnswer =
            self.invoke(scope, "system prompt", prompt, &self.system_prompt)?;
        Ok(answer.prompt)
    }
}

/// Merge wire entries into a map, keeping proposal order within each key.
fn collect_proposal(entries: Vec<DependencyEntry>) -> DependencyProposal {
    let mut proposal: DependencyProposal = BTreeMap::new();
    for entry in entries {
        proposal
            .entry(entry.task_uuid.trim().to_string())
            .or_default()
            .extend(entry.depends_on);
    }
    proposal
}
