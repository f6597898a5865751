//! Prompt rendering for oracle calls and task phase data.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::types::{Issue, PhaseData, Task, TaskBatch, WorkflowKind};

const ISSUES_TEMPLATE: &str = include_str!("prompts/issues.md");
const TASKS_TEMPLATE: &str = include_str!("prompts/tasks.md");
const DEPENDENCIES_TEMPLATE: &str = include_str!("prompts/dependencies.md");
const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("prompts/system_prompt.md");

const PHASE_TEMPLATES: [(&str, &str); 6] = [
    (
        "create_branch",
        include_str!("prompts/phases/create_branch.md"),
    ),
    (
        "implement_task",
        include_str!("prompts/phases/implement_task.md"),
    ),
    (
        "fix_implementation",
        include_str!("prompts/phases/fix_implementation.md"),
    ),
    (
        "validate_criteria",
        include_str!("prompts/phases/validate_criteria.md"),
    ),
    (
        "write_documentation",
        include_str!("prompts/phases/write_documentation.md"),
    ),
    (
        "create_pull_request",
        include_str!("prompts/phases/create_pull_request.md"),
    ),
];

/// One step of a workflow: template name plus the tools the agent may use.
struct PhaseStep {
    template: &'static str,
    tools: &'static [&'static str],
    /// Only rendered when a previous error is supplied.
    needs_error: bool,
}

const BUILD_FEATURE_STEPS: &[PhaseStep] = &[
    PhaseStep {
        template: "create_branch",
        tools: &["create_branch"],
        needs_error: false,
    },
    PhaseStep {
        template: "implement_task",
        tools: &[
            "read_file",
            "list_files",
            "write_file",
            "delete_file",
            "run_tests",
            "install_dependency",
            "create_directory",
        ],
        needs_error: false,
    },
    PhaseStep {
        template: "fix_implementation",
        tools: &[
            "read_file",
            "list_files",
            "edit_file",
            "delete_file",
            "run_tests",
            "install_dependency",
        ],
        needs_error: true,
    },
    PhaseStep {
        template: "validate_criteria",
        tools: &[
            "read_file",
            "list_files",
            "run_tests",
            "validate_implementation",
        ],
        needs_error: false,
    },
    PhaseStep {
        template: "create_pull_request",
        tools: &["read_file", "list_files", "create_pull_request"],
        needs_error: false,
    },
];

const DOCUMENT_SUMMARIZER_STEPS: &[PhaseStep] = &[
    PhaseStep {
        template: "create_branch",
        tools: &["create_branch"],
        needs_error: false,
    },
    PhaseStep {
        template: "write_documentation",
        tools: &["read_file", "write_file", "list_directory_contents"],
        needs_error: false,
    },
    PhaseStep {
        template: "create_pull_request",
        tools: &[
            "read_file",
            "search_code",
            "list_directory_contents",
            "create_pull_request",
        ],
        needs_error: false,
    },
];

fn steps_for(workflow: WorkflowKind) -> &'static [PhaseStep] {
    match workflow {
        WorkflowKind::BuildFeature => BUILD_FEATURE_STEPS,
        WorkflowKind::DocumentSummarizer => DOCUMENT_SUMMARIZER_STEPS,
    }
}

/// An issue with the titles of its tasks, for the system prompt plan.
#[derive(Debug, Serialize)]
struct PlanEntry<'a> {
    title: &'a str,
    description: &'a str,
    tasks: Vec<&'a str>,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("issues", ISSUES_TEMPLATE)
            .expect("issues template should be valid");
        env.add_template("tasks", TASKS_TEMPLATE)
            .expect("tasks template should be valid");
        env.add_template("dependencies", DEPENDENCIES_TEMPLATE)
            .expect("dependencies template should be valid");
        env.add_template("system_prompt", SYSTEM_PROMPT_TEMPLATE)
            .expect("system prompt template should be valid");
        for (name, source) in PHASE_TEMPLATES {
            env.add_template(name, source)
                .expect("phase template should be valid");
        }
        Self { env }
    }

    pub fn render_issues(&self, feature_spec: &str) -> Result<String> {
        let template = self.env.get_template("issues")?;
        Ok(template.render(context! { feature_spec => feature_spec.trim() })?)
    }

    pub fn render_tasks(&self, feature_spec: &str, issue: &Issue) -> Result<String> {
        let template = self.env.get_template("tasks")?;
        Ok(template.render(context! {
            feature_spec => feature_spec.trim(),
            issue => issue,
        })?)
    }

    pub fn render_dependencies(&self, target: &Task, candidates: &[Task]) -> Result<String> {
        let template = self.env.get_template("dependencies")?;
        Ok(template.render(context! {
            target => target,
            candidates => candidates,
        })?)
    }

    pub fn render_system_prompt(
        &self,
        feature_spec: &str,
        issues: &[Issue],
        batches: &[TaskBatch],
    ) -> Result<String> {
        let plan: Vec<PlanEntry<'_>> = issues
            .iter()
            .map(|issue| PlanEntry {
                title: &issue.title,
                description: &issue.description,
                tasks: batches
                    .iter()
                    .filter(|batch| batch.issue_uuid == issue.uuid)
                    .flat_map(|batch| batch.tasks.iter().map(|t| t.info.title.as_str()))
                    .collect(),
            })
            .collect();
        let template = self.env.get_template("system_prompt")?;
        Ok(template.render(context! {
            feature_spec => feature_spec.trim(),
            plan => plan,
        })?)
    }

    /// Render the ordered phase steps for `task` under `workflow`.
    ///
    /// `previous_error` adds the fix step where the workflow has one and is
    /// otherwise ignored.
    pub fn render_phases(
        &self,
        workflow: WorkflowKind,
        task: &Task,
        previous_error: Option<&str>,
    ) -> Result<Vec<PhaseData>> {
        let previous_error = previous_error.map(str::trim).filter(|s| !s.is_empty());
        let mut phases = Vec::new();
        for step in steps_for(workflow) {
            if step.needs_error && previous_error.is_none() {
                continue;
            }
            let template = self.env.get_template(step.template)?;
            let prompt = template.render(context! {
                title => &task.info.title,
                description => &task.info.description,
                acceptance_criteria => &task.acceptance_criteria,
                previous_error => previous_error,
            })?;
            phases.push(PhaseData {
                prompt: prompt.trim().to_string(),
                tools: step.tools.iter().map(|t| t.to_string()).collect(),
            });
        }
        Ok(phases)
    }
}
