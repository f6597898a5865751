//! End-to-end pipeline behavior against scripted fakes.

use std::path::{Path, PathBuf};

use anyhow::Result;
use planner::core::resolver::{MutualTieBreak, resolve_mutual_edges};
use planner::core::state::{Phase, PipelineState};
use planner::core::types::{Task, TaskId, WorkflowKind};
use planner::core::validator::{Rejection, accept_dependencies, closes_cycle};
use planner::io::config::PlannerConfig;
use planner::pipeline::{PhaseFailure, PhaseReport, Pipeline, PipelineConfig, RunContext};
use planner::run::{RunRequest, run_planner};
use planner::test_support::{
    DependencyReply, FakeRepository, MemoryStore, Reply, ScriptedOracle, checkout, issue_draft,
    task, task_draft,
};

fn context() -> RunContext {
    RunContext::new(
        "run-test",
        "Add a cache layer",
        checkout(Path::new("/tmp/planner-checkout")),
        PathBuf::from("/tmp/planner-runs/run-test"),
    )
}

fn run_pipeline(oracle: &ScriptedOracle, store: &MemoryStore) -> (RunContext, Result<()>) {
    let mut ctx = context();
    let result = Pipeline::new(oracle, store, PipelineConfig::default()).run(&mut ctx);
    (ctx, result)
}

fn report(ctx: &RunContext, phase: Phase) -> &PhaseReport {
    ctx.reports
        .iter()
        .find(|r| r.phase == phase)
        .expect("phase report")
}

fn batch_task<'a>(ctx: &'a RunContext, title: &str) -> &'a Task {
    ctx.batches
        .iter()
        .flat_map(|b| &b.tasks)
        .find(|t| t.info.title == title)
        .expect("task in batch")
}

fn titles(s: &[&str]) -> Vec<String> {
    s.iter().map(|t| t.to_string()).collect()
}

/// One issue with tasks `A`, `B`, `C` and a system prompt.
fn abc_oracle() -> ScriptedOracle {
    ScriptedOracle::new()
        .with_issues(Reply::Ok(vec![issue_draft("Cache layer")]))
        .with_tasks(Reply::Ok(vec![
            task_draft("A"),
            task_draft("B"),
            task_draft("C"),
        ]))
        .with_system_prompt(Reply::Ok("Build the cache layer.".to_string()))
}

#[test]
fn cyclic_proposals_keep_edges_accepted_first() {
    let oracle = abc_oracle()
        .with_dependencies("A", DependencyReply::Titles(titles(&["B"])))
        .with_dependencies("B", DependencyReply::Titles(titles(&["C"])))
        .with_dependencies("C", DependencyReply::Titles(titles(&["A"])));
    let store = MemoryStore::new();

    let (ctx, result) = run_pipeline(&oracle, &store);

    result.expect("run succeeds");
    assert_eq!(ctx.state, PipelineState::Completed);
    let (a, b, c) = (
        batch_task(&ctx, "A"),
        batch_task(&ctx, "B"),
        batch_task(&ctx, "C"),
    );
    assert_eq!(a.dependency_tasks, vec![b.uuid]);
    assert_eq!(b.dependency_tasks, vec![c.uuid]);
    assert!(c.dependency_tasks.is_empty());

    let rejected = &report(&ctx, Phase::DependencyResolution).rejected_edges;
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].task, c.uuid);
    assert_eq!(rejected[0].reason, Rejection::Cycle);
    assert_eq!(*oracle.dependency_calls.borrow(), titles(&["A", "B", "C"]));
}

#[test]
fn mutual_pair_keeps_the_later_task_edge() {
    let mut tasks = vec![task("A"), task("B")];
    let (a, b) = (tasks[0].uuid, tasks[1].uuid);

    // Each direction alone is acyclic.
    assert!(!closes_cycle(&tasks, a, b));
    assert!(!closes_cycle(&tasks, b, a));

    // A batch that already holds both directions loses the first-processed one.
    tasks[0].dependency_tasks.push(b);
    tasks[1].dependency_tasks.push(a);
    let removed = resolve_mutual_edges(&mut tasks, MutualTieBreak::LaterInBatch);

    assert_eq!(removed.len(), 1);
    assert_eq!((removed[0].task, removed[0].dependency), (a, b));
    assert!(tasks[0].dependency_tasks.is_empty());
    assert_eq!(tasks[1].dependency_tasks, vec![a]);
}

#[test]
fn mutual_proposals_in_pipeline_leave_one_direction() {
    let oracle = abc_oracle()
        .with_dependencies("A", DependencyReply::Titles(titles(&["B"])))
        .with_dependencies("B", DependencyReply::Titles(titles(&["A"])));
    let store = MemoryStore::new();

    let (ctx, result) = run_pipeline(&oracle, &store);

    result.expect("run succeeds");
    let (a, b) = (batch_task(&ctx, "A"), batch_task(&ctx, "B"));
    assert!(!(a.depends_on(b.uuid) && b.depends_on(a.uuid)));
    assert!(a.depends_on(b.uuid) || b.depends_on(a.uuid));
}

#[test]
fn issue_generation_retries_and_discards_failed_attempts() {
    let oracle = ScriptedOracle::new()
        .with_issues(Reply::Fail("timed out".to_string()))
        .with_issues(Reply::Ok(Vec::new()))
        .with_issues(Reply::Ok(vec![issue_draft("First"), issue_draft("Second")]))
        .with_tasks(Reply::Ok(vec![task_draft("one")]))
        .with_tasks(Reply::Ok(vec![task_draft("two")]))
        .with_system_prompt(Reply::Ok("prompt".to_string()));
    let store = MemoryStore::new();

    let (ctx, result) = run_pipeline(&oracle, &store);

    result.expect("run succeeds");
    assert_eq!(oracle.issue_calls.get(), 3);
    assert_eq!(report(&ctx, Phase::IssueGeneration).attempts, 3);

    let stored: Vec<String> = store
        .issues
        .borrow()
        .iter()
        .map(|i| i.issue.title.clone())
        .collect();
    assert_eq!(stored, titles(&["First", "Second"]));
    assert_eq!(ctx.issues[0].predecessor_uuid, None);
    assert_eq!(ctx.issues[1].predecessor_uuid, Some(ctx.issues[0].uuid));
}

#[test]
fn declined_issue_write_keeps_the_chain_and_later_issues() {
    let oracle = ScriptedOracle::new()
        .with_issues(Reply::Ok(vec![
            issue_draft("First"),
            issue_draft("Second"),
            issue_draft("Third"),
        ]))
        .with_system_prompt(Reply::Ok("prompt".to_string()));
    let store = MemoryStore::declining(&["First"]);

    let (ctx, result) = run_pipeline(&oracle, &store);

    result.expect("run succeeds");
    let issues = report(&ctx, Phase::IssueGeneration);
    assert!(issues.success);
    assert_eq!(issues.persisted, 2);
    assert_eq!(issues.persistence_failures, 1);

    let stored = store.issues.borrow();
    let stored_titles: Vec<String> = stored.iter().map(|i| i.issue.title.clone()).collect();
    assert_eq!(stored_titles, titles(&["Second", "Third"]));
    assert_eq!(stored[0].issue.predecessor_uuid, Some(ctx.issues[0].uuid));
    assert_eq!(stored[1].issue.predecessor_uuid, Some(ctx.issues[1].uuid));
}

#[test]
fn exhausted_issue_retries_fail_the_run() {
    let oracle = ScriptedOracle::new()
        .with_issues(Reply::Fail("timed out".to_string()))
        .with_issues(Reply::Malformed("not json".to_string()))
        .with_issues(Reply::Fail("timed out".to_string()));
    let store = MemoryStore::new();

    let (ctx, result) = run_pipeline(&oracle, &store);

    let err = result.expect_err("run fails");
    let failure = err.downcast_ref::<PhaseFailure>().expect("phase failure");
    assert_eq!(failure.phase, Phase::IssueGeneration);
    assert_eq!(ctx.state, PipelineState::Failed);
    assert_eq!(oracle.issue_calls.get(), 3);
    assert_eq!(oracle.task_calls.get(), 0);
    assert_eq!(oracle.system_prompt_calls.get(), 0);
    assert!(store.issues.borrow().is_empty());
    assert!(!report(&ctx, Phase::IssueGeneration).success);
}

#[test]
fn declined_task_write_does_not_stop_later_writes() {
    let drafts: Vec<_> = (1..=5).map(|n| task_draft(&format!("task {n}"))).collect();
    let oracle = ScriptedOracle::new()
        .with_issues(Reply::Ok(vec![issue_draft("Five tasks")]))
        .with_tasks(Reply::Ok(drafts))
        .with_system_prompt(Reply::Ok("prompt".to_string()));
    let store = MemoryStore::declining(&["task 3"]);

    let (ctx, result) = run_pipeline(&oracle, &store);

    result.expect("run succeeds");
    assert!(report(&ctx, Phase::TaskDecomposition).success);
    let resolution = report(&ctx, Phase::DependencyResolution);
    assert!(resolution.success);
    assert_eq!(resolution.persisted, 4);
    assert_eq!(resolution.persistence_failures, 1);
    assert_eq!(
        *store.task_attempts.borrow(),
        titles(&["task 1", "task 2", "task 3", "task 4", "task 5"])
    );
    assert_eq!(
        store.task_titles(),
        titles(&["task 1", "task 2", "task 4", "task 5"])
    );
}

#[test]
fn failing_task_write_is_counted_and_skipped() {
    let oracle = abc_oracle();
    let store = MemoryStore {
        fail: titles(&["B"]),
        ..MemoryStore::new()
    };

    let (ctx, result) = run_pipeline(&oracle, &store);

    result.expect("run succeeds");
    let resolution = report(&ctx, Phase::DependencyResolution);
    assert_eq!(resolution.persisted, 2);
    assert_eq!(resolution.persistence_failures, 1);
}

#[test]
fn foreign_dependency_ids_never_reach_the_batch() {
    let foreign = TaskId::new().to_string();
    let oracle = abc_oracle().with_dependencies(
        "A",
        DependencyReply::Raw(vec![foreign.clone(), "not-a-uuid".to_string()]),
    );
    let store = MemoryStore::new();

    let (ctx, result) = run_pipeline(&oracle, &store);

    result.expect("run succeeds");
    let a = batch_task(&ctx, "A");
    assert!(a.dependency_tasks.is_empty());
    let reasons: Vec<(String, Rejection)> = report(&ctx, Phase::DependencyResolution)
        .rejected_edges
        .iter()
        .map(|e| (e.dependency.clone(), e.reason))
        .collect();
    assert_eq!(
        reasons,
        vec![
            (foreign, Rejection::UnknownTask),
            ("not-a-uuid".to_string(), Rejection::Malformed),
        ]
    );
    let stored = store.tasks.borrow();
    let stored_a = stored
        .iter()
        .find(|t| t.task.info.title == "A")
        .expect("stored A");
    assert!(stored_a.task.dependency_tasks.is_empty());
}

#[test]
fn proposals_keyed_to_another_task_are_ignored() {
    let oracle = abc_oracle().with_dependencies(
        "A",
        DependencyReply::KeyedTo {
            key: "B".to_string(),
            titles: titles(&["C"]),
        },
    );
    let store = MemoryStore::new();

    let (ctx, result) = run_pipeline(&oracle, &store);

    result.expect("run succeeds");
    assert!(batch_task(&ctx, "A").dependency_tasks.is_empty());
    assert!(batch_task(&ctx, "B").dependency_tasks.is_empty());
}

#[test]
fn dependency_oracle_errors_degrade_to_no_dependencies() {
    let oracle = abc_oracle()
        .with_dependencies("A", DependencyReply::Fail("timed out".to_string()))
        .with_dependencies("B", DependencyReply::Malformed("not json".to_string()))
        .with_dependencies("C", DependencyReply::Titles(titles(&["A"])));
    let store = MemoryStore::new();

    let (ctx, result) = run_pipeline(&oracle, &store);

    result.expect("run succeeds");
    assert_eq!(report(&ctx, Phase::DependencyResolution).oracle_fallbacks, 2);
    let (a, c) = (batch_task(&ctx, "A"), batch_task(&ctx, "C"));
    assert_eq!(c.dependency_tasks, vec![a.uuid]);
}

#[test]
fn finalized_tasks_carry_phase_data() {
    let oracle = abc_oracle();
    let store = MemoryStore::new();

    let (ctx, result) = run_pipeline(&oracle, &store);

    result.expect("run succeeds");
    for stored in store.tasks.borrow().iter() {
        assert!(!stored.task.phase_data.is_empty());
        assert_eq!(stored.workflow, WorkflowKind::BuildFeature);
        assert_eq!(stored.run_id, ctx.run_id);
        assert_eq!(stored.issue_uuid, ctx.issues[0].uuid);
    }
    let prompt = ctx.system_prompt.as_ref().expect("system prompt");
    assert_eq!(prompt.prompt, "Build the cache layer.");
    assert_eq!(store.system_prompts.borrow().len(), 1);
}

#[test]
fn task_invocation_error_aborts_the_run() {
    let oracle = ScriptedOracle::new()
        .with_issues(Reply::Ok(vec![issue_draft("First"), issue_draft("Second")]))
        .with_tasks(Reply::Ok(vec![task_draft("one")]))
        .with_tasks(Reply::Fail("codex exited 1".to_string()));
    let store = MemoryStore::new();

    let (ctx, result) = run_pipeline(&oracle, &store);

    let err = result.expect_err("run fails");
    assert_eq!(
        err.downcast_ref::<PhaseFailure>().map(|f| f.phase),
        Some(Phase::TaskDecomposition)
    );
    assert!(format!("{err:#}").contains("decompose issue 'Second'"));
    assert_eq!(ctx.state, PipelineState::Failed);
    // Issues written before the failure stay written.
    assert_eq!(store.issues.borrow().len(), 2);
    assert!(store.tasks.borrow().is_empty());
}

#[test]
fn malformed_task_answer_yields_an_empty_batch() {
    let oracle = ScriptedOracle::new()
        .with_issues(Reply::Ok(vec![issue_draft("First"), issue_draft("Second")]))
        .with_tasks(Reply::Malformed("missing tasks".to_string()))
        .with_tasks(Reply::Ok(vec![task_draft("two")]))
        .with_system_prompt(Reply::Ok("prompt".to_string()));
    let store = MemoryStore::new();

    let (ctx, result) = run_pipeline(&oracle, &store);

    result.expect("run succeeds");
    assert_eq!(ctx.batches.len(), 2);
    assert!(ctx.batches[0].tasks.is_empty());
    assert_eq!(ctx.batches[1].tasks.len(), 1);
    assert_eq!(report(&ctx, Phase::TaskDecomposition).oracle_fallbacks, 1);
    assert_eq!(store.task_titles(), titles(&["two"]));
}

#[test]
fn system_prompt_failure_fails_the_run() {
    let oracle = ScriptedOracle::new()
        .with_issues(Reply::Ok(vec![issue_draft("First")]))
        .with_tasks(Reply::Ok(vec![task_draft("one")]))
        .with_system_prompt(Reply::Ok("   ".to_string()));
    let store = MemoryStore::new();

    let (ctx, result) = run_pipeline(&oracle, &store);

    let err = result.expect_err("run fails");
    assert_eq!(
        err.downcast_ref::<PhaseFailure>().map(|f| f.phase),
        Some(Phase::SystemPromptGeneration)
    );
    assert_eq!(ctx.state, PipelineState::Failed);
    assert!(ctx.system_prompt.is_none());
    assert_eq!(oracle.system_prompt_calls.get(), 1);
    assert!(store.system_prompts.borrow().is_empty());
    assert_eq!(store.task_titles(), titles(&["one"]));
    assert_eq!(ctx.reports.len(), Phase::ALL.len());
}

#[test]
fn smaller_id_tie_break_is_configurable() {
    let mut tasks = vec![task("A"), task("B")];
    let (a, b) = (tasks[0].uuid, tasks[1].uuid);
    accept_dependencies(&mut tasks, 0, &[b.to_string()]);
    tasks[1].dependency_tasks.push(a);

    let removed = resolve_mutual_edges(&mut tasks, MutualTieBreak::SmallerId);

    let (keeper, loser) = if a.to_string() < b.to_string() {
        (a, b)
    } else {
        (b, a)
    };
    assert_eq!((removed[0].task, removed[0].dependency), (loser, keeper));
}

fn planner_config(state_dir: &Path) -> PlannerConfig {
    PlannerConfig {
        state_dir: state_dir.to_path_buf(),
        ..PlannerConfig::default()
    }
}

fn request() -> RunRequest {
    RunRequest {
        repo_url: "https://github.com/acme/widgets".to_string(),
        fork_url: None,
        feature_spec: "Add a cache layer".to_string(),
    }
}

#[test]
fn run_planner_writes_result_and_releases_checkout() {
    let temp = tempfile::tempdir().expect("tempdir");
    let repo = FakeRepository::new(&temp.path().join("checkout"));
    let oracle = abc_oracle();
    let store = MemoryStore::new();

    let outcome = run_planner(
        &planner_config(temp.path()),
        &repo,
        &oracle,
        &store,
        &request(),
    );

    assert!(outcome.envelope.success);
    assert_eq!((repo.setups.get(), repo.cleanups.get()), (1, 1));
    let report = outcome.envelope.data.as_ref().expect("report");
    assert_eq!(report.state, PipelineState::Completed);
    assert_eq!(report.repo_name, "widgets");

    let written: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(&outcome.result_path).expect("read result"),
    )
    .expect("parse result");
    assert_eq!(written["success"], true);
    assert!(outcome.result_path.starts_with(temp.path().join("runs")));
}

#[test]
fn run_planner_releases_checkout_when_a_phase_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    let repo = FakeRepository::new(&temp.path().join("checkout"));
    let oracle = ScriptedOracle::new();
    let store = MemoryStore::new();

    let outcome = run_planner(
        &planner_config(temp.path()),
        &repo,
        &oracle,
        &store,
        &request(),
    );

    assert!(!outcome.envelope.success);
    assert_eq!(outcome.envelope.message, "phase issue_generation failed");
    assert_eq!(repo.cleanups.get(), 1);
    let report = outcome.envelope.data.expect("partial report");
    assert_eq!(report.state, PipelineState::Failed);
}

#[test]
fn run_planner_reports_setup_failure_without_running() {
    let temp = tempfile::tempdir().expect("tempdir");
    let repo = FakeRepository::failing(&temp.path().join("checkout"));
    let oracle = abc_oracle();
    let store = MemoryStore::new();

    let outcome = run_planner(
        &planner_config(temp.path()),
        &repo,
        &oracle,
        &store,
        &request(),
    );

    assert!(!outcome.envelope.success);
    assert!(outcome.envelope.data.is_none());
    assert!(
        outcome
            .envelope
            .error
            .as_deref()
            .expect("error")
            .contains("GITHUB_TOKEN")
    );
    assert_eq!(repo.cleanups.get(), 0);
    assert_eq!(oracle.issue_calls.get(), 0);
    assert!(outcome.result_path.is_file());
}
