//! Task dependency graph builder and phase pipeline.
//!
//! This crate turns a feature request into issues and tasks for autonomous
//! agents, infers a dependency graph over each issue's tasks with an external
//! oracle, and validates that graph before anything is persisted. The
//! architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (entity types, cycle validation,
//!   mutual-edge resolution, state machine, retry policy). No I/O, fully
//!   testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, child processes, prompt
//!   rendering, document store, repository checkout). Isolated to enable
//!   fakes in tests.
//! - **[`oracle`]**: The untrusted proposal source behind every generation step.
//! - **[`pipeline`]**: The phase controller that ties the above together.
//!
//! Orchestration modules ([`run`], [`check`], [`regenerate`]) implement the CLI commands.

pub mod check;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod oracle;
pub mod pipeline;
pub mod regenerate;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
