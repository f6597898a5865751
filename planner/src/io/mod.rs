//! I/O helpers for planner commands.

pub mod config;
pub mod executor;
pub mod process;
pub mod prompt;
pub mod repository;
pub mod run_log;
pub mod store;
