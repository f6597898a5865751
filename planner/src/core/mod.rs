//! Deterministic, pure logic shared by the planner.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod envelope;
pub mod invariants;
pub mod resolver;
pub mod retry;
pub mod state;
pub mod types;
pub mod validator;
