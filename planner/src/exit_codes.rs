//! Stable exit codes for planner CLI commands.

/// Command succeeded (run completed, batch clean, phase data regenerated).
pub const OK: i32 = 0;
/// Setup or phase failure, invalid config/input, or an unacknowledged write.
pub const FAILED: i32 = 1;
/// `planner check` found graph violations.
pub const VIOLATIONS: i32 = 2;
