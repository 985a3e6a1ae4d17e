//! Stable exit codes for interview CLI commands.

/// Command succeeded; for `run`, the interview completed.
pub const OK: i32 = 0;
/// Invalid config, case file or guidance library, or any other error.
pub const INVALID: i32 = 1;
/// `run` ended without completing (turn limit, failed turn or run error).
pub const INCOMPLETE: i32 = 2;
/// `run` was interrupted (Ctrl-C).
pub const INTERRUPTED: i32 = 3;
