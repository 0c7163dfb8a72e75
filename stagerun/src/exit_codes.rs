//! Stable exit codes for stagerun CLI commands.

/// Command succeeded; for `run`, no directory failed.
pub const OK: i32 = 0;
/// Invalid usage, configuration, or an error outside per-directory processing.
pub const INVALID: i32 = 1;
/// `stagerun run` walked the whole tree but at least one directory failed.
pub const STAGE_FAILED: i32 = 2;
/// `stagerun run` stopped on SIGINT/SIGTERM/SIGHUP; the running stage was killed.
pub const INTERRUPTED: i32 = 130;
