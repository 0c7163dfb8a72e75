//! Shared types for stage execution.
//!
//! `StageResult` is the persisted record written beside every executed stage;
//! its JSON field names are a stable contract with operators and later tooling.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// `strftime` format for result timestamps and quarantine suffixes.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Outcome of one stage attempt. Transient; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The stage program ran and exited with status 0.
    Success,
    /// The stage was not run (log already present, or args missing).
    Skipped,
    /// The stage program exited nonzero, or could not be resolved.
    Failed,
}

impl ExecutionOutcome {
    pub fn is_failed(self) -> bool {
        self == Self::Failed
    }
}

/// Contents of `{order}_{name}_results.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    /// Local spawn time, formatted with [`TIMESTAMP_FORMAT`].
    pub timestamp: String,
    /// Wall-clock seconds between spawn and exit.
    pub duration_seconds: f64,
    /// Exit code; `-N` when the child was killed by signal `N`.
    pub return_code: i32,
    /// Directory the stage ran in.
    pub working_directory: PathBuf,
}

/// How a chunk of child output ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    Newline,
    CarriageReturn,
    /// Final chunk without a trailing terminator.
    Eof,
}

/// One chunk of combined child output, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSegment {
    pub text: String,
    pub terminator: Terminator,
}

impl OutputSegment {
    pub fn new(text: impl Into<String>, terminator: Terminator) -> Self {
        Self {
            text: text.into(),
            terminator,
        }
    }
}

/// Filesystem-derived state of a stage, as reported by `stagerun status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// Log file present: the stage will be skipped.
    Done,
    /// Only quarantined logs exist: the stage will be retried.
    Failed,
    /// Never attempted.
    Pending,
}

impl StageState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Pending => "pending",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_result_uses_camel_case_fields() {
        let result = StageResult {
            timestamp: "20240101_120000".to_string(),
            duration_seconds: 1.5,
            return_code: 0,
            working_directory: PathBuf::from("/data/source1"),
        };
        let value = serde_json::to_value(&result).expect("serialize");
        assert_eq!(value["timestamp"], "20240101_120000");
        assert_eq!(value["durationSeconds"], 1.5);
        assert_eq!(value["returnCode"], 0);
        assert_eq!(value["workingDirectory"], "/data/source1");
    }
}
