//! Stage file naming: `{order}_{name}_args.json` and its sibling artifacts.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const ARGS_SUFFIX: &str = "_args.json";
pub const LOGS_SUFFIX: &str = "_logs.txt";
pub const RESULTS_SUFFIX: &str = "_results.json";
/// Inserted between a log file name and the failure timestamp on quarantine.
pub const FAILED_MARKER: &str = "_FAILED_";

/// Classification of a file name found in a work directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageFileName {
    /// A runnable stage. `stem` is the file name minus [`ARGS_SUFFIX`].
    Stage {
        order: u64,
        name: String,
        stem: String,
    },
    /// Numeric prefix with nothing left for the stage name (`12_args.json`).
    MalformedStageName,
    /// Not a stage args file.
    Unrelated,
}

/// Classify `file_name` against the stage naming scheme.
///
/// The prefix before the first underscore must be all ASCII digits; anything
/// else is unrelated and may coexist with stage files.
pub fn parse_stage_file_name(file_name: &str) -> StageFileName {
    let Some(stem) = file_name.strip_suffix(ARGS_SUFFIX) else {
        return StageFileName::Unrelated;
    };
    let (prefix, name) = stem.split_once('_').unwrap_or((stem, ""));
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return StageFileName::Unrelated;
    }
    let Ok(order) = prefix.parse::<u64>() else {
        return StageFileName::MalformedStageName;
    };
    if name.is_empty() {
        return StageFileName::MalformedStageName;
    }
    StageFileName::Stage {
        order,
        name: name.to_string(),
        stem: stem.to_string(),
    }
}

/// True for any numeric-prefixed `*_args.json`, named or not.
pub fn is_stage_args_file(file_name: &str) -> bool {
    !matches!(parse_stage_file_name(file_name), StageFileName::Unrelated)
}

/// One runnable stage inside a work directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
    pub order: u64,
    /// Stage name, used to look up the registered program.
    pub name: String,
    pub directory: PathBuf,
    pub args_path: PathBuf,
    pub log_path: PathBuf,
    pub results_path: PathBuf,
    stem: String,
}

impl StageDescriptor {
    /// Derive the artifact triple for `stem` (e.g. `"01_convert"`) in `directory`.
    pub fn new(directory: &Path, order: u64, name: &str, stem: &str) -> Self {
        Self {
            order,
            name: name.to_string(),
            directory: directory.to_path_buf(),
            args_path: directory.join(format!("{stem}{ARGS_SUFFIX}")),
            log_path: directory.join(format!("{stem}{LOGS_SUFFIX}")),
            results_path: directory.join(format!("{stem}{RESULTS_SUFFIX}")),
            stem: stem.to_string(),
        }
    }

    /// Build a descriptor from an args file name, if it names a stage.
    pub fn from_args_file_name(directory: &Path, file_name: &str) -> Option<Self> {
        match parse_stage_file_name(file_name) {
            StageFileName::Stage { order, name, stem } => {
                Some(Self::new(directory, order, &name, &stem))
            }
            _ => None,
        }
    }

    /// `{order}_{name}` exactly as spelled on disk.
    pub fn label(&self) -> &str {
        &self.stem
    }

    pub fn args_file_name(&self) -> String {
        format!("{}{ARGS_SUFFIX}", self.stem)
    }

    pub fn log_file_name(&self) -> String {
        format!("{}{LOGS_SUFFIX}", self.stem)
    }

    /// Where the log goes after a failed attempt stamped `timestamp`.
    pub fn quarantine_path(&self, timestamp: &str) -> PathBuf {
        let mut path: OsString = self.log_path.clone().into_os_string();
        path.push(FAILED_MARKER);
        path.push(timestamp);
        PathBuf::from(path)
    }

    /// True if `file_name` is a quarantined log of this stage.
    pub fn is_quarantined_log(&self, file_name: &str) -> bool {
        file_name
            .strip_prefix(&self.log_file_name())
            .is_some_and(|rest| rest.starts_with(FAILED_MARKER))
    }
}

/// Execution order: ascending numeric prefix, ties broken by args file name.
pub fn sort_stages(stages: &mut [StageDescriptor]) {
    stages.sort_by(|a, b| {
        a.order
            .cmp(&b.order)
            .then_with(|| a.args_file_name().cmp(&b.args_file_name()))
    });
}
