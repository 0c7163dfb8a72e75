//! Copy a stage configuration skeleton into a new tree.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::core::stage_name::is_stage_args_file;

/// Destination paths of every stage args file found under the source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyReport {
    /// Files written to the destination.
    pub copied: Vec<PathBuf>,
    /// Destination files left untouched because they already existed.
    pub existed: Vec<PathBuf>,
}

impl CopyReport {
    pub fn total(&self) -> usize {
        self.copied.len() + self.existed.len()
    }
}

/// Mirror every numeric-prefixed `*_args.json` under `src` into `dst`.
///
/// Intermediate directories are created as needed. Existing destination files
/// are never overwritten. Other files are never copied.
#[instrument(skip_all, fields(src = %src.display(), dst = %dst.display()))]
pub fn copy_stage_tree(src: &Path, dst: &Path) -> Result<CopyReport> {
    let mut report = CopyReport::default();
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walk {}", src.display()))?;
        let Some(file_name) = entry.file_name().to_str() else {
            continue;
        };
        if !is_stage_args_file(file_name) || !entry.path().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("relativize {}", entry.path().display()))?;
        let target = dst.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        if target.exists() {
            debug!(path = %target.display(), "already exists");
            report.existed.push(target);
            continue;
        }
        fs::copy(entry.path(), &target).with_context(|| {
            format!("copy {} to {}", entry.path().display(), target.display())
        })?;
        report.copied.push(target);
    }
    info!(
        copied = report.copied.len(),
        existed = report.existed.len(),
        "copied stage args"
    );
    Ok(report)
}
