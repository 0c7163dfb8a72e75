//! Read-only report of stage state across the tree for `stagerun status`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::stage_name::StageDescriptor;
use crate::core::types::StageState;
use crate::io::config::RunnerConfig;
use crate::io::registry::StageRegistry;
use crate::io::resolver::resolve_stages;
use crate::io::walker::glob_dir;
use crate::orchestrate::WalkOptions;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageStatus {
    pub label: String,
    pub state: StageState,
    /// False when no program is registered for the stage name.
    pub registered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryStatus {
    pub directory: PathBuf,
    pub stages: Vec<StageStatus>,
}

/// Derive a stage's state from its log files.
pub fn stage_state(stage: &StageDescriptor) -> Result<StageState> {
    if stage.log_path.exists() {
        return Ok(StageState::Done);
    }
    let entries = fs::read_dir(&stage.directory)
        .with_context(|| format!("read {}", stage.directory.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("read entry in {}", stage.directory.display()))?;
        if stage.is_quarantined_log(&entry.file_name().to_string_lossy()) {
            return Ok(StageState::Failed);
        }
    }
    Ok(StageState::Pending)
}

/// Status of every directory the orchestrator could visit, in walk order.
///
/// Unlike a run, nothing is pruned: runs and models are listed even below
/// directories with pending or failed stages.
pub fn collect_status(
    root: &Path,
    options: &WalkOptions,
    config: &RunnerConfig,
    registry: &StageRegistry,
) -> Result<Vec<DirectoryStatus>> {
    let root = root
        .canonicalize()
        .with_context(|| format!("resolve root {}", root.display()))?;
    let marker = &config.exclusion_marker;
    let mut report = Vec::new();
    for source in glob_dir(&root, &options.root_glob, marker)? {
        if !source.is_dir() {
            continue;
        }
        report.push(directory_status(&source, registry)?);
        for run in glob_dir(&source.join(&config.runs_dir), &options.runs_glob, marker)? {
            if !run.is_dir() {
                continue;
            }
            report.push(directory_status(&run, registry)?);
            for model in glob_dir(&run.join(&config.models_dir), &options.models_glob, marker)? {
                if model.is_dir() {
                    report.push(directory_status(&model, registry)?);
                }
            }
        }
    }
    Ok(report)
}

fn directory_status(directory: &Path, registry: &StageRegistry) -> Result<DirectoryStatus> {
    let stages = resolve_stages(directory)?
        .iter()
        .map(|stage| {
            Ok(StageStatus {
                label: stage.label().to_string(),
                state: stage_state(stage)?,
                registered: registry.contains(&stage.name),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(DirectoryStatus {
        directory: directory.to_path_buf(),
        stages,
    })
}

/// Plain-text rendering, one directory header followed by indented stages.
pub fn render_status(report: &[DirectoryStatus]) -> String {
    let mut out = String::new();
    for dir in report {
        out.push_str(&format!("{}\n", dir.directory.display()));
        for stage in &dir.stages {
            let missing = if stage.registered {
                ""
            } else {
                " (missing-program)"
            };
            out.push_str(&format!(
                "  {}: {}{}\n",
                stage.label,
                stage.state.as_str(),
                missing
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestTree, write_stage_args};

    #[test]
    fn states_follow_log_files() {
        let tree = TestTree::new().expect("tree");
        let dir = tree.dir("scene").expect("dir");
        write_stage_args(&dir, 1, "convert", &[]).expect("args");
        write_stage_args(&dir, 2, "train", &[]).expect("args");
        write_stage_args(&dir, 3, "render", &[]).expect("args");
        fs::write(dir.join("1_convert_logs.txt"), "").expect("log");
        fs::write(dir.join("2_train_logs.txt_FAILED_20240101_120000"), "").expect("log");
        let registry = tree
            .registry(&[("convert", "true"), ("train", "true")])
            .expect("registry");

        let report = collect_status(
            tree.root(),
            &WalkOptions::default(),
            &RunnerConfig::default(),
            &registry,
        )
        .expect("status");

        assert_eq!(report.len(), 1);
        let states: Vec<(&str, StageState, bool)> = report[0]
            .stages
            .iter()
            .map(|stage| (stage.label.as_str(), stage.state, stage.registered))
            .collect();
        assert_eq!(
            states,
            vec![
                ("1_convert", StageState::Done, true),
                ("2_train", StageState::Failed, true),
                ("3_render", StageState::Pending, false),
            ]
        );
        let rendered = render_status(&report);
        assert!(rendered.contains("  3_render: pending (missing-program)\n"));
    }

    #[test]
    fn lists_runs_and_models_without_pruning() {
        let tree = TestTree::new().expect("tree");
        let model = tree.dir("scene/runs/exp1/models/m1").expect("dir");
        tree.dir("scene/runs/_disabled").expect("dir");
        write_stage_args(&model, 1, "train", &[]).expect("args");
        let registry = tree.registry(&[]).expect("registry");

        let report = collect_status(
            tree.root(),
            &WalkOptions::default(),
            &RunnerConfig::default(),
            &registry,
        )
        .expect("status");

        let dirs: Vec<PathBuf> = report.iter().map(|d| d.directory.clone()).collect();
        assert_eq!(
            dirs,
            vec![
                tree.root().join("scene"),
                tree.root().join("scene/runs/exp1"),
                model,
            ]
        );
    }
}
