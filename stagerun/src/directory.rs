//! Ordered execution of every stage in one work directory.

use std::path::Path;

use anyhow::Result;
use tracing::{debug, instrument, warn};

use crate::io::resolver::resolve_stages;
use crate::stage::StageExecutor;

/// Run the stages of `directory` in ascending order.
///
/// Returns `Ok(true)` if every stage succeeded or was skipped. Stops at the
/// first failed stage; later stages stay eligible for the next invocation.
#[instrument(skip_all, fields(dir = %directory.display()))]
pub fn run_directory(directory: &Path, executor: &StageExecutor<'_>) -> Result<bool> {
    let stages = resolve_stages(directory)?;
    if stages.is_empty() {
        debug!("no stages in {}", directory.display());
    }
    for stage in &stages {
        if executor.run(stage)?.is_failed() {
            warn!(
                "halting {} after failed stage {}",
                directory.display(),
                stage.label()
            );
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::progress::{DEFAULT_PROGRESS_PATTERN, ProgressFilter};
    use crate::test_support::{TestTree, read_calls, write_stage_args};

    #[test]
    fn runs_stages_in_numeric_order() {
        let tree = TestTree::new().expect("tree");
        let dir = tree.dir("scene").expect("dir");
        write_stage_args(&dir, 2, "train", &[]).expect("args");
        write_stage_args(&dir, 1, "convert", &[]).expect("args");
        write_stage_args(&dir, 10, "extra", &[]).expect("args");
        let registry = tree
            .registry(&[("convert", "true"), ("train", "true"), ("extra", "true")])
            .expect("registry");
        let progress = ProgressFilter::new(DEFAULT_PROGRESS_PATTERN).expect("pattern");
        let executor = StageExecutor::new(&registry, &progress, true);

        assert!(run_directory(&dir, &executor).expect("run"));
        let calls = read_calls(&tree).expect("calls");
        let names: Vec<&str> = calls
            .iter()
            .filter_map(|call| call.split(' ').next())
            .collect();
        assert_eq!(names, vec!["convert", "train", "extra"]);
    }

    #[test]
    fn second_run_invokes_nothing() {
        let tree = TestTree::new().expect("tree");
        let dir = tree.dir("scene").expect("dir");
        write_stage_args(&dir, 1, "convert", &[]).expect("args");
        write_stage_args(&dir, 2, "train", &[]).expect("args");
        let registry = tree
            .registry(&[("convert", "echo ok"), ("train", "echo ok")])
            .expect("registry");
        let progress = ProgressFilter::new(DEFAULT_PROGRESS_PATTERN).expect("pattern");
        let executor = StageExecutor::new(&registry, &progress, true);

        assert!(run_directory(&dir, &executor).expect("first run"));
        assert_eq!(read_calls(&tree).expect("calls").len(), 2);
        assert!(run_directory(&dir, &executor).expect("second run"));
        assert_eq!(read_calls(&tree).expect("calls").len(), 2);
    }

    #[test]
    fn failure_halts_later_stages() {
        let tree = TestTree::new().expect("tree");
        let dir = tree.dir("scene").expect("dir");
        write_stage_args(&dir, 1, "convert", &[]).expect("args");
        write_stage_args(&dir, 2, "train", &[]).expect("args");
        write_stage_args(&dir, 3, "render", &[]).expect("args");
        let registry = tree
            .registry(&[("convert", "true"), ("train", "exit 1"), ("render", "true")])
            .expect("registry");
        let progress = ProgressFilter::new(DEFAULT_PROGRESS_PATTERN).expect("pattern");
        let executor = StageExecutor::new(&registry, &progress, true);

        assert!(!run_directory(&dir, &executor).expect("run"));
        let calls = read_calls(&tree).expect("calls");
        assert_eq!(calls.len(), 2);
        assert!(calls[1].starts_with("train "));
        assert!(!dir.join("3_render_logs.txt").exists());
        assert!(!dir.join("3_render_results.json").exists());
    }

    #[test]
    fn directory_without_stages_succeeds() {
        let tree = TestTree::new().expect("tree");
        let dir = tree.dir("empty").expect("dir");
        let registry = tree.registry(&[]).expect("registry");
        let progress = ProgressFilter::new(DEFAULT_PROGRESS_PATTERN).expect("pattern");
        let executor = StageExecutor::new(&registry, &progress, true);

        assert!(run_directory(&dir, &executor).expect("run"));
    }
}
