//! Orchestration of a full `stagerun run`.
//!
//! Walks `root/<source>` → `<source>/runs/<run>` → `<run>/models/<model>`.
//! A level is entered only when every stage of its parent directory
//! succeeded or was skipped, so a failure prunes the subtree below it while
//! siblings are still processed.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{error, info, instrument, warn};

use crate::core::progress::ProgressFilter;
use crate::directory::run_directory;
use crate::exit_codes;
use crate::io::config::RunnerConfig;
use crate::io::process::ChildTracker;
use crate::io::registry::StageRegistry;
use crate::io::walker::glob_dir;
use crate::logging::LogContext;
use crate::stage::StageExecutor;

/// Orchestrator log written inside each source directory.
pub const RUN_LOG_FILE: &str = "run_logs.txt";

/// Globs selecting directories at each level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkOptions {
    pub root_glob: String,
    pub runs_glob: String,
    pub models_glob: String,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            root_glob: "*".to_string(),
            runs_glob: "*".to_string(),
            models_glob: "*".to_string(),
        }
    }
}

/// Per-source-directory tally of one invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Source directories whose whole subtree completed.
    pub processed: usize,
    /// Source directories with a failed stage or an I/O error anywhere below.
    pub failed: usize,
    /// Source directories waiting for manual frame extraction.
    pub skipped: usize,
}

impl RunSummary {
    /// Nonzero iff any source directory failed.
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 {
            exit_codes::STAGE_FAILED
        } else {
            exit_codes::OK
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceOutcome {
    Completed,
    Failed,
    NeedsFrames,
}

/// Media found directly in a source directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMedia {
    pub videos: Vec<PathBuf>,
    pub images: usize,
}

pub struct Orchestrator<'a> {
    config: &'a RunnerConfig,
    registry: &'a StageRegistry,
    progress: ProgressFilter,
    logs: LogContext,
    tracker: ChildTracker,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a RunnerConfig,
        registry: &'a StageRegistry,
        logs: LogContext,
    ) -> Result<Self> {
        Ok(Self {
            config,
            registry,
            progress: ProgressFilter::new(&config.progress_pattern)?,
            logs,
            tracker: ChildTracker::new(),
        })
    }

    /// Handle a termination handler uses to stop the running stage.
    /// After termination the walk stops at the next directory boundary.
    pub fn tracker(&self) -> ChildTracker {
        self.tracker.clone()
    }

    fn stopping(&self) -> bool {
        self.tracker.is_terminating()
    }

    /// Walk the whole tree under `root`. Failures and I/O errors are
    /// contained per directory and tallied per source in the returned summary.
    #[instrument(skip_all, fields(root = %root.display()))]
    pub fn run(&self, root: &Path, options: &WalkOptions, quiet: bool) -> Result<RunSummary> {
        let root = root
            .canonicalize()
            .with_context(|| format!("resolve root {}", root.display()))?;
        info!("running with root={}", root.display());
        let executor =
            StageExecutor::new(self.registry, &self.progress, quiet).with_tracker(self.tracker());

        let mut summary = RunSummary::default();
        for source in glob_dir(&root, &options.root_glob, &self.config.exclusion_marker)? {
            if self.stopping() {
                warn!("termination requested; not visiting remaining directories");
                break;
            }
            if !source.is_dir() {
                continue;
            }
            match self.visit_source(&source, options, &executor) {
                SourceOutcome::Completed => summary.processed += 1,
                SourceOutcome::Failed => summary.failed += 1,
                SourceOutcome::NeedsFrames => summary.skipped += 1,
            }
        }
        info!(
            processed = summary.processed,
            failed = summary.failed,
            skipped = summary.skipped,
            "walk complete"
        );
        Ok(summary)
    }

    /// Process one source directory with its `run_logs.txt` attached.
    fn visit_source(
        &self,
        source: &Path,
        options: &WalkOptions,
        executor: &StageExecutor<'_>,
    ) -> SourceOutcome {
        let _sink = match self.logs.attach(&source.join(RUN_LOG_FILE)) {
            Ok(guard) => guard,
            Err(err) => {
                error!("cannot log to {}: {err:#}", source.display());
                return SourceOutcome::Failed;
            }
        };
        match self.process_source(source, options, executor) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("aborting {}: {err:#}", source.display());
                SourceOutcome::Failed
            }
        }
    }

    fn process_source(
        &self,
        source: &Path,
        options: &WalkOptions,
        executor: &StageExecutor<'_>,
    ) -> Result<SourceOutcome> {
        let media = inspect_media(source, self.config)?;
        if let Some(video) = media.videos.first()
            && media.images == 0
        {
            let hint = frame_extraction_hint(source, video, self.config);
            info!("expected images; you can extract frames with:\n{hint}");
            return Ok(SourceOutcome::NeedsFrames);
        }
        if media.images == 0 {
            info!("no images in {}", source.display());
        } else {
            info!("found {} images in {}", media.images, source.display());
        }

        if !run_directory(source, executor)? {
            return Ok(SourceOutcome::Failed);
        }

        let mut all_ok = true;
        let runs_base = source.join(&self.config.runs_dir);
        for run in glob_dir(&runs_base, &options.runs_glob, &self.config.exclusion_marker)? {
            if self.stopping() {
                break;
            }
            if !run.is_dir() {
                continue;
            }
            match self.process_run(&run, options, executor) {
                Ok(true) => {}
                Ok(false) => all_ok = false,
                Err(err) => {
                    error!("aborting {}: {err:#}", run.display());
                    all_ok = false;
                }
            }
        }

        Ok(if all_ok {
            SourceOutcome::Completed
        } else {
            SourceOutcome::Failed
        })
    }

    /// Run one run directory, then its models. Errors in one model
    /// directory do not stop its siblings.
    fn process_run(
        &self,
        run: &Path,
        options: &WalkOptions,
        executor: &StageExecutor<'_>,
    ) -> Result<bool> {
        if !run_directory(run, executor)? {
            warn!("not descending into models of {}", run.display());
            return Ok(false);
        }
        let mut all_ok = true;
        let models_base = run.join(&self.config.models_dir);
        for model in glob_dir(
            &models_base,
            &options.models_glob,
            &self.config.exclusion_marker,
        )? {
            if self.stopping() {
                break;
            }
            if !model.is_dir() {
                continue;
            }
            match run_directory(&model, executor) {
                Ok(true) => {}
                Ok(false) => all_ok = false,
                Err(err) => {
                    error!("aborting {}: {err:#}", model.display());
                    all_ok = false;
                }
            }
        }
        Ok(all_ok)
    }
}

/// Count videos in `source` and images in `source/<images_dir>`.
pub fn inspect_media(source: &Path, config: &RunnerConfig) -> Result<SourceMedia> {
    let mut videos = files_with_extension(source, &config.video_extensions)?;
    videos.sort();
    let images_dir = source.join(&config.images_dir);
    let images = if images_dir.is_dir() {
        files_with_extension(&images_dir, &config.image_extensions)?.len()
    } else {
        0
    };
    Ok(SourceMedia { videos, images })
}

fn files_with_extension(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut matches = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let path = entry
            .with_context(|| format!("read entry in {}", dir.display()))?
            .path();
        let matched = path.extension().is_some_and(|ext| {
            let ext = ext.to_string_lossy();
            extensions.iter().any(|want| want.eq_ignore_ascii_case(&ext))
        });
        if matched && path.is_file() {
            matches.push(path);
        }
    }
    Ok(matches)
}

/// Shell command an operator can run to populate the images directory.
pub fn frame_extraction_hint(source: &Path, video: &Path, config: &RunnerConfig) -> String {
    let images_dir = source.join(&config.images_dir);
    let pattern = images_dir.join("frame_%03d.jpg");
    format!(
        "mkdir -p \"{}\" && ffmpeg -i \"{}\" -vf fps={} \"{}\"",
        images_dir.display(),
        video.display(),
        config.frame_rate,
        pattern.display()
    )
}
