//! Execution of a single stage.
//!
//! A stage's log file is the only completion marker: if it exists the stage
//! is never run again. A failed attempt renames the log out of the way
//! (`..._logs.txt_FAILED_<timestamp>`) so the next invocation retries it.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::Local;
use tracing::{error, info, instrument, warn};

use crate::core::progress::ProgressFilter;
use crate::core::stage_name::StageDescriptor;
use crate::core::types::{ExecutionOutcome, StageResult, TIMESTAMP_FORMAT};
use crate::io::process::{ChildTracker, run_streaming};
use crate::io::registry::StageRegistry;
use crate::io::results::{read_stage_args, write_stage_result};

/// Runs stages against a fixed registry and output policy.
pub struct StageExecutor<'a> {
    registry: &'a StageRegistry,
    progress: &'a ProgressFilter,
    /// Suppress echoing child output to the console.
    quiet: bool,
    tracker: ChildTracker,
}

impl<'a> StageExecutor<'a> {
    pub fn new(registry: &'a StageRegistry, progress: &'a ProgressFilter, quiet: bool) -> Self {
        Self {
            registry,
            progress,
            quiet,
            tracker: ChildTracker::new(),
        }
    }

    /// Register running stage processes with `tracker` so they can be
    /// stopped from a termination handler.
    pub fn with_tracker(mut self, tracker: ChildTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Run one stage unless its log file already exists.
    ///
    /// Returns `Err` only for I/O problems (unreadable args, unwritable
    /// artifacts, spawn failure); a nonzero exit is `Ok(Failed)`.
    pub fn run(&self, descriptor: &StageDescriptor) -> Result<ExecutionOutcome> {
        self.run_with_console(descriptor, &mut io::stdout())
    }

    /// [`StageExecutor::run`], echoing child output to `console`.
    #[instrument(skip_all, fields(stage = %descriptor.label()))]
    pub fn run_with_console(
        &self,
        descriptor: &StageDescriptor,
        console: &mut dyn Write,
    ) -> Result<ExecutionOutcome> {
        if self.tracker.is_terminating() {
            bail!("runner is terminating; not starting {}", descriptor.label());
        }
        if descriptor.log_path.exists() {
            info!(
                "skipping {}: found existing {}",
                descriptor.label(),
                descriptor.log_path.display()
            );
            return Ok(ExecutionOutcome::Skipped);
        }
        if !descriptor.args_path.exists() {
            warn!(
                "skipping {}: missing {}",
                descriptor.label(),
                descriptor.args_path.display()
            );
            return Ok(ExecutionOutcome::Skipped);
        }
        let Some(program) = self.registry.get(&descriptor.name) else {
            error!(
                known = ?self.registry.names().collect::<Vec<_>>(),
                "no program registered for stage {:?} ({})",
                descriptor.name,
                descriptor.args_path.display()
            );
            return Ok(ExecutionOutcome::Failed);
        };

        let args = read_stage_args(&descriptor.args_path)?;
        let mut cmd = program.command(&args);
        cmd.current_dir(&descriptor.directory);
        info!(
            "running {} in {}",
            descriptor.label(),
            descriptor.directory.display()
        );
        info!(command = %program.describe(), args = ?args, "starting");

        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let started = Instant::now();
        let status = match self.stream_to_log(cmd, descriptor, console) {
            Ok(status) => status,
            Err(err) => {
                // A log left behind would mark the stage as done.
                quarantine(descriptor, &timestamp)?;
                return Err(err);
            }
        };
        let duration = started.elapsed();
        info!(
            "finished {} after {:.1} minutes",
            descriptor.label(),
            duration.as_secs_f64() / 60.0
        );

        let result = StageResult {
            timestamp: timestamp.clone(),
            duration_seconds: duration.as_secs_f64(),
            return_code: return_code(status),
            working_directory: descriptor.directory.clone(),
        };
        let written = write_stage_result(&descriptor.results_path, &result);

        if status.success() {
            written?;
            return Ok(ExecutionOutcome::Success);
        }

        error!(
            return_code = result.return_code,
            "could not execute {}",
            descriptor.label()
        );
        match fs::read_to_string(&descriptor.log_path) {
            Ok(contents) => error!(
                "contents {}:\n{}",
                descriptor.log_path.display(),
                contents
            ),
            Err(e) => warn!(err = %e, "could not read {}", descriptor.log_path.display()),
        }
        quarantine(descriptor, &timestamp)?;
        written?;
        Ok(ExecutionOutcome::Failed)
    }

    /// Spawn the stage and route its output to the log file and console.
    fn stream_to_log(
        &self,
        cmd: std::process::Command,
        descriptor: &StageDescriptor,
        console: &mut dyn Write,
    ) -> Result<ExitStatus> {
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&descriptor.log_path)
            .with_context(|| format!("open {}", descriptor.log_path.display()))?;
        run_streaming(cmd, &self.tracker, |segment| {
            let routed = self.progress.route(segment);
            if let Some(line) = &routed.log {
                log.write_all(line.as_bytes())
                    .with_context(|| format!("write {}", descriptor.log_path.display()))?;
            }
            if !self.quiet && !routed.console.is_empty() {
                // A closed console must not fail the stage.
                let _ = console
                    .write_all(routed.console.as_bytes())
                    .and_then(|()| console.flush());
            }
            Ok(())
        })
        .with_context(|| format!("run stage {}", descriptor.label()))
    }
}

/// Move the log aside so the next invocation retries the stage.
fn quarantine(descriptor: &StageDescriptor, timestamp: &str) -> Result<()> {
    if !descriptor.log_path.exists() {
        return Ok(());
    }
    let target = free_quarantine_path(descriptor, timestamp);
    fs::rename(&descriptor.log_path, &target).with_context(|| {
        format!(
            "rename {} to {}",
            descriptor.log_path.display(),
            target.display()
        )
    })?;
    warn!("moved failed log to {}", target.display());
    Ok(())
}

/// Quarantine path for `timestamp`, with `_<n>` appended if an earlier
/// failure in the same second already took it.
fn free_quarantine_path(descriptor: &StageDescriptor, timestamp: &str) -> PathBuf {
    let mut target = descriptor.quarantine_path(timestamp);
    let mut n = 1;
    while target.exists() {
        target = descriptor.quarantine_path(&format!("{timestamp}_{n}"));
        n += 1;
    }
    target
}

/// Exit code, or `-signal` for a child killed by a signal.
fn return_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}
