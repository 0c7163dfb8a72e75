//! Orchestrator logging.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: orchestrator announcements (runs, skips,
//!   failures) go to stdout and to every file sink attached to the
//!   [`LogContext`], e.g. a source directory's `run_logs.txt`.
//!
//! - **Stage logs (`stage`)**: raw child output written verbatim to
//!   `{order}_{name}_logs.txt`. Never routed through tracing.

use std::fmt::{self, Write as _};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::Local;
use colored::Colorize;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::{FmtContext, MakeWriter};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, fmt as sub_fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::core::types::TIMESTAMP_FORMAT;

/// Console and file logging options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    /// Wrap console lines in a severity color.
    pub color: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self { color: true }
    }
}

#[derive(Default)]
struct Sinks {
    next_id: u64,
    attached: Vec<AttachedSink>,
}

struct AttachedSink {
    id: u64,
    path: PathBuf,
    file: File,
}

/// Handle to the set of log files currently receiving orchestrator output.
///
/// Cheap to clone; clones share the same sinks.
#[derive(Clone, Default)]
pub struct LogContext {
    sinks: Arc<Mutex<Sinks>>,
}

impl LogContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append log lines to `path` until the returned guard is dropped.
    pub fn attach(&self, path: &Path) -> Result<SinkGuard> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        let mut sinks = self.lock();
        let id = sinks.next_id;
        sinks.next_id += 1;
        sinks.attached.push(AttachedSink {
            id,
            path: path.to_path_buf(),
            file,
        });
        Ok(SinkGuard {
            context: self.clone(),
            id,
        })
    }

    /// Paths of the currently attached sinks, oldest first.
    pub fn attached_paths(&self) -> Vec<PathBuf> {
        self.lock()
            .attached
            .iter()
            .map(|sink| sink.path.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Sinks> {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn detach(&self, id: u64) {
        self.lock().attached.retain(|sink| sink.id != id);
    }
}

/// Detaches its sink on drop, on every exit path.
#[must_use = "the sink is detached as soon as the guard is dropped"]
pub struct SinkGuard {
    context: LogContext,
    id: u64,
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        self.context.detach(self.id);
    }
}

/// Writer fanning formatted events out to every attached sink.
pub struct SinkWriter<'a> {
    context: &'a LogContext,
}

impl Write for SinkWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut sinks = self.context.lock();
        for sink in &mut sinks.attached {
            sink.file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut sinks = self.context.lock();
        for sink in &mut sinks.attached {
            sink.file.flush()?;
        }
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogContext {
    type Writer = SinkWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SinkWriter { context: self }
    }
}

/// `20240101_120000 - stagerun::stage - INFO - message key=value`
#[derive(Debug, Clone, Copy)]
pub struct LineFormat {
    color: bool,
}

impl LineFormat {
    pub fn new(color: bool) -> Self {
        Self { color }
    }
}

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let mut line = String::new();
        write!(
            line,
            "{} - {} - {} - ",
            Local::now().format(TIMESTAMP_FORMAT),
            meta.target(),
            meta.level()
        )?;
        ctx.format_fields(format::Writer::new(&mut line), event)?;
        if self.color {
            line = paint(*meta.level(), &line);
        }
        writeln!(writer, "{line}")
    }
}

fn paint(level: Level, line: &str) -> String {
    match level {
        Level::ERROR => line.red().to_string(),
        Level::WARN => line.yellow().to_string(),
        Level::INFO => line.to_string(),
        _ => line.bright_black().to_string(),
    }
}

/// Build the subscriber: console layer on stdout plus a file layer on `context`.
///
/// Reads `RUST_LOG`. Defaults to `info` if unset.
pub fn subscriber(
    context: LogContext,
    options: LogOptions,
) -> impl Subscriber + Send + Sync + 'static {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            sub_fmt::layer()
                .event_format(LineFormat::new(options.color))
                .with_writer(io::stdout),
        )
        .with(
            sub_fmt::layer()
                .event_format(LineFormat::new(false))
                .with_writer(context),
        )
}

/// Install the subscriber globally.
///
/// # Example
/// ```bash
/// RUST_LOG=stagerun=debug stagerun run /data/scenes
/// ```
pub fn init(context: LogContext, options: LogOptions) -> Result<()> {
    subscriber(context, options)
        .try_init()
        .context("install tracing subscriber")
}
