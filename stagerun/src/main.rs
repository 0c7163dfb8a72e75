//! `stagerun` command line.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::warn;

use stagerun::exit_codes;
use stagerun::io::config::{RunnerConfig, default_config_path, load_config};
use stagerun::io::copier::copy_stage_tree;
use stagerun::io::process::ChildTracker;
use stagerun::io::registry::StageRegistry;
use stagerun::logging::{self, LogContext, LogOptions};
use stagerun::orchestrate::{Orchestrator, WalkOptions};
use stagerun::status::{collect_status, render_status};

#[derive(Parser)]
#[command(
    name = "stagerun",
    version,
    about = "Resumable runner for numbered pipeline stages over a directory tree"
)]
struct Cli {
    /// Runner configuration (default: `stagerun.toml` beside the executable).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print console log lines without severity colors.
    #[arg(long, global = true)]
    no_color: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every pending stage under `root`, source → runs → models.
    Run {
        root: PathBuf,
        #[command(flatten)]
        globs: GlobArgs,
        /// Do not echo stage output to the console.
        #[arg(long)]
        quiet: bool,
    },
    /// Show done/failed/pending stages under `root` without running anything.
    Status {
        root: PathBuf,
        #[command(flatten)]
        globs: GlobArgs,
    },
    /// Prepare directory trees.
    Sweep {
        #[command(subcommand)]
        command: SweepCommand,
    },
}

#[derive(Args)]
struct GlobArgs {
    /// Glob for source directories in root.
    #[arg(long, default_value = "*")]
    root_glob: String,
    /// Glob for run directories in each source's runs folder.
    #[arg(long, default_value = "*")]
    runs_glob: String,
    /// Glob for model directories in each run's models folder.
    #[arg(long, default_value = "*")]
    models_glob: String,
}

impl From<GlobArgs> for WalkOptions {
    fn from(globs: GlobArgs) -> Self {
        Self {
            root_glob: globs.root_glob,
            runs_glob: globs.runs_glob,
            models_glob: globs.models_glob,
        }
    }
}

#[derive(Subcommand)]
enum SweepCommand {
    /// Copy numbered stage args files from `src` into `dst`, never overwriting.
    Cp { src: PathBuf, dst: PathBuf },
}

fn main() {
    let cli = Cli::parse();
    let logs = LogContext::new();
    if let Err(err) = logging::init(
        logs.clone(),
        LogOptions {
            color: !cli.no_color,
        },
    ) {
        eprintln!("{:#}", err);
    }
    let code = match run(cli, logs) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli, logs: LogContext) -> Result<i32> {
    match cli.command {
        Command::Run { root, globs, quiet } => {
            let config = load_runner_config(cli.config)?;
            let registry = build_registry(&config)?;
            let orchestrator = Orchestrator::new(&config, &registry, logs)?;
            let tracker = orchestrator.tracker();
            install_termination_handler(tracker.clone())?;
            let summary = orchestrator.run(&root, &globs.into(), quiet)?;
            if tracker.is_terminating() {
                return Ok(exit_codes::INTERRUPTED);
            }
            Ok(summary.exit_code())
        }
        Command::Status { root, globs } => {
            let config = load_runner_config(cli.config)?;
            let registry = build_registry(&config)?;
            let report = collect_status(&root, &globs.into(), &config, &registry)?;
            print!("{}", render_status(&report));
            Ok(exit_codes::OK)
        }
        Command::Sweep {
            command: SweepCommand::Cp { src, dst },
        } => {
            let report = copy_stage_tree(&src, &dst)?;
            println!(
                "copied {} to {}: {} files, {} existed already",
                dir_label(&src),
                dir_label(&dst),
                report.total(),
                report.existed.len()
            );
            Ok(exit_codes::OK)
        }
    }
}

/// Kill the running stage on SIGINT/SIGTERM/SIGHUP so it never outlives the
/// runner. The walk then winds down; a second signal exits immediately.
fn install_termination_handler(tracker: ChildTracker) -> Result<()> {
    ctrlc::set_handler(move || {
        if tracker.is_terminating() {
            std::process::exit(exit_codes::INTERRUPTED);
        }
        match tracker.terminate() {
            Some(pid) => warn!(pid, "termination requested; killed running stage"),
            None => warn!("termination requested"),
        }
    })
    .context("install termination handler")
}

/// `path` with exactly one trailing slash.
fn dir_label(path: &Path) -> String {
    let text = path.display().to_string();
    format!("{}/", text.trim_end_matches('/'))
}

fn load_runner_config(path: Option<PathBuf>) -> Result<RunnerConfig> {
    let path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };
    load_config(&path).with_context(|| format!("load config {}", path.display()))
}

fn build_registry(config: &RunnerConfig) -> Result<StageRegistry> {
    let script_dir = config.resolved_script_dir()?;
    StageRegistry::from_config(config, &script_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_defaults() {
        let cli = Cli::parse_from(["stagerun", "run", "/data"]);
        match cli.command {
            Command::Run { root, globs, quiet } => {
                assert_eq!(root, PathBuf::from("/data"));
                assert_eq!(WalkOptions::from(globs), WalkOptions::default());
                assert!(!quiet);
            }
            _ => panic!("expected run"),
        }
        assert!(!cli.no_color);
    }

    #[test]
    fn parse_run_globs_and_flags() {
        let cli = Cli::parse_from([
            "stagerun",
            "--no-color",
            "run",
            "/data",
            "--root-glob=scene*",
            "--runs-glob",
            "exp1",
            "--quiet",
        ]);
        assert!(cli.no_color);
        match cli.command {
            Command::Run { globs, quiet, .. } => {
                assert_eq!(globs.root_glob, "scene*");
                assert_eq!(globs.runs_glob, "exp1");
                assert_eq!(globs.models_glob, "*");
                assert!(quiet);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn dir_label_normalizes_trailing_slashes() {
        assert_eq!(dir_label(Path::new("runs")), "runs/");
        assert_eq!(dir_label(Path::new("runs/")), "runs/");
        assert_eq!(dir_label(Path::new("/data/scenes//")), "/data/scenes/");
        assert_eq!(dir_label(Path::new("/")), "/");
    }

    #[test]
    fn parse_sweep_cp() {
        let cli = Cli::parse_from(["stagerun", "sweep", "cp", "a", "b"]);
        assert!(matches!(
            cli.command,
            Command::Sweep {
                command: SweepCommand::Cp { .. }
            }
        ));
    }
}
