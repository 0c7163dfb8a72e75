//! Runner configuration, optionally stored in `stagerun.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::progress::{DEFAULT_PROGRESS_PATTERN, ProgressFilter};

/// File name looked up beside the executable when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "stagerun.toml";

/// Runner configuration (TOML).
///
/// Every field is optional; a missing file yields `RunnerConfig::default()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Directory holding conventional stage scripts. Defaults to the
    /// directory of the running executable.
    pub script_dir: Option<PathBuf>,

    /// Tokens prepended to every conventional script (e.g. `["python"]`).
    /// Empty runs the script directly.
    pub interpreter: Vec<String>,

    /// Extension of conventional scripts, without the dot.
    pub script_extension: String,

    /// Stage names registered as `interpreter + script_dir/<name>.<ext>`.
    pub conventional_stages: Vec<String>,

    /// Subdirectory of a source directory holding experiment runs.
    pub runs_dir: String,

    /// Subdirectory of a run holding models.
    pub models_dir: String,

    /// Entries whose name starts with this are never visited.
    pub exclusion_marker: String,

    /// Regex marking a line of child output as a progress redraw.
    pub progress_pattern: String,

    /// Subdirectory of a source directory holding extracted frames.
    pub images_dir: String,

    pub video_extensions: Vec<String>,

    pub image_extensions: Vec<String>,

    /// Frame rate used in the suggested frame extraction command.
    pub frame_rate: u32,

    /// Explicit registrations; override conventional stages of the same name.
    pub stages: BTreeMap<String, StageCommandConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageCommandConfig {
    /// Program followed by fixed arguments; the args file tokens are appended.
    pub command: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            script_dir: None,
            interpreter: vec!["python".to_string()],
            script_extension: "py".to_string(),
            conventional_stages: ["extract", "convert", "helper", "train"]
                .into_iter()
                .map(String::from)
                .collect(),
            runs_dir: "runs".to_string(),
            models_dir: "models".to_string(),
            exclusion_marker: "_".to_string(),
            progress_pattern: DEFAULT_PROGRESS_PATTERN.to_string(),
            images_dir: "images".to_string(),
            video_extensions: vec!["mp4".to_string()],
            image_extensions: vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()],
            frame_rate: 10,
            stages: BTreeMap::new(),
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.exclusion_marker.is_empty() {
            return Err(anyhow!("exclusion_marker must not be empty"));
        }
        for (key, value) in [
            ("runs_dir", &self.runs_dir),
            ("models_dir", &self.models_dir),
            ("images_dir", &self.images_dir),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("{key} must not be empty"));
            }
        }
        if self.frame_rate == 0 {
            return Err(anyhow!("frame_rate must be > 0"));
        }
        ProgressFilter::new(&self.progress_pattern)?;
        for (name, stage) in &self.stages {
            if stage.command.is_empty() || stage.command[0].trim().is_empty() {
                return Err(anyhow!("stages.{name}.command must be a non-empty array"));
            }
        }
        Ok(())
    }

    /// Configured `script_dir`, or the directory of the running executable.
    pub fn resolved_script_dir(&self) -> Result<PathBuf> {
        match &self.script_dir {
            Some(dir) => Ok(dir.clone()),
            None => executable_dir(),
        }
    }
}

/// `stagerun.toml` beside the running executable.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(executable_dir()?.join(DEFAULT_CONFIG_FILE))
}

fn executable_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("locate running executable")?;
    exe.parent()
        .map(Path::to_path_buf)
        .with_context(|| format!("executable has no parent directory {}", exe.display()))
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RunnerConfig::default());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("stagerun.toml");
        fs::write(
            &path,
            "runs_dir = \"experiments\"\n\n[stages.render]\ncommand = [\"blender\", \"-b\"]\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.runs_dir, "experiments");
        assert_eq!(cfg.models_dir, "models");
        assert_eq!(cfg.stages["render"].command, vec!["blender", "-b"]);
    }

    #[test]
    fn empty_stage_command_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("stagerun.toml");
        fs::write(&path, "[stages.train]\ncommand = []\n").expect("write");

        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("stages.train.command"));
    }

    #[test]
    fn invalid_progress_pattern_is_rejected() {
        let cfg = RunnerConfig {
            progress_pattern: "[".to_string(),
            ..RunnerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
