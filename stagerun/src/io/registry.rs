//! Stage program registry.
//!
//! Stage names found on disk are mapped to programs once at startup. The
//! [`StageProgram`] trait decouples stage execution from how a program is
//! launched; tests register shell scripts in place of real pipeline tools.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

use anyhow::{Result, anyhow};
use tracing::debug;

use crate::io::config::RunnerConfig;

/// Something that can be launched as a stage.
pub trait StageProgram {
    /// Build the command for one invocation with `args` from the args file.
    /// The caller sets the working directory and stdio.
    fn command(&self, args: &[String]) -> Command;

    /// Human-readable form for logs.
    fn describe(&self) -> String;
}

/// A fixed token prefix (program plus leading arguments).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandProgram {
    program: String,
    leading_args: Vec<String>,
}

impl CommandProgram {
    pub fn new(tokens: Vec<String>) -> Result<Self> {
        let mut tokens = tokens.into_iter();
        let program = tokens
            .next()
            .filter(|program| !program.trim().is_empty())
            .ok_or_else(|| anyhow!("stage command must be a non-empty array"))?;
        Ok(Self {
            program,
            leading_args: tokens.collect(),
        })
    }

    /// `interpreter... <script>`, or the script alone with no interpreter.
    pub fn script(interpreter: &[String], script: &Path) -> Self {
        let script = script.to_string_lossy().into_owned();
        match interpreter.split_first() {
            Some((program, rest)) => Self {
                program: program.clone(),
                leading_args: rest.iter().cloned().chain([script]).collect(),
            },
            None => Self {
                program: script,
                leading_args: Vec::new(),
            },
        }
    }
}

impl StageProgram for CommandProgram {
    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args).args(args);
        cmd
    }

    fn describe(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.leading_args)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Default)]
pub struct StageRegistry {
    programs: BTreeMap<String, Box<dyn StageProgram>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register conventional scripts from `script_dir`, then explicit commands.
    pub fn from_config(cfg: &RunnerConfig, script_dir: &Path) -> Result<Self> {
        let mut registry = Self::new();
        for name in &cfg.conventional_stages {
            let file_name = if cfg.script_extension.is_empty() {
                name.clone()
            } else {
                format!("{name}.{}", cfg.script_extension)
            };
            let program = CommandProgram::script(&cfg.interpreter, &script_dir.join(file_name));
            registry.register(name, program);
        }
        for (name, stage) in &cfg.stages {
            registry.register(name, CommandProgram::new(stage.command.clone())?);
        }
        Ok(registry)
    }

    /// Register `program` under `name`, replacing any previous registration.
    pub fn register(&mut self, name: impl Into<String>, program: impl StageProgram + 'static) {
        let name = name.into();
        debug!(stage = %name, program = %program.describe(), "registering stage program");
        self.programs.insert(name, Box::new(program));
    }

    pub fn get(&self, name: &str) -> Option<&dyn StageProgram> {
        self.programs.get(name).map(|program| program.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.programs.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.programs.keys().map(String::as_str)
    }
}
