//! Test-only helpers for building stage trees and scripted stage programs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::io::registry::{CommandProgram, StageRegistry};

/// A temporary work tree plus a calls file that scripted stages append to.
pub struct TestTree {
    _temp: TempDir,
    root: PathBuf,
    calls_path: PathBuf,
}

impl TestTree {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let base = temp.path().canonicalize().context("canonicalize tempdir")?;
        let root = base.join("root");
        fs::create_dir_all(&root).with_context(|| format!("create {}", root.display()))?;
        Ok(Self {
            _temp: temp,
            root,
            calls_path: base.join("calls.txt"),
        })
    }

    /// Root of the work tree (canonical).
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn calls_path(&self) -> &Path {
        &self.calls_path
    }

    /// Create `root/<relative>` and return its path.
    pub fn dir(&self, relative: &str) -> Result<PathBuf> {
        let dir = self.root.join(relative);
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        Ok(dir)
    }

    /// Registry where each `(name, script)` runs `sh -c script` after
    /// recording `"<name> <cwd>"` in the calls file. Args are `$1..`.
    pub fn registry(&self, scripts: &[(&str, &str)]) -> Result<StageRegistry> {
        let mut registry = StageRegistry::new();
        for (name, script) in scripts {
            registry.register(*name, recording_program(&self.calls_path, name, script)?);
        }
        Ok(registry)
    }
}

/// `sh -c` program that logs its invocation before running `script`.
pub fn recording_program(calls_path: &Path, name: &str, script: &str) -> Result<CommandProgram> {
    let script = format!(
        "printf '%s %s\\n' '{name}' \"$(pwd -P)\" >> '{}'\n{script}",
        calls_path.display()
    );
    CommandProgram::new(vec![
        "sh".to_string(),
        "-c".to_string(),
        script,
        "sh".to_string(),
    ])
}

/// Invocations recorded so far, in order.
pub fn read_calls(tree: &TestTree) -> Result<Vec<String>> {
    if !tree.calls_path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(&tree.calls_path)
        .with_context(|| format!("read {}", tree.calls_path.display()))?;
    Ok(contents.lines().map(str::to_string).collect())
}

/// Write `{order}_{name}_args.json` with `args` into `dir`.
pub fn write_stage_args(dir: &Path, order: u64, name: &str, args: &[&str]) -> Result<PathBuf> {
    let path = dir.join(format!("{order}_{name}_args.json"));
    let payload = serde_json::to_string(args).context("serialize args")?;
    fs::write(&path, payload).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}
