//! Stage argument and result files.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::types::StageResult;

/// Parse `{order}_{name}_args.json`: a JSON array of argument tokens.
pub fn read_stage_args(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("parse {}: expected a JSON array of strings", path.display()))
}

pub fn load_stage_result(path: &Path) -> Result<StageResult> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Atomically write a stage result (temp file + rename).
pub fn write_stage_result(path: &Path, result: &StageResult) -> Result<()> {
    debug!(path = %path.display(), return_code = result.return_code, "writing stage result");
    let mut buf = serde_json::to_string_pretty(result).context("serialize stage result")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp result {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace result {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn reads_argument_tokens_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("1_train_args.json");
        fs::write(&path, r#"["--iterations", "7000", "--eval"]"#).expect("write");

        let args = read_stage_args(&path).expect("args");
        assert_eq!(args, vec!["--iterations", "7000", "--eval"]);
    }

    #[test]
    fn rejects_non_array_arguments() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("1_train_args.json");
        fs::write(&path, r#"{"iterations": 7000}"#).expect("write");

        let err = read_stage_args(&path).unwrap_err();
        assert!(err.to_string().contains("expected a JSON array of strings"));
    }

    #[test]
    fn result_file_has_stable_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("1_train_results.json");
        let result = StageResult {
            timestamp: "20240101_120000".to_string(),
            duration_seconds: 2.5,
            return_code: 1,
            working_directory: PathBuf::from("/data/s1"),
        };

        write_stage_result(&path, &result).expect("write");
        let contents = fs::read_to_string(&path).expect("read");
        let expected = "{\n  \"timestamp\": \"20240101_120000\",\n  \"durationSeconds\": 2.5,\n  \"returnCode\": 1,\n  \"workingDirectory\": \"/data/s1\"\n}\n";
        assert_eq!(contents, expected);
        assert_eq!(load_stage_result(&path).expect("load"), result);
        assert!(!temp.path().join("1_train_results.json.tmp").exists());
    }
}
