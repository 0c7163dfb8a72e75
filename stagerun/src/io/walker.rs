//! One-level directory globbing with an exclusion marker.

use std::path::{Path, PathBuf};
use std::vec;

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use tracing::{info, warn};

/// Sorted children of a directory matching a glob, minus excluded names.
///
/// Exclusion is applied (and logged) as the iterator is consumed.
#[derive(Debug)]
pub struct GlobDir {
    paths: vec::IntoIter<PathBuf>,
    marker: String,
}

impl Iterator for GlobDir {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        for path in self.paths.by_ref() {
            if is_excluded(&path, &self.marker) {
                info!(path = %path.display(), "skipping excluded entry");
                continue;
            }
            return Some(path);
        }
        None
    }
}

/// Match `pattern` against the children of `base`.
///
/// `base` is matched literally; a missing `base` yields nothing. Files and
/// directories are both returned; callers filter by kind.
pub fn glob_dir(base: &Path, pattern: &str, marker: &str) -> Result<GlobDir> {
    let escaped = Pattern::escape(&base.to_string_lossy());
    let full = Path::new(&escaped).join(pattern);
    let full = full.to_string_lossy();
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: true,
    };

    let mut paths: Vec<PathBuf> = glob::glob_with(&full, options)
        .with_context(|| format!("invalid glob {full}"))?
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(err = %err, "unreadable glob entry");
                None
            }
        })
        .collect();
    paths.sort();

    Ok(GlobDir {
        paths: paths.into_iter(),
        marker: marker.to_string(),
    })
}

/// True if the basename of `path` starts with `marker`.
pub fn is_excluded(path: &Path, marker: &str) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn yields_sorted_matches_without_excluded() {
        let temp = tempfile::tempdir().expect("tempdir");
        for name in ["b", "a", "_old", "c"] {
            fs::create_dir(temp.path().join(name)).expect("mkdir");
        }
        fs::write(temp.path().join("notes.txt"), "x").expect("write");

        let names: Vec<String> = glob_dir(temp.path(), "*", "_")
            .expect("glob")
            .map(|path| path.file_name().expect("name").to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a", "b", "c", "notes.txt"]);
    }

    #[test]
    fn pattern_filters_children() {
        let temp = tempfile::tempdir().expect("tempdir");
        for name in ["exp1", "exp2", "baseline"] {
            fs::create_dir(temp.path().join(name)).expect("mkdir");
        }

        let paths: Vec<PathBuf> = glob_dir(temp.path(), "exp*", "_").expect("glob").collect();
        assert_eq!(
            paths,
            vec![temp.path().join("exp1"), temp.path().join("exp2")]
        );
    }

    #[test]
    fn missing_base_yields_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut walker = glob_dir(&temp.path().join("runs"), "*", "_").expect("glob");
        assert!(walker.next().is_none());
    }

    #[test]
    fn base_with_glob_metacharacters_is_literal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let base = temp.path().join("scene[1]");
        fs::create_dir_all(base.join("run")).expect("mkdir");

        let paths: Vec<PathBuf> = glob_dir(&base, "*", "_").expect("glob").collect();
        assert_eq!(paths, vec![base.join("run")]);
    }
}
