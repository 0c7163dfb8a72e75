//! Discovery of stage descriptors in a work directory.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::stage_name::{
    ARGS_SUFFIX, StageDescriptor, StageFileName, parse_stage_file_name, sort_stages,
};

/// List the stages of `directory` in execution order.
///
/// Files matching `*_args.json` without a numeric prefix are ignored. A
/// numeric prefix without a stage name is reported and skipped.
pub fn resolve_stages(directory: &Path) -> Result<Vec<StageDescriptor>> {
    let mut stages = Vec::new();
    let entries =
        fs::read_dir(directory).with_context(|| format!("read {}", directory.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("read entry in {}", directory.display()))?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if !file_name.ends_with(ARGS_SUFFIX) || !entry.path().is_file() {
            continue;
        }
        match parse_stage_file_name(file_name) {
            StageFileName::Stage { order, name, stem } => {
                stages.push(StageDescriptor::new(directory, order, &name, &stem));
            }
            StageFileName::MalformedStageName => {
                warn!(
                    file = %entry.path().display(),
                    "malformed stage name: no stage name after numeric prefix, skipping"
                );
            }
            StageFileName::Unrelated => {
                debug!(file = %entry.path().display(), "ignoring non-stage args file");
            }
        }
    }
    sort_stages(&mut stages);
    Ok(stages)
}
