//! Classification of child output into progress redraws and log lines.

use anyhow::{Context, Result};
use regex::Regex;

use crate::core::types::{OutputSegment, Terminator};

/// Matches tqdm-style bars such as ` 45%|████      | 450/1000`.
pub const DEFAULT_PROGRESS_PATTERN: &str = r"\d{1,3}%\|";

/// Where one segment of child output should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    /// Text for the interactive console, terminator included.
    pub console: String,
    /// Text to append to the stage log, if any.
    pub log: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressFilter {
    pattern: Regex,
}

impl ProgressFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern =
            Regex::new(pattern).with_context(|| format!("compile progress pattern {pattern:?}"))?;
        Ok(Self { pattern })
    }

    pub fn is_progress(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }

    /// Progress redraws go to the console only, rewritten to end in `\r`.
    /// Everything else is logged verbatim and echoed as a full line.
    pub fn route(&self, segment: &OutputSegment) -> Routed {
        if self.is_progress(&segment.text) {
            return Routed {
                console: format!("{}\r", segment.text),
                log: None,
            };
        }
        let line = match segment.terminator {
            Terminator::CarriageReturn if segment.text.is_empty() => {
                return Routed {
                    console: String::new(),
                    log: None,
                };
            }
            _ => format!("{}\n", segment.text),
        };
        Routed {
            console: line.clone(),
            log: Some(line),
        }
    }
}
