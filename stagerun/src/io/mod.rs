//! I/O helpers for stagerun commands.

pub mod config;
pub mod copier;
pub mod process;
pub mod registry;
pub mod resolver;
pub mod results;
pub mod walker;
