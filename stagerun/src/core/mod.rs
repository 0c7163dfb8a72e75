//! Deterministic, pure logic shared by the stage runner.
//!
//! Core modules must be free of I/O side effects. They operate on names, paths
//! and in-memory values and return deterministic outputs suitable for tests.

pub mod progress;
pub mod stage_name;
pub mod types;
