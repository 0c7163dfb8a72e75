//! Resumable runner for numbered pipeline stages over a directory tree.
//!
//! Each work directory holds `{order}_{name}_args.json` files. A stage runs
//! once; its `{order}_{name}_logs.txt` marks it complete, and a failed
//! attempt moves that log aside so the next invocation retries it. The
//! architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (stage naming, ordering, output
//!   routing). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (configuration, globbing, process
//!   streaming, result files, tree copying).
//!
//! Orchestration modules ([`stage`], [`directory`], [`orchestrate`], [`status`])
//! combine core logic with I/O to implement CLI commands.

pub mod core;
pub mod directory;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrate;
pub mod stage;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
