//! Session transcript pruner for long-running agent conversations.
//!
//! A session is a JSONL file of conversation records linked by parent ids.
//! The pruner shrinks it with named strategies grouped into risk tiers,
//! keeps agent-team coordination state intact, and can guard a live session
//! from a background loop. The architecture keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (strategies, pipeline, invariants,
//!   team extraction). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (session files, locks, checkpoints,
//!   config, host processes). Isolated to enable fakes in tests.
//!
//! Orchestration modules ([`treat`], [`daemon`]) coordinate core logic with
//! I/O to implement CLI commands.

pub mod core;
pub mod daemon;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod report;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod treat;
