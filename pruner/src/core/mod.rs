//! Deterministic, pure logic for pruning session transcripts.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! message sequences and return deterministic outputs suitable for tests.
//! The one exception is [`team::inject_snapshot`], which mints fresh ids and
//! takes the clock reading from its caller.

pub mod invariants;
pub mod lineage;
pub mod pipeline;
pub mod protection;
pub mod recap;
pub mod registry;
pub mod strategies;
pub mod team;
pub mod types;
