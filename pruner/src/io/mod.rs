//! I/O helpers for pruner commands.

pub mod checkpoint;
pub mod config;
pub mod lock;
pub mod process;
pub mod reload;
pub mod render;
pub mod session_store;
