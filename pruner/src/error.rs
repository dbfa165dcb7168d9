//! Error categories surfaced by the pruning pipeline and the guard daemon.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PruneError {
    /// Unknown strategy or prescription, invalid threshold, unreadable config.
    #[error("config error: {0}")]
    Config(String),

    /// A result failed invariant validation. Nothing is persisted.
    #[error("integrity violation after '{strategy}' at {target}: {detail}")]
    Integrity {
        strategy: String,
        target: String,
        detail: String,
    },

    /// One strategy failed while analysing the session.
    #[error("strategy '{strategy}' failed: {detail}")]
    Strategy { strategy: String, detail: String },

    #[error("storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another writer holds the session lock.
    #[error("session {} is locked by another writer", path.display())]
    Locked { path: PathBuf },
}

impl PruneError {
    pub fn config(detail: impl Into<String>) -> Self {
        Self::Config(detail.into())
    }

    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }
}

/// Error returned by a single strategy run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct StrategyError(pub String);
