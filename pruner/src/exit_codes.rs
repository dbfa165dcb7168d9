//! Stable exit codes for pruner CLI commands.

use crate::error::PruneError;

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid arguments or config, storage failures, strict-mode strategy
/// failures, and other errors.
pub const INVALID: i32 = 1;
/// A strategy result failed invariant validation; nothing was written.
pub const INTEGRITY: i32 = 2;
/// The session lock was held by another writer past the timeout.
pub const LOCKED: i32 = 3;

/// Map an error chain to an exit code by its first [`PruneError`].
pub fn for_error(err: &anyhow::Error) -> i32 {
    let prune = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<PruneError>());
    match prune {
        Some(PruneError::Integrity { .. }) => INTEGRITY,
        Some(PruneError::Locked { .. }) => LOCKED,
        Some(PruneError::Strategy { .. }) => INVALID,
        _ => INVALID,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use std::path::PathBuf;

    #[test]
    fn classifies_through_context() {
        let err = Err::<(), _>(PruneError::Locked {
            path: PathBuf::from("s.jsonl"),
        })
        .context("treat s.jsonl")
        .expect_err("locked");
        assert_eq!(for_error(&err), LOCKED);

        let err = anyhow::Error::new(PruneError::Integrity {
            strategy: "demo".to_string(),
            target: "line 3".to_string(),
            detail: "protected message removed".to_string(),
        });
        assert_eq!(for_error(&err), INTEGRITY);

        assert_eq!(for_error(&anyhow::anyhow!("boom")), INVALID);
    }

    #[test]
    fn strict_strategy_failure_is_invalid() {
        let err = anyhow::Error::new(PruneError::Strategy {
            strategy: "demo".to_string(),
            detail: "boom".to_string(),
        })
        .context("cleaning s.jsonl aborted");
        assert_eq!(for_error(&err), INVALID);
    }
}
