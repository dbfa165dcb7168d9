//! Crash-safe team checkpoint next to the session file.
//!
//! The checkpoint is written to `<file>.tmp` and renamed over the target, so
//! readers see either the complete old file or the complete new one.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{SecondsFormat, Utc};
use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::team::TeamSnapshot;
use crate::error::PruneError;
use crate::io::session_store::replace_file;

const CHECKPOINT_SCHEMA: &str = include_str!("../../schemas/team_checkpoint.schema.json");
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    /// Session file the snapshot was taken from.
    pub session: String,
    pub written_at: String,
    pub snapshot: TeamSnapshot,
}

impl Checkpoint {
    pub fn new(session: impl Into<String>, snapshot: TeamSnapshot) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            session: session.into(),
            written_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            snapshot,
        }
    }
}

/// `<session-stem>.team-checkpoint.json` beside the session.
pub fn checkpoint_path(session: &Path) -> PathBuf {
    let stem = session
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "session".to_string());
    session.with_file_name(format!("{stem}.team-checkpoint.json"))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write once: temp file, then rename.
pub fn write_checkpoint(path: &Path, checkpoint: &Checkpoint) -> Result<(), PruneError> {
    let mut buf = serde_json::to_string_pretty(checkpoint)
        .map_err(|err| PruneError::storage(path, err.into()))?;
    buf.push('\n');
    replace_file(path, &tmp_path(path), buf.as_bytes())
}

/// Bounded exponential backoff for checkpoint writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.initial_backoff.saturating_mul(1 << attempt.min(16))
    }
}

/// Run `op` until it succeeds or the policy's retries are spent.
///
/// Returns the last error when every attempt failed.
pub fn retry_with_backoff<T, F>(policy: RetryPolicy, mut op: F) -> Result<T, PruneError>
where
    F: FnMut(u32) -> Result<T, PruneError>,
{
    let mut attempt = 0;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.retries => {
                let delay = policy.delay(attempt);
                warn!(attempt, ?delay, error = %err, "checkpoint write failed; retrying");
                thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Write with retries. Exhausted retries are a persistent storage fault.
pub fn write_checkpoint_with_retry(
    path: &Path,
    checkpoint: &Checkpoint,
    policy: RetryPolicy,
) -> Result<(), PruneError> {
    retry_with_backoff(policy, |_| write_checkpoint(path, checkpoint))?;
    debug!(path = %path.display(), "wrote team checkpoint");
    Ok(())
}

/// Remove a leftover temp file from an interrupted write.
pub fn clean_stale_tmp(path: &Path) -> Result<bool> {
    let tmp = tmp_path(path);
    if !tmp.exists() {
        return Ok(false);
    }
    fs::remove_file(&tmp).with_context(|| format!("remove stale {}", tmp.display()))?;
    debug!(path = %tmp.display(), "removed stale checkpoint temp file");
    Ok(true)
}

/// Load and schema-check a checkpoint.
pub fn load_checkpoint(path: &Path) -> Result<Checkpoint> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read checkpoint {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse checkpoint {}", path.display()))?;
    validate_schema(&value).with_context(|| format!("validate checkpoint {}", path.display()))?;
    serde_json::from_value(value)
        .with_context(|| format!("deserialize checkpoint {}", path.display()))
}

fn validate_schema(instance: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(CHECKPOINT_SCHEMA).context("parse checkpoint schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {err}"))?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!(
            "checkpoint schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::team::extract_team_state;
    use crate::test_support::scenario_session;
    use std::cell::Cell;

    fn sample() -> Checkpoint {
        Checkpoint::new("/work/s.jsonl", extract_team_state(&scenario_session()))
    }

    #[test]
    fn path_uses_session_stem() {
        let path = checkpoint_path(Path::new("/work/abc.jsonl"));
        assert_eq!(path, PathBuf::from("/work/abc.team-checkpoint.json"));
    }

    #[test]
    fn write_then_load_validates() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("s.team-checkpoint.json");
        let checkpoint = sample();
        write_checkpoint(&path, &checkpoint).expect("write");
        assert_eq!(load_checkpoint(&path).expect("load"), checkpoint);
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn schema_rejects_foreign_documents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("s.team-checkpoint.json");
        fs::write(&path, r#"{"version": 2, "session": "x"}"#).expect("write");
        let err = load_checkpoint(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains("schema validation failed"));
    }

    #[test]
    fn interrupted_write_leaves_previous_checkpoint_readable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("s.team-checkpoint.json");
        let old = sample();
        write_checkpoint(&path, &old).expect("write old");

        // Crash after the temp write, before the rename.
        fs::write(tmp_path(&path), "{\"version\": 1, \"sess").expect("partial tmp");
        assert_eq!(load_checkpoint(&path).expect("old still valid"), old);

        assert!(clean_stale_tmp(&path).expect("clean"));
        let mut new = sample();
        new.snapshot.team_name = "renamed".to_string();
        write_checkpoint(&path, &new).expect("write new");
        assert_eq!(load_checkpoint(&path).expect("new"), new);
    }

    #[test]
    fn retries_then_succeeds() {
        let calls = Cell::new(0);
        let policy = RetryPolicy {
            retries: 3,
            initial_backoff: Duration::from_millis(1),
        };
        let value = retry_with_backoff(policy, |attempt| {
            calls.set(calls.get() + 1);
            if attempt < 2 {
                Err(PruneError::storage("x", std::io::Error::other("disk full")))
            } else {
                Ok(attempt)
            }
        })
        .expect("third attempt succeeds");
        assert_eq!(value, 2);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn exhausted_retries_surface_storage_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("missing-dir").join("s.team-checkpoint.json");
        let policy = RetryPolicy {
            retries: 2,
            initial_backoff: Duration::from_millis(1),
        };
        let err = write_checkpoint_with_retry(&path, &sample(), policy).expect_err("no dir");
        assert!(matches!(err, PruneError::Storage { .. }));
    }
}
