//! Exclusive advisory lock serializing writers of one session.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs4::fs_std::FileExt;
use tracing::debug;

use crate::error::PruneError;

const POLL: Duration = Duration::from_millis(50);

/// `<session>.lock` next to the session file.
pub fn lock_path(session: &Path) -> PathBuf {
    let mut name = session.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Held lock on a session. Released on drop.
#[derive(Debug)]
pub struct SessionLock {
    file: File,
    path: PathBuf,
}

impl SessionLock {
    /// Wait up to `timeout` for the lock on `session`.
    pub fn acquire(session: &Path, timeout: Duration) -> Result<Self, PruneError> {
        let path = lock_path(session);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|err| PruneError::storage(&path, err))?;

        let start = Instant::now();
        loop {
            if matches!(FileExt::try_lock_exclusive(&file), Ok(true)) {
                debug!(path = %path.display(), "acquired session lock");
                return Ok(Self { file, path });
            }
            if start.elapsed() >= timeout {
                return Err(PruneError::Locked {
                    path: session.to_path_buf(),
                });
            }
            thread::sleep(POLL);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_writer_times_out_until_release() {
        let temp = tempfile::tempdir().expect("tempdir");
        let session = temp.path().join("s.jsonl");

        let held = SessionLock::acquire(&session, Duration::from_millis(100)).expect("first");
        assert!(held.path().ends_with("s.jsonl.lock"));
        let err = SessionLock::acquire(&session, Duration::from_millis(120)).expect_err("locked");
        assert!(matches!(err, PruneError::Locked { .. }));

        drop(held);
        SessionLock::acquire(&session, Duration::from_millis(100)).expect("after release");
    }
}
