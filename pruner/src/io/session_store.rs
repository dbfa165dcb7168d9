//! Session transcript load/persist with backup and atomic replace.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{debug, info};

use crate::error::PruneError;
use crate::session::Message;

/// A loaded session and the extent of the file it was read from.
#[derive(Debug, Clone)]
pub struct LoadedSession {
    pub messages: Vec<Message>,
    /// Bytes read. Anything past this offset was written afterwards.
    pub len: u64,
    /// Lines read, blank ones included.
    pub lines: usize,
}

/// Load every non-blank line of a JSONL session.
///
/// Message lines are the zero-based line numbers in the file.
pub fn load_session(path: &Path) -> Result<Vec<Message>> {
    Ok(load_session_extent(path)?.messages)
}

/// Like [`load_session`], also recording how much of the file was read.
pub fn load_session_extent(path: &Path) -> Result<LoadedSession> {
    let contents = fs::read_to_string(path).map_err(|err| PruneError::storage(path, err))?;
    let messages = parse_lines(path, &contents, 0)?;
    debug!(path = %path.display(), messages = messages.len(), "loaded session");
    Ok(LoadedSession {
        messages,
        len: contents.len() as u64,
        lines: contents.lines().count(),
    })
}

fn parse_lines(path: &Path, contents: &str, first_line: usize) -> Result<Vec<Message>> {
    let mut messages = Vec::new();
    for (offset, text) in contents.lines().enumerate() {
        if text.trim().is_empty() {
            continue;
        }
        let line = first_line + offset;
        let message = Message::parse(line, text)
            .with_context(|| format!("parse {} line {}", path.display(), line + 1))?;
        messages.push(message);
    }
    Ok(messages)
}

/// Records appended to the session after `loaded` was read.
///
/// Fails if the file shrank or ends in a partially written line; the caller
/// should drop its cycle and retry later.
pub fn read_appended(path: &Path, loaded: &LoadedSession) -> Result<Vec<Message>> {
    let mut file = File::open(path).map_err(|err| PruneError::storage(path, err))?;
    let len = file
        .metadata()
        .map_err(|err| PruneError::storage(path, err))?
        .len();
    if len == loaded.len {
        return Ok(Vec::new());
    }
    if len < loaded.len {
        bail!(
            "session {} shrank from {} to {len} bytes while cleaning",
            path.display(),
            loaded.len
        );
    }
    file.seek(SeekFrom::Start(loaded.len))
        .map_err(|err| PruneError::storage(path, err))?;
    let mut tail = String::new();
    file.read_to_string(&mut tail)
        .map_err(|err| PruneError::storage(path, err))?;
    if !tail.ends_with('\n') {
        bail!("session {} has a partially written line", path.display());
    }
    let appended = parse_lines(path, &tail, loaded.lines)?;
    debug!(path = %path.display(), appended = appended.len(), "read appended records");
    Ok(appended)
}

/// Current on-disk size of a session; `None` when the file is missing.
pub fn session_size(path: &Path) -> Result<Option<u64>, PruneError> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(meta.len())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(PruneError::storage(path, err)),
    }
}

/// Serialize messages as JSONL (one record per line, trailing newline).
pub fn render_session(messages: &[Message]) -> String {
    let mut buf = String::new();
    for message in messages {
        buf.push_str(&message.to_line());
        buf.push('\n');
    }
    buf
}

/// Copy the session to a timestamped sibling `<name>.<stamp>.bak`.
pub fn backup_session(path: &Path) -> Result<PathBuf, PruneError> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "session".to_string());
    let backup = path.with_file_name(format!("{file_name}.{stamp}.bak"));
    fs::copy(path, &backup).map_err(|err| PruneError::storage(&backup, err))?;
    debug!(backup = %backup.display(), "backed up session");
    Ok(backup)
}

/// Write `contents` to `tmp`, flush it to disk, then rename it over `path`.
pub(crate) fn replace_file(path: &Path, tmp: &Path, contents: &[u8]) -> Result<(), PruneError> {
    let mut file = File::create(tmp).map_err(|err| PruneError::storage(tmp, err))?;
    file.write_all(contents)
        .and_then(|()| file.sync_all())
        .map_err(|err| PruneError::storage(tmp, err))?;
    drop(file);
    fs::rename(tmp, path).map_err(|err| PruneError::storage(path, err))?;
    Ok(())
}

/// Atomically replace the session file (temp file + rename).
pub fn write_session(path: &Path, messages: &[Message]) -> Result<(), PruneError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    replace_file(path, &PathBuf::from(tmp), render_session(messages).as_bytes())
}

/// Delete all but the newest `keep` backups of `path`.
///
/// Backup names embed a sortable timestamp, so name order is age order.
pub fn prune_backups(path: &Path, keep: usize) -> Result<usize, PruneError> {
    let Some(name) = path.file_name().map(|name| name.to_string_lossy().into_owned()) else {
        return Ok(0);
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let prefix = format!("{name}.");
    let mut backups: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|err| PruneError::storage(dir, err))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|candidate| {
            candidate
                .file_name()
                .map(|file| file.to_string_lossy())
                .is_some_and(|file| file.starts_with(&prefix) && file.ends_with(".bak"))
        })
        .collect();
    if backups.len() <= keep {
        return Ok(0);
    }
    backups.sort();
    let stale = backups.len() - keep;
    for old in &backups[..stale] {
        fs::remove_file(old).map_err(|err| PruneError::storage(old, err))?;
        debug!(backup = %old.display(), "removed old backup");
    }
    Ok(stale)
}

/// Back up, then replace. A failed backup leaves the session untouched.
pub fn persist_session(path: &Path, messages: &[Message]) -> Result<PathBuf, PruneError> {
    let backup = backup_session(path)?;
    write_session(path, messages)?;
    info!(
        path = %path.display(),
        backup = %backup.display(),
        messages = messages.len(),
        "persisted session"
    );
    Ok(backup)
}
