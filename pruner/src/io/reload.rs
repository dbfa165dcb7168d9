//! Host relaunch after a cleaning cycle.
//!
//! The [`ReloadTrigger`] trait lets the daemon ask for "terminate the host and
//! resume this session" without knowing how. [`HostReloader`] finds the host
//! process by walking up the process tree, spawns a detached watcher that
//! relaunches the host with `--resume` once it has exited, then asks the host
//! to terminate.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::io::process::run_command_with_timeout;

const PS_TIMEOUT: Duration = Duration::from_secs(2);
const PS_OUTPUT_LIMIT: usize = 4096;
/// Ancestors inspected before giving up.
const MAX_DEPTH: usize = 10;
const HOST_MARKERS: &[&str] = &["node", "claude"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Watcher spawned and host asked to exit.
    Scheduled { host_pid: u32 },
    /// No host process found; the session must be resumed by hand.
    HostNotFound,
}

pub trait ReloadTrigger {
    fn reload(&self, session: &Path) -> Result<ReloadOutcome>;
}

/// Relaunches the host CLI in a new terminal.
#[derive(Debug, Clone)]
pub struct HostReloader {
    /// Directory the host is resumed in.
    pub project_dir: PathBuf,
    /// Host executable, `claude` by default.
    pub host_command: String,
}

impl HostReloader {
    pub fn new(project_dir: PathBuf) -> Self {
        Self {
            project_dir,
            host_command: "claude".to_string(),
        }
    }
}

impl ReloadTrigger for HostReloader {
    fn reload(&self, session: &Path) -> Result<ReloadOutcome> {
        let Some(host_pid) = find_host_pid(std::process::id())? else {
            warn!(session = %session.display(), "host process not found; resume manually");
            return Ok(ReloadOutcome::HostNotFound);
        };
        let script = watcher_script(host_pid, &self.project_dir, &self.host_command);
        spawn_detached(&script).context("spawn reload watcher")?;

        let mut kill = Command::new("kill");
        kill.args(["-TERM", &host_pid.to_string()]);
        let output = run_command_with_timeout(kill, PS_TIMEOUT, PS_OUTPUT_LIMIT)?;
        if !output.success() {
            warn!(host_pid, "terminate request to host failed");
        }
        info!(host_pid, session = %session.display(), "scheduled host reload");
        Ok(ReloadOutcome::Scheduled { host_pid })
    }
}

/// `(parent pid, command name)` of `pid`, via `ps`.
fn process_info(pid: u32) -> Result<Option<(u32, String)>> {
    let mut cmd = Command::new("ps");
    cmd.args(["-o", "ppid=,comm=", "-p", &pid.to_string()]);
    let output = run_command_with_timeout(cmd, PS_TIMEOUT, PS_OUTPUT_LIMIT)?;
    if !output.success() {
        return Ok(None);
    }
    Ok(parse_ps_line(&output.stdout_text()))
}

fn parse_ps_line(text: &str) -> Option<(u32, String)> {
    let (ppid, comm) = text.trim().split_once(char::is_whitespace)?;
    let ppid = ppid.parse().ok()?;
    Some((ppid, comm.trim().to_string()))
}

fn is_host_command(comm: &str) -> bool {
    let lower = comm.to_lowercase();
    HOST_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Walk up from `start` to the first ancestor that looks like the host.
fn find_host_pid(start: u32) -> Result<Option<u32>> {
    let mut pid = start;
    for _ in 0..MAX_DEPTH {
        let Some((ppid, comm)) = process_info(pid)? else {
            break;
        };
        if pid != start && is_host_command(&comm) {
            return Ok(Some(pid));
        }
        if ppid <= 1 {
            break;
        }
        pid = ppid;
    }
    Ok(None)
}

fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "'\\''"))
}

fn watcher_script(host_pid: u32, project_dir: &Path, host_command: &str) -> String {
    let dir = shell_quote(&project_dir.to_string_lossy());
    let resume = format!("cd {dir} && {host_command} --resume");
    let launch = if cfg!(target_os = "macos") {
        format!(
            "osascript -e {}",
            shell_quote(&format!(
                "tell application \"Terminal\" to do script \"{}\"",
                resume.replace('"', "\\\"")
            ))
        )
    } else {
        let quoted = shell_quote(&format!("{resume}; exec bash"));
        format!(
            "if command -v gnome-terminal >/dev/null 2>&1; then gnome-terminal -- bash -c {quoted}; \
             elif command -v xterm >/dev/null 2>&1; then xterm -e bash -c {quoted} & fi"
        )
    };
    format!("while kill -0 {host_pid} 2>/dev/null; do sleep 1; done; sleep 1; {launch}")
}

fn spawn_detached(script: &str) -> Result<()> {
    let mut cmd = Command::new("bash");
    cmd.args(["-c", script])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    cmd.spawn().context("spawn bash")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ps_output() {
        assert_eq!(
            parse_ps_line("  4242 node\n"),
            Some((4242, "node".to_string()))
        );
        assert_eq!(parse_ps_line(""), None);
        assert_eq!(parse_ps_line("abc node"), None);
    }

    #[test]
    fn recognizes_host_commands() {
        assert!(is_host_command("node"));
        assert!(is_host_command("Claude"));
        assert!(!is_host_command("bash"));
    }

    #[test]
    fn watcher_waits_for_host_then_resumes() {
        let script = watcher_script(77, Path::new("/work/it's here"), "claude");
        assert!(script.starts_with("while kill -0 77 2>/dev/null; do sleep 1; done;"));
        assert!(script.contains("claude --resume"));
    }

    #[test]
    fn quotes_single_quotes_for_the_shell() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
