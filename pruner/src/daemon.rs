//! Guard daemon: poll a session's size and clean it before the host's own
//! lossy compaction kicks in.
//!
//! One cycle, once the threshold is crossed and under the session lock:
//! load, extract team state, run the prescription, checkpoint the team
//! state, inject the snapshot pair, persist (backup first), and optionally
//! ask the host to reload.
//!
//! The host does not take the session lock and keeps appending while a
//! cycle runs. Records that land after the load are carried over behind the
//! cleaned sequence before the write.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::core::lineage::append_late_records;
use crate::core::pipeline::{PipelineOptions, run_pipeline};
use crate::core::registry::{Prescription, resolve_prescription};
use crate::core::team::{RecoveryNote, TeamSnapshot, extract_team_state, inject_snapshot};
use crate::core::types::StrategyConfig;
use crate::error::PruneError;
use crate::io::checkpoint::{
    Checkpoint, RetryPolicy, checkpoint_path, clean_stale_tmp, write_checkpoint_with_retry,
};
use crate::io::config::PrunerConfig;
use crate::io::lock::SessionLock;
use crate::io::reload::{ReloadOutcome, ReloadTrigger};
use crate::io::render::recovery_text;
use crate::io::session_store::{
    backup_session, load_session_extent, prune_backups, read_appended, session_size,
    write_session,
};
use crate::session::total_size;

/// Sleep granularity while waiting for the next tick.
const STOP_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Idle,
    Checking,
    Cleaning,
    Checkpointing,
    Injecting,
    Reloading,
}

/// Checkpoint writes kept failing after every retry. Stops the daemon.
#[derive(Debug, Error)]
#[error("checkpoint {} could not be written", path.display())]
pub struct CheckpointFault {
    pub path: PathBuf,
    #[source]
    pub source: PruneError,
}

/// Resolved daemon settings.
#[derive(Debug, Clone)]
pub struct GuardSettings {
    pub session: PathBuf,
    pub threshold_bytes: u64,
    pub interval: Duration,
    pub prescription: Prescription,
    pub strategies: StrategyConfig,
    pub options: PipelineOptions,
    pub auto_reload: bool,
    pub retry: RetryPolicy,
    pub lock_timeout: Duration,
    /// Session backups kept after each cycle.
    pub keep_backups: usize,
}

impl GuardSettings {
    pub fn from_config(session: &Path, config: &PrunerConfig) -> Result<Self, PruneError> {
        let prescription = resolve_prescription(&config.guard.prescription, &config.prescriptions)?;
        Ok(Self {
            session: session.to_path_buf(),
            threshold_bytes: config.guard.threshold_bytes(),
            interval: config.guard.interval(),
            prescription,
            strategies: config.strategies.clone(),
            options: PipelineOptions {
                strict: config.pipeline.strict,
                persist_partial: config.pipeline.persist_partial,
            },
            auto_reload: config.guard.auto_reload,
            retry: config.guard.retry_policy(),
            lock_timeout: config.guard.lock_timeout(),
            keep_backups: config.pipeline.keep_backups,
        })
    }
}

/// What one cleaning cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub before_bytes: usize,
    pub after_bytes: usize,
    pub checkpoint: PathBuf,
    pub backup: PathBuf,
    pub team_name: String,
    pub team_messages: usize,
    pub injected: bool,
    /// Records the host appended while the cycle ran.
    pub late_records: usize,
    /// Set when a strict run stopped early and its partial state was kept.
    pub aborted: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Below the threshold.
    Idle { size: u64 },
    /// Session file not found; nothing to do this tick.
    Missing,
    /// A cycle was already in flight.
    Skipped,
    /// Over the threshold, but the prescription finds nothing left to remove
    /// and the team state is already injected. Nothing is written.
    Unreclaimable { size: u64 },
    Cleaned(CycleReport),
    /// Cleaned, and the host was asked to reload. Ends the daemon.
    Reloading { report: CycleReport, host_pid: u32 },
}

/// Why [`DaemonContext::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardStop {
    /// Stop signal received.
    Stopped,
    Reloaded { host_pid: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardOutcome {
    pub cycles: u64,
    pub stop: GuardStop,
}

/// Clears the in-flight flag when a cycle ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Daemon state, cycle counter and control flags.
pub struct DaemonContext<R: ReloadTrigger> {
    settings: GuardSettings,
    reloader: R,
    state: DaemonState,
    cycles: u64,
    /// Team state injected by the last cycle.
    last_snapshot: Option<TeamSnapshot>,
    /// Set for the duration of a cycle. `tick` takes `&mut self`, so only a
    /// caller holding [`in_flight_handle`](Self::in_flight_handle), such as
    /// an external scheduler, can observe or trip it.
    in_flight: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

impl<R: ReloadTrigger> DaemonContext<R> {
    pub fn new(settings: GuardSettings, reloader: R) -> Self {
        Self {
            settings,
            reloader,
            state: DaemonState::Idle,
            cycles: 0,
            last_snapshot: None,
            in_flight: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn settings(&self) -> &GuardSettings {
        &self.settings
    }

    pub fn state(&self) -> DaemonState {
        self.state
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Flag that ends [`run`](Self::run) between ticks once set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Flag held while a cleaning cycle runs. Setting it from outside makes
    /// the next tick return [`CycleOutcome::Skipped`].
    pub fn in_flight_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.in_flight)
    }

    fn enter(&mut self, state: DaemonState) {
        debug!(from = ?self.state, to = ?state, "guard state");
        self.state = state;
    }

    /// One poll: check the size and clean if it is over the threshold.
    pub fn tick(&mut self) -> Result<CycleOutcome> {
        let in_flight = Arc::clone(&self.in_flight);
        if in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("cycle already in flight; skipping tick");
            return Ok(CycleOutcome::Skipped);
        }
        let _in_flight = InFlight(&in_flight);

        let outcome = self.check_and_clean();
        if !matches!(outcome, Ok(CycleOutcome::Reloading { .. })) {
            self.enter(DaemonState::Idle);
        }
        outcome
    }

    fn check_and_clean(&mut self) -> Result<CycleOutcome> {
        self.enter(DaemonState::Checking);
        let session = self.settings.session.clone();
        let Some(size) = session_size(&session)? else {
            warn!(session = %session.display(), "session file missing");
            return Ok(CycleOutcome::Missing);
        };
        if size < self.settings.threshold_bytes {
            debug!(size, threshold = self.settings.threshold_bytes, "below threshold");
            return Ok(CycleOutcome::Idle { size });
        }
        info!(
            size,
            threshold = self.settings.threshold_bytes,
            "threshold crossed; cleaning"
        );

        let _lock = SessionLock::acquire(&session, self.settings.lock_timeout)?;
        let Some(report) = self.clean(&session)? else {
            warn!(
                size,
                threshold = self.settings.threshold_bytes,
                prescription = %self.settings.prescription.name,
                "nothing left to prune; threshold cannot be reached with this prescription"
            );
            return Ok(CycleOutcome::Unreclaimable { size });
        };
        self.cycles += 1;

        if !self.settings.auto_reload {
            return Ok(CycleOutcome::Cleaned(report));
        }
        self.enter(DaemonState::Reloading);
        match self.reloader.reload(&session)? {
            ReloadOutcome::Scheduled { host_pid } => {
                Ok(CycleOutcome::Reloading { report, host_pid })
            }
            ReloadOutcome::HostNotFound => Ok(CycleOutcome::Cleaned(report)),
        }
    }

    /// Clean the session. `None` when there is nothing to do.
    fn clean(&mut self, session: &Path) -> Result<Option<CycleReport>> {
        let mut loaded = load_session_extent(session)?;
        let original = loaded.messages.clone();
        let snapshot = extract_team_state(&original);

        self.enter(DaemonState::Cleaning);
        let run = run_pipeline(
            std::mem::take(&mut loaded.messages),
            &self.settings.prescription,
            &self.settings.strategies,
            self.settings.options,
        )?;
        if !run.may_persist(self.settings.options) {
            let err = match run.abort_error() {
                Some(err) => anyhow::Error::new(err),
                None => anyhow::anyhow!("{}", run.aborted.as_deref().unwrap_or("unknown reason")),
            };
            return Err(err.context(format!("cleaning {} aborted", session.display())));
        }
        if !run.changed()
            && self
                .last_snapshot
                .as_ref()
                .is_some_and(|last| last.same_state(&snapshot))
        {
            return Ok(None);
        }

        self.enter(DaemonState::Checkpointing);
        let checkpoint = checkpoint_path(session);
        clean_stale_tmp(&checkpoint)?;
        let record = Checkpoint::new(session.display().to_string(), snapshot.clone());
        write_checkpoint_with_retry(&checkpoint, &record, self.settings.retry).map_err(
            |source| CheckpointFault {
                path: checkpoint.clone(),
                source,
            },
        )?;

        self.enter(DaemonState::Injecting);
        let text = recovery_text(&snapshot).context("render recovery text")?;
        let checkpoint_display = checkpoint.display().to_string();
        let note = RecoveryNote {
            recovery_text: &text,
            checkpoint_path: Some(&checkpoint_display),
            now: Utc::now(),
        };
        let before_bytes = run.before_bytes;
        let aborted = run.aborted.clone();
        let mut injection = inject_snapshot(run.messages, &snapshot, &note);

        let backup = backup_session(session)?;
        let late = read_appended(session, &loaded)
            .with_context(|| format!("carry over records appended to {}", session.display()))?;
        let late_records = late.len();
        if late_records > 0 {
            append_late_records(&original, &mut injection.messages, late);
        }
        write_session(session, &injection.messages)?;
        prune_backups(session, self.settings.keep_backups)?;
        let after_bytes = total_size(&injection.messages);

        info!(
            before_bytes,
            after_bytes,
            backup = %backup.display(),
            team = %snapshot.team_name,
            injected = injection.injected,
            superseded = injection.superseded,
            late_records,
            "cleaning cycle complete"
        );
        let report = CycleReport {
            cycle: self.cycles + 1,
            before_bytes,
            after_bytes,
            checkpoint,
            backup,
            team_name: snapshot.team_name.clone(),
            team_messages: snapshot.message_count,
            injected: injection.injected,
            late_records,
            aborted,
        };
        self.last_snapshot = Some(snapshot);
        Ok(Some(report))
    }

    /// Tick every interval until stopped, reloaded, or a checkpoint fault.
    ///
    /// Other cycle errors are logged and the loop continues.
    pub fn run<F: FnMut(&CycleOutcome)>(&mut self, mut on_cycle: F) -> Result<GuardOutcome> {
        loop {
            if !self.sleep_interval() {
                return Ok(self.outcome(GuardStop::Stopped));
            }
            match self.tick() {
                Ok(CycleOutcome::Reloading { report, host_pid }) => {
                    on_cycle(&CycleOutcome::Reloading { report, host_pid });
                    return Ok(self.outcome(GuardStop::Reloaded { host_pid }));
                }
                Ok(outcome) => on_cycle(&outcome),
                Err(err) if err.downcast_ref::<CheckpointFault>().is_some() => {
                    error!(error = %format!("{err:#}"), "persistent checkpoint fault; stopping guard");
                    return Err(err);
                }
                Err(err) => {
                    error!(error = %format!("{err:#}"), "guard cycle failed");
                }
            }
        }
    }

    fn outcome(&self, stop: GuardStop) -> GuardOutcome {
        GuardOutcome {
            cycles: self.cycles,
            stop,
        }
    }

    /// Sleep one interval. Returns false if the stop flag was set.
    fn sleep_interval(&self) -> bool {
        let deadline = Instant::now() + self.settings.interval;
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(STOP_POLL.min(deadline - now));
        }
    }
}
