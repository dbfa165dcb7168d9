//! Orchestration for `pruner treat`: one prescription over one session.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::core::pipeline::{PipelineOptions, run_pipeline};
use crate::core::registry::{Prescription, resolve_prescription};
use crate::io::config::PrunerConfig;
use crate::io::lock::SessionLock;
use crate::io::session_store::{load_session, persist_session, prune_backups};
use crate::report::{Mode, Report};

#[derive(Debug, Clone)]
pub struct TreatRequest<'a> {
    pub session: &'a Path,
    pub prescription: &'a str,
    pub mode: Mode,
    pub options: PipelineOptions,
}

/// Run a prescription. Dry-run never writes; execute mode writes under the
/// session lock after a backup, and only when something changed.
///
/// A strict run that stops early is written only with `persist_partial`;
/// the report carries the abort reason either way.
pub fn treat_session(request: &TreatRequest<'_>, config: &PrunerConfig) -> Result<Report> {
    let prescription = resolve_prescription(request.prescription, &config.prescriptions)?;
    treat_with_prescription(request, &prescription, config)
}

pub(crate) fn treat_with_prescription(
    request: &TreatRequest<'_>,
    prescription: &Prescription,
    config: &PrunerConfig,
) -> Result<Report> {
    let _lock = match request.mode {
        Mode::Execute => Some(SessionLock::acquire(
            request.session,
            config.guard.lock_timeout(),
        )?),
        Mode::DryRun => None,
    };

    let messages = load_session(request.session)?;
    let run = run_pipeline(messages, prescription, &config.strategies, request.options)
        .with_context(|| format!("treat {}", request.session.display()))?;

    let report = Report::from_run(&run, request.mode);
    if request.mode == Mode::DryRun || !run.changed() || !run.may_persist(request.options) {
        return Ok(report);
    }

    let backup = persist_session(request.session, &run.messages)?;
    prune_backups(request.session, config.pipeline.keep_backups)?;
    info!(
        session = %request.session.display(),
        prescription = %run.prescription,
        bytes_saved = run.bytes_saved(),
        aborted = run.aborted.as_deref().unwrap_or(""),
        "treated session"
    );
    Ok(report.with_backup(Some(&backup)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::lookup;
    use crate::error::PruneError;
    use crate::io::session_store::session_size;
    use crate::session::MessageKind;
    use crate::test_support::{FAILING_STRATEGY, scenario_session, write_session_file};

    fn request(session: &Path, mode: Mode) -> TreatRequest<'_> {
        TreatRequest {
            session,
            prescription: "standard",
            mode,
            options: PipelineOptions::default(),
        }
    }

    #[test]
    fn dry_run_leaves_file_untouched() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("s.jsonl");
        write_session_file(&path, &scenario_session()).expect("seed");
        let before = std::fs::read(&path).expect("read");

        let report = treat_session(&request(&path, Mode::DryRun), &PrunerConfig::default())
            .expect("treat");
        assert!(report.bytes_saved > 0);
        assert!(!report.persisted);
        assert_eq!(std::fs::read(&path).expect("read"), before);
    }

    #[test]
    fn execute_matches_dry_run_prediction() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("s.jsonl");
        write_session_file(&path, &scenario_session()).expect("seed");
        let config = PrunerConfig::default();

        let predicted = treat_session(&request(&path, Mode::DryRun), &config).expect("dry");
        let applied = treat_session(&request(&path, Mode::Execute), &config).expect("execute");
        assert!(applied.persisted);
        assert_eq!(applied.after_bytes, predicted.after_bytes);
        assert_eq!(
            session_size(&path).expect("size"),
            Some(predicted.after_bytes as u64)
        );
    }

    #[test]
    fn unknown_prescription_fails_before_touching_storage() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("absent.jsonl");
        let mut req = request(&path, Mode::Execute);
        req.prescription = "nonsense";
        let err = treat_session(&req, &PrunerConfig::default()).expect_err("config");
        assert!(matches!(
            err.downcast_ref::<PruneError>(),
            Some(PruneError::Config(_))
        ));
        assert!(!temp.path().join("absent.jsonl.lock").exists());
    }

    fn collapse_then_fail() -> Prescription {
        Prescription {
            name: "partial".to_string(),
            strategies: vec![
                lookup("progress-collapse").expect("registered"),
                &FAILING_STRATEGY,
            ],
        }
    }

    fn progress_count(path: &Path) -> usize {
        load_session(path)
            .expect("load")
            .iter()
            .filter(|m| m.kind() == MessageKind::Progress)
            .count()
    }

    #[test]
    fn strict_abort_writes_nothing_by_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("s.jsonl");
        write_session_file(&path, &scenario_session()).expect("seed");
        let before = std::fs::read(&path).expect("read");

        let mut req = request(&path, Mode::Execute);
        req.options.strict = true;
        let report = treat_with_prescription(&req, &collapse_then_fail(), &PrunerConfig::default())
            .expect("treat");
        assert!(report.aborted.is_some());
        assert!(!report.persisted);
        assert_eq!(std::fs::read(&path).expect("read"), before);
    }

    #[test]
    fn strict_abort_persists_partial_state_when_allowed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("s.jsonl");
        write_session_file(&path, &scenario_session()).expect("seed");
        let progress_before = progress_count(&path);

        let mut req = request(&path, Mode::Execute);
        req.options = PipelineOptions {
            strict: true,
            persist_partial: true,
        };
        let report = treat_with_prescription(&req, &collapse_then_fail(), &PrunerConfig::default())
            .expect("treat");
        assert!(report.aborted.as_deref().is_some_and(|r| r.contains("always-fails")));
        assert!(report.persisted);
        assert!(report.backup.is_some());
        assert!(progress_count(&path) < progress_before);
        assert_eq!(
            session_size(&path).expect("size"),
            Some(report.after_bytes as u64)
        );
    }

    #[test]
    fn execute_keeps_only_the_configured_backups() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("s.jsonl");
        let mut config = PrunerConfig::default();
        config.pipeline.keep_backups = 1;
        for _ in 0..3 {
            write_session_file(&path, &scenario_session()).expect("seed");
            let report = treat_session(&request(&path, Mode::Execute), &config).expect("treat");
            assert!(report.persisted);
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let backups = std::fs::read_dir(temp.path())
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".bak"))
            .count();
        assert_eq!(backups, 1);
    }
}
