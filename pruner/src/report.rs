//! Treatment report: human-readable table and JSON.

use std::fmt::Write as _;
use std::path::Path;

use serde::Serialize;

use crate::core::pipeline::PipelineRun;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    DryRun,
    Execute,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::DryRun => "dry-run",
            Mode::Execute => "execute",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyLine {
    pub name: String,
    pub bytes_saved: usize,
    /// Share of the session's original size.
    pub percent: f64,
    pub removed: usize,
    pub modified: usize,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub prescription: String,
    pub mode: Mode,
    pub before_bytes: usize,
    pub before_messages: usize,
    pub after_bytes: usize,
    pub after_messages: usize,
    pub bytes_saved: usize,
    pub percent_saved: f64,
    pub strategies: Vec<StrategyLine>,
    pub aborted: Option<String>,
    pub persisted: bool,
    pub backup: Option<String>,
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

impl Report {
    pub fn from_run(run: &PipelineRun, mode: Mode) -> Self {
        let strategies = run
            .strategies
            .iter()
            .map(|entry| StrategyLine {
                name: entry.result.strategy.clone(),
                bytes_saved: entry.result.bytes_saved,
                percent: percent(entry.result.bytes_saved, run.before_bytes),
                removed: entry.result.removed,
                modified: entry.result.modified,
                warnings: entry.result.warnings.clone(),
                error: entry.error.clone(),
            })
            .collect();
        Self {
            prescription: run.prescription.clone(),
            mode,
            before_bytes: run.before_bytes,
            before_messages: run.before_count,
            after_bytes: run.after_bytes(),
            after_messages: run.after_count(),
            bytes_saved: run.bytes_saved(),
            percent_saved: percent(run.bytes_saved(), run.before_bytes),
            strategies,
            aborted: run.aborted.clone(),
            persisted: false,
            backup: None,
        }
    }

    pub fn with_backup(mut self, backup: Option<&Path>) -> Self {
        self.persisted = backup.is_some();
        self.backup = backup.map(|path| path.display().to_string());
        self
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Prescription: {} ({})", self.prescription, self.mode.as_str());
        let _ = writeln!(
            out,
            "Before: {} ({} messages)",
            format_bytes(self.before_bytes),
            self.before_messages
        );
        let _ = writeln!(
            out,
            "After:  {} ({} messages)",
            format_bytes(self.after_bytes),
            self.after_messages
        );
        let _ = writeln!(
            out,
            "Saved:  {} ({:.1}%)",
            format_bytes(self.bytes_saved),
            self.percent_saved
        );
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "  {:<24} {:>10} {:>7} {:>8} {:>8}",
            "strategy", "saved", "pct", "removed", "modified"
        );
        for line in &self.strategies {
            let _ = writeln!(
                out,
                "  {:<24} {:>10} {:>6.1}% {:>8} {:>8}",
                line.name,
                format_bytes(line.bytes_saved),
                line.percent,
                line.removed,
                line.modified
            );
            if let Some(error) = &line.error {
                let _ = writeln!(out, "    error: {error}");
            }
            for warning in &line.warnings {
                let _ = writeln!(out, "    warning: {warning}");
            }
        }
        if let Some(reason) = &self.aborted {
            let _ = writeln!(out, "\nAborted: {reason}");
        }
        match (&self.mode, &self.backup) {
            (Mode::DryRun, _) => {
                let _ = writeln!(out, "\nDry run: nothing written. Re-run with --execute to apply.");
            }
            (Mode::Execute, Some(backup)) => {
                let _ = writeln!(out, "\nWritten. Backup: {backup}");
            }
            (Mode::Execute, None) => {
                let _ = writeln!(out, "\nNothing written.");
            }
        }
        out
    }
}

/// Human-readable size with one decimal.
pub fn format_bytes(bytes: usize) -> String {
    const KB: f64 = 1024.0;
    let value = bytes as f64;
    if value >= KB * KB {
        format!("{:.1} MB", value / (KB * KB))
    } else if value >= KB {
        format!("{:.1} KB", value / KB)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipeline::{PipelineOptions, run_pipeline};
    use crate::core::registry::resolve_prescription;
    use crate::core::types::StrategyConfig;
    use crate::test_support::scenario_session;
    use std::collections::BTreeMap;

    fn gentle_report() -> Report {
        let rx = resolve_prescription("gentle", &BTreeMap::new()).expect("rx");
        let run = run_pipeline(
            scenario_session(),
            &rx,
            &StrategyConfig::default(),
            PipelineOptions::default(),
        )
        .expect("run");
        Report::from_run(&run, Mode::DryRun)
    }

    #[test]
    fn formats_sizes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn report_percentages_sum_to_total() {
        let report = gentle_report();
        let sum: f64 = report.strategies.iter().map(|s| s.percent).sum();
        assert!((sum - report.percent_saved).abs() < 1e-9);
        assert_eq!(report.before_messages - report.after_messages, 39);
    }

    #[test]
    fn text_and_json_views() {
        let report = gentle_report();
        let text = report.render_text();
        assert!(text.starts_with("Prescription: gentle (dry-run)\n"));
        assert!(text.contains("progress-collapse"));
        assert!(text.contains("Dry run: nothing written"));

        let json: serde_json::Value =
            serde_json::from_str(&report.to_json().expect("json")).expect("parse");
        assert_eq!(json["mode"], "dry-run");
        assert_eq!(json["strategies"][0]["name"], "progress-collapse");
        assert_eq!(json["strategies"][0]["removed"], 39);
    }
}
