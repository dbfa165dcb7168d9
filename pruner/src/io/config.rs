//! Pruner configuration stored under `.pruner/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::registry::{STRATEGIES, validate_custom_prescriptions, validate_registry};
use crate::core::types::StrategyConfig;
use crate::error::PruneError;
use crate::io::checkpoint::RetryPolicy;
use crate::io::session_store::replace_file;

pub const DEFAULT_CONFIG_PATH: &str = ".pruner/config.toml";

/// Pruner configuration (TOML).
///
/// Every section is optional; missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PrunerConfig {
    pub pipeline: PipelineConfig,
    pub guard: GuardConfig,
    pub strategies: StrategyConfig,
    /// Custom prescriptions: name -> ordered strategy names.
    pub prescriptions: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Abort the remaining strategies when one fails.
    pub strict: bool,
    /// On a strict abort, still write the last validated state.
    pub persist_partial: bool,
    /// Session backups kept beside the session; older ones are deleted.
    pub keep_backups: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            strict: false,
            persist_partial: false,
            keep_backups: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GuardConfig {
    /// Clean once the session grows past this many megabytes.
    pub threshold_mb: f64,
    pub interval_secs: u64,
    pub prescription: String,
    /// Relaunch the host after a cleaning cycle.
    pub auto_reload: bool,
    pub checkpoint_retries: u32,
    pub checkpoint_backoff_ms: u64,
    /// How long a writer waits for the session lock.
    pub lock_timeout_secs: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            threshold_mb: 50.0,
            interval_secs: 30,
            prescription: "standard".to_string(),
            auto_reload: true,
            checkpoint_retries: 3,
            checkpoint_backoff_ms: 250,
            lock_timeout_secs: 10,
        }
    }
}

impl GuardConfig {
    pub fn threshold_bytes(&self) -> u64 {
        (self.threshold_mb * 1024.0 * 1024.0) as u64
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.checkpoint_retries,
            initial_backoff: Duration::from_millis(self.checkpoint_backoff_ms),
        }
    }
}

impl PrunerConfig {
    pub fn validate(&self) -> Result<(), PruneError> {
        if !(self.guard.threshold_mb.is_finite() && self.guard.threshold_mb > 0.0) {
            return Err(PruneError::config("guard.threshold_mb must be > 0"));
        }
        if self.pipeline.keep_backups == 0 {
            return Err(PruneError::config("pipeline.keep_backups must be >= 1"));
        }
        if self.guard.interval_secs == 0 {
            return Err(PruneError::config("guard.interval_secs must be > 0"));
        }
        if self.guard.prescription.trim().is_empty() {
            return Err(PruneError::config("guard.prescription must be non-empty"));
        }
        self.strategies.validate().map_err(PruneError::Config)?;

        let mut violations = validate_registry(STRATEGIES);
        violations.extend(validate_custom_prescriptions(&self.prescriptions));
        if !violations.is_empty() {
            return Err(PruneError::config(violations.join("; ")));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PrunerConfig::default()`.
pub fn load_config(path: &Path) -> Result<PrunerConfig> {
    if !path.exists() {
        let cfg = PrunerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PrunerConfig = toml::from_str(&contents)
        .map_err(|err| PruneError::config(format!("parse {}: {err}", path.display())))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PrunerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    replace_file(path, &tmp_path, contents.as_bytes())
        .with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
