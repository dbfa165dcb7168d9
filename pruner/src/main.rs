//! Session transcript pruner.
//!
//! Treats JSONL session files with tiered reduction strategies and guards
//! live sessions against the host's own lossy compaction.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pruner::core::pipeline::PipelineOptions;
use pruner::core::recap::{DEFAULT_MAX_TURNS, render_recap};
use pruner::core::registry::{STRATEGIES, tier_strategies};
use pruner::core::team::extract_team_state;
use pruner::core::types::Tier;
use pruner::daemon::{CycleOutcome, DaemonContext, GuardSettings, GuardStop};
use pruner::exit_codes;
use pruner::io::checkpoint::{
    Checkpoint, checkpoint_path, load_checkpoint, write_checkpoint_with_retry,
};
use pruner::io::config::{DEFAULT_CONFIG_PATH, PrunerConfig, load_config};
use pruner::io::reload::HostReloader;
use pruner::io::render::checkpoint_markdown;
use pruner::io::session_store::load_session;
use pruner::logging;
use pruner::report::{Mode, format_bytes};
use pruner::treat::{TreatRequest, treat_session};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "pruner",
    version,
    about = "Prune agent session transcripts without losing team state"
)]
struct Cli {
    /// Config file; a missing file means defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered strategies and prescriptions.
    Strategies,
    /// Run a prescription over a session (dry-run unless --execute).
    Treat {
        session: PathBuf,
        /// Prescription: a tier name or a custom prescription from the config.
        #[arg(long, default_value = "standard")]
        rx: String,
        /// Write the result (a backup is taken first).
        #[arg(long)]
        execute: bool,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
        /// Abort on the first strategy failure.
        #[arg(long)]
        strict: bool,
    },
    /// Watch a session and clean it before it hits the size threshold.
    Guard {
        session: PathBuf,
        #[arg(long)]
        threshold_mb: Option<f64>,
        /// Seconds between size checks.
        #[arg(long)]
        interval: Option<u64>,
        #[arg(long)]
        rx: Option<String>,
        /// Do not restart the host after a cleaning cycle.
        #[arg(long)]
        no_reload: bool,
    },
    /// Write the team checkpoint now, or print the existing one.
    Checkpoint {
        session: PathBuf,
        /// Print the existing checkpoint as markdown instead of writing.
        #[arg(long)]
        show: bool,
    },
    /// Print a compact recap of the conversation.
    Recap {
        session: PathBuf,
        #[arg(long, default_value_t = DEFAULT_MAX_TURNS as u64, value_parser = clap::value_parser!(u64).range(6..))]
        max_turns: u64,
    },
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(exit_codes::for_error(&err));
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    match cli.command {
        Command::Strategies => cmd_strategies(&config),
        Command::Treat {
            session,
            rx,
            execute,
            json,
            strict,
        } => cmd_treat(&config, &session, &rx, execute, json, strict),
        Command::Guard {
            session,
            threshold_mb,
            interval,
            rx,
            no_reload,
        } => {
            let mut config = config;
            if let Some(threshold_mb) = threshold_mb {
                config.guard.threshold_mb = threshold_mb;
            }
            if let Some(interval) = interval {
                config.guard.interval_secs = interval;
            }
            if let Some(rx) = rx {
                config.guard.prescription = rx;
            }
            if no_reload {
                config.guard.auto_reload = false;
            }
            config.validate()?;
            cmd_guard(&config, &session)
        }
        Command::Checkpoint { session, show } => cmd_checkpoint(&config, &session, show),
        Command::Recap { session, max_turns } => {
            let max_turns = usize::try_from(max_turns).context("--max-turns out of range")?;
            cmd_recap(&session, max_turns)
        }
    }
}

fn cmd_strategies(config: &PrunerConfig) -> Result<()> {
    println!("{:<24} {:<11} {:<8} description", "strategy", "tier", "saves");
    for descriptor in STRATEGIES {
        println!(
            "{:<24} {:<11} {:<8} {}",
            descriptor.name,
            descriptor.tier.as_str(),
            descriptor.estimate,
            descriptor.description
        );
    }
    println!();
    println!("prescriptions:");
    for tier in Tier::ALL {
        let names: Vec<&str> = tier_strategies(tier).iter().map(|d| d.name).collect();
        println!("  {:<12} {}", tier.as_str(), names.join(", "));
    }
    for (name, strategies) in &config.prescriptions {
        println!("  {:<12} {}", name, strategies.join(", "));
    }
    Ok(())
}

fn cmd_treat(
    config: &PrunerConfig,
    session: &Path,
    rx: &str,
    execute: bool,
    json: bool,
    strict: bool,
) -> Result<()> {
    let request = TreatRequest {
        session,
        prescription: rx,
        mode: if execute { Mode::Execute } else { Mode::DryRun },
        options: PipelineOptions {
            strict: strict || config.pipeline.strict,
            persist_partial: config.pipeline.persist_partial,
        },
    };
    let report = treat_session(&request, config)?;
    if json {
        println!("{}", report.to_json().context("serialize report")?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

fn cmd_guard(config: &PrunerConfig, session: &Path) -> Result<()> {
    let settings = GuardSettings::from_config(session, config)?;
    let project_dir = std::env::current_dir().context("resolve current directory")?;
    let mut daemon = DaemonContext::new(settings, HostReloader::new(project_dir));

    let stop = daemon.stop_handle();
    ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
        .context("install stop handler")?;

    info!(
        session = %session.display(),
        threshold_bytes = daemon.settings().threshold_bytes,
        prescription = %daemon.settings().prescription.name,
        "guard started"
    );
    let outcome = daemon.run(|cycle| match cycle {
        CycleOutcome::Cleaned(report) | CycleOutcome::Reloading { report, .. } => {
            println!(
                "cycle {}: {} -> {}, checkpoint {}",
                report.cycle,
                format_bytes(report.before_bytes),
                format_bytes(report.after_bytes),
                report.checkpoint.display()
            );
            if let Some(reason) = &report.aborted {
                println!("  kept partial result: {reason}");
            }
        }
        CycleOutcome::Idle { .. }
        | CycleOutcome::Missing
        | CycleOutcome::Skipped
        | CycleOutcome::Unreclaimable { .. } => {}
    })?;

    match outcome.stop {
        GuardStop::Stopped => println!("guard stopped after {} cycle(s)", outcome.cycles),
        GuardStop::Reloaded { host_pid } => {
            println!("host {host_pid} is reloading; guard exiting");
        }
    }
    Ok(())
}

fn cmd_checkpoint(config: &PrunerConfig, session: &Path, show: bool) -> Result<()> {
    let path = checkpoint_path(session);
    if show {
        let checkpoint = load_checkpoint(&path)?;
        print!("{}", checkpoint_markdown(&checkpoint)?);
        return Ok(());
    }

    let messages = load_session(session)?;
    let snapshot = extract_team_state(&messages);
    if snapshot.is_empty() {
        println!("no team state found in {}", session.display());
        return Ok(());
    }
    let checkpoint = Checkpoint::new(session.display().to_string(), snapshot);
    write_checkpoint_with_retry(&path, &checkpoint, config.guard.retry_policy())?;
    println!("{}", path.display());
    Ok(())
}

fn cmd_recap(session: &Path, max_turns: usize) -> Result<()> {
    let messages = load_session(session)?;
    let recap = render_recap(&messages, max_turns);
    if recap.is_empty() {
        println!("no conversation turns in {}", session.display());
    } else {
        print!("{recap}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_treat_defaults_to_dry_run() {
        let cli = Cli::parse_from(["pruner", "treat", "s.jsonl"]);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        match cli.command {
            Command::Treat {
                rx, execute, json, ..
            } => {
                assert_eq!(rx, "standard");
                assert!(!execute);
                assert!(!json);
            }
            _ => panic!("expected treat"),
        }
    }

    #[test]
    fn parse_guard_overrides() {
        let cli = Cli::parse_from([
            "pruner",
            "guard",
            "s.jsonl",
            "--threshold-mb",
            "12.5",
            "--interval",
            "5",
            "--no-reload",
            "--config",
            "alt.toml",
        ]);
        assert_eq!(cli.config, PathBuf::from("alt.toml"));
        match cli.command {
            Command::Guard {
                threshold_mb,
                interval,
                no_reload,
                rx,
                ..
            } => {
                assert_eq!(threshold_mb, Some(12.5));
                assert_eq!(interval, Some(5));
                assert!(no_reload);
                assert_eq!(rx, None);
            }
            _ => panic!("expected guard"),
        }
    }

    #[test]
    fn recap_rejects_tiny_turn_limits() {
        assert!(Cli::try_parse_from(["pruner", "recap", "s.jsonl", "--max-turns", "2"]).is_err());
    }
}
