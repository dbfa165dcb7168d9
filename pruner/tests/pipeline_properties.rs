//! Whole-prescription properties over the fixture session.
//!
//! Runs every tier through the real strategy table and checks the
//! guarantees callers depend on: protected messages survive, parent links
//! stay connected, savings add up, and a second run is a no-op.

use std::collections::HashSet;

use pruner::core::pipeline::{PipelineOptions, PipelineRun, run_pipeline};
use pruner::core::protection::is_protected;
use pruner::core::registry::resolve_prescription;
use pruner::core::types::{StrategyConfig, Tier};
use pruner::io::config::PrunerConfig;
use pruner::io::session_store::load_session;
use pruner::report::Mode;
use pruner::session::{Message, tool_result_text};
use pruner::test_support::{scenario_session, write_session_file};
use pruner::treat::{TreatRequest, treat_session};

/// Line of the 720-line tool output in the fixture.
const BIG_OUTPUT_LINE: usize = 47;

fn run_tier(messages: Vec<Message>, tier: Tier) -> PipelineRun {
    let prescription =
        resolve_prescription(tier.as_str(), &Default::default()).expect("prescription");
    run_pipeline(
        messages,
        &prescription,
        &StrategyConfig::default(),
        PipelineOptions::default(),
    )
    .expect("pipeline")
}

fn by_line(messages: &[Message], line: usize) -> &Message {
    messages
        .iter()
        .find(|m| m.line == line)
        .unwrap_or_else(|| panic!("line {line} missing"))
}

#[test]
fn gentle_collapses_progress_and_leaves_team_state() {
    let input = scenario_session();
    let run = run_tier(input.clone(), Tier::Gentle);

    let removed: usize = run.strategies.iter().map(|s| s.result.removed).sum();
    assert_eq!(removed, 39);
    assert_eq!(run.after_count(), 61);

    for line in 1..=5 {
        assert_eq!(
            by_line(&run.messages, line).to_line(),
            by_line(&input, line).to_line(),
            "team message at line {line} changed"
        );
    }
    assert_eq!(
        by_line(&run.messages, BIG_OUTPUT_LINE).to_line(),
        by_line(&input, BIG_OUTPUT_LINE).to_line()
    );
}

#[test]
fn aggressive_trims_the_large_output_to_the_cap() {
    let input = scenario_session();
    let original = tool_result_text(&by_line(&input, BIG_OUTPUT_LINE).blocks()[0]);
    assert!(original.len() > 40_000);

    let run = run_tier(input, Tier::Aggressive);
    let trimmed = tool_result_text(&by_line(&run.messages, BIG_OUTPUT_LINE).blocks()[0]);
    assert!(trimmed.len() <= 8 * 1024, "{} bytes left", trimmed.len());
    assert!(trimmed.lines().count() <= 100);
    assert!(trimmed.starts_with("compiling crate number 0000"));
}

#[test]
fn protected_messages_never_decrease() {
    let input = scenario_session();
    let protected_in = input.iter().filter(|m| is_protected(m)).count();
    assert!(protected_in >= 5);
    for tier in Tier::ALL {
        let run = run_tier(input.clone(), tier);
        let protected_out = run.messages.iter().filter(|m| is_protected(m)).count();
        assert!(protected_out >= protected_in, "{} dropped protected", tier.as_str());
    }
}

#[test]
fn parent_links_resolve_to_survivors() {
    for tier in Tier::ALL {
        let run = run_tier(scenario_session(), tier);
        let ids: HashSet<&str> = run.messages.iter().filter_map(Message::id).collect();
        for message in &run.messages {
            if let Some(parent) = message.parent_id() {
                assert!(
                    ids.contains(parent),
                    "{}: line {} points at removed {parent}",
                    tier.as_str(),
                    message.line
                );
            }
        }
    }
}

#[test]
fn per_strategy_savings_add_up() {
    for tier in Tier::ALL {
        let run = run_tier(scenario_session(), tier);
        let summed: usize = run.strategies.iter().map(|s| s.result.bytes_saved).sum();
        assert_eq!(summed, run.bytes_saved(), "{}", tier.as_str());
    }
}

#[test]
fn prescriptions_are_idempotent() {
    for tier in Tier::ALL {
        let first = run_tier(scenario_session(), tier);
        let second = run_tier(first.messages.clone(), tier);
        assert!(!second.changed(), "{} changed its own output", tier.as_str());
        assert_eq!(second.after_bytes(), first.after_bytes());
    }
}

#[test]
fn tiers_save_monotonically() {
    let saved: Vec<usize> = Tier::ALL
        .iter()
        .map(|tier| run_tier(scenario_session(), *tier).bytes_saved())
        .collect();
    assert!(saved[0] <= saved[1]);
    assert!(saved[1] <= saved[2]);
}

#[test]
fn dry_run_predicts_the_written_session() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("session.jsonl");
    write_session_file(&path, &scenario_session()).expect("seed");
    let config = PrunerConfig::default();

    let mut request = TreatRequest {
        session: &path,
        prescription: "aggressive",
        mode: Mode::DryRun,
        options: PipelineOptions::default(),
    };
    let predicted = treat_session(&request, &config).expect("dry run");
    request.mode = Mode::Execute;
    let applied = treat_session(&request, &config).expect("execute");

    assert_eq!(applied.after_bytes, predicted.after_bytes);
    assert_eq!(applied.after_messages, predicted.after_messages);
    assert!(applied.backup.is_some());

    let written = load_session(&path).expect("reload");
    assert_eq!(written.len(), predicted.after_messages);
    let expected = run_tier(scenario_session(), Tier::Aggressive);
    let written_lines: Vec<String> = written.iter().map(Message::to_line).collect();
    let expected_lines: Vec<String> = expected.messages.iter().map(Message::to_line).collect();
    assert_eq!(written_lines, expected_lines);
}
