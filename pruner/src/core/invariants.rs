//! Invariants every strategy application must preserve.
//!
//! Checked after each strategy, before its result is accepted:
//! - Surviving messages keep their relative order and come from the input.
//! - Every surviving id existed in the input, and its parent is the nearest
//!   surviving ancestor from the input graph (or null).
//! - Protected messages are never dropped or edited (their parent pointer may
//!   be re-pointed), and their count never shrinks.
//! - Total size never grows.

use std::collections::{HashMap, HashSet};

use crate::core::lineage::{nearest_surviving, parent_index};
use crate::core::protection::is_protected;
use crate::error::PruneError;
use crate::session::{Message, total_size};

/// One invariant violation, tied to the offending message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub target: String,
    pub detail: String,
}

impl Violation {
    fn new(target: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            detail: detail.into(),
        }
    }
}

/// Validate `output` against `input`. Returns violations in a stable order.
pub fn validate_invariants(input: &[Message], output: &[Message]) -> Vec<Violation> {
    let mut violations = Vec::new();
    check_order(input, output, &mut violations);
    check_lineage(input, output, &mut violations);
    check_protected(input, output, &mut violations);

    let before = total_size(input);
    let after = total_size(output);
    if after > before {
        violations.push(Violation::new(
            "<session>",
            format!("size grew from {before} to {after} bytes"),
        ));
    }
    violations
}

/// Run [`validate_invariants`] and turn the first violation into an integrity error.
pub fn enforce_invariants(
    strategy: &str,
    input: &[Message],
    output: &[Message],
) -> Result<(), PruneError> {
    let violations = validate_invariants(input, output);
    let Some(first) = violations.first() else {
        return Ok(());
    };
    let detail = violations
        .iter()
        .map(|v| format!("{}: {}", v.target, v.detail))
        .collect::<Vec<_>>()
        .join("; ");
    Err(PruneError::Integrity {
        strategy: strategy.to_string(),
        target: first.target.clone(),
        detail,
    })
}

fn label(message: &Message) -> String {
    match message.id() {
        Some(id) => format!("line {} ({id})", message.line),
        None => format!("line {}", message.line),
    }
}

fn check_order(input: &[Message], output: &[Message], violations: &mut Vec<Violation>) {
    let input_lines: HashSet<usize> = input.iter().map(|m| m.line).collect();
    for message in output {
        if !input_lines.contains(&message.line) {
            violations.push(Violation::new(label(message), "not present in input"));
        }
    }
    for pair in output.windows(2) {
        if pair[0].line >= pair[1].line {
            violations.push(Violation::new(
                label(&pair[1]),
                format!("reordered after line {}", pair[0].line),
            ));
        }
    }
}

fn check_lineage(input: &[Message], output: &[Message], violations: &mut Vec<Violation>) {
    let input_ids: HashMap<usize, Option<&str>> =
        input.iter().map(|m| (m.line, m.id())).collect();
    let index = parent_index(input);
    let surviving: HashSet<String> = output
        .iter()
        .filter_map(|m| m.id().map(str::to_string))
        .collect();

    for message in output {
        let Some(original_id) = input_ids.get(&message.line) else {
            continue;
        };
        if message.id() != *original_id {
            violations.push(Violation::new(
                label(message),
                format!("id changed from {:?}", original_id),
            ));
            continue;
        }
        let Some(id) = message.id() else {
            continue;
        };
        let expected = match index.get(id) {
            Some(Some(parent)) => nearest_surviving(parent, &index, &surviving),
            _ => None,
        };
        if message.parent_id() != expected {
            violations.push(Violation::new(
                label(message),
                format!(
                    "parent is {:?}, expected nearest surviving ancestor {:?}",
                    message.parent_id(),
                    expected
                ),
            ));
        }
    }
}

fn check_protected(input: &[Message], output: &[Message], violations: &mut Vec<Violation>) {
    let by_line: HashMap<usize, &Message> = output.iter().map(|m| (m.line, m)).collect();

    let mut protected_in = 0usize;
    for message in input.iter().filter(|m| is_protected(m)) {
        protected_in += 1;
        match by_line.get(&message.line) {
            None => violations.push(Violation::new(label(message), "protected message removed")),
            Some(survivor) if !survivor.same_body(message) => {
                violations.push(Violation::new(label(message), "protected message modified"));
            }
            Some(_) => {}
        }
    }

    let protected_out = output.iter().filter(|m| is_protected(m)).count();
    if protected_out < protected_in {
        violations.push(Violation::new(
            "<session>",
            format!("protected count shrank from {protected_in} to {protected_out}"),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lineage::relink_orphans;
    use crate::test_support::SessionBuilder;
    use serde_json::json;

    fn sample() -> Vec<Message> {
        SessionBuilder::new()
            .user("start")
            .progress()
            .progress()
            .tool_use("TaskCreate", json!({"taskId": "1", "subject": "x"}))
            .assistant("ok")
            .build()
    }

    /// Removing unprotected messages with repaired parents is accepted.
    #[test]
    fn accepts_removal_with_relinked_children() {
        let input = sample();
        let mut output: Vec<Message> = input
            .iter()
            .filter(|m| m.line != 1 && m.line != 2)
            .cloned()
            .collect();
        relink_orphans(&input, &mut output);
        assert!(validate_invariants(&input, &output).is_empty());
    }

    /// A child still pointing at a removed parent is a lineage violation.
    #[test]
    fn reports_dangling_parent() {
        let input = sample();
        let output: Vec<Message> = input.iter().filter(|m| m.line != 2).cloned().collect();
        let violations = validate_invariants(&input, &output);
        assert!(violations.iter().any(|v| v.detail.contains("nearest surviving")));
    }

    #[test]
    fn reports_removed_protected_message() {
        let input = sample();
        let mut output: Vec<Message> = input.iter().filter(|m| m.line != 3).cloned().collect();
        relink_orphans(&input, &mut output);
        let violations = validate_invariants(&input, &output);
        assert!(violations.iter().any(|v| v.detail == "protected message removed"));
        assert!(violations.iter().any(|v| v.detail.contains("protected count shrank")));
    }

    #[test]
    fn reports_modified_protected_message() {
        let input = sample();
        let mut output = input.clone();
        output[3] = output[3].edited(|record| {
            record.remove("cwd");
        });
        let violations = validate_invariants(&input, &output);
        assert!(violations.iter().any(|v| v.detail == "protected message modified"));
    }

    #[test]
    fn reports_reordering_and_growth() {
        let input = sample();
        let mut output = input.clone();
        output.swap(0, 1);
        output[4] = output[4].edited(|record| {
            record.insert("padding".to_string(), json!("x".repeat(64)));
        });
        let violations = validate_invariants(&input, &output);
        assert!(violations.iter().any(|v| v.detail.contains("reordered")));
        assert!(violations.iter().any(|v| v.detail.contains("size grew")));
    }

    #[test]
    fn enforce_names_strategy_and_target() {
        let input = sample();
        let output: Vec<Message> = input.iter().filter(|m| m.line != 3).cloned().collect();
        let err = enforce_invariants("demo", &input, &output).expect_err("violation");
        match err {
            PruneError::Integrity { strategy, .. } => assert_eq!(strategy, "demo"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
