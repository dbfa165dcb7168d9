//! Protected-message classification.
//!
//! Protected messages are never removed or modified by a strategy. They are
//! structural records the host relies on (`summary`, `queue-operation`),
//! team-coordination traffic, and the injected team snapshot pair.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::session::{Message, MessageKind, block_type, tool_result_text};

/// Tool names whose calls carry team-coordination state.
pub const TEAM_TOOL_NAMES: &[&str] = &[
    "TeamCreate",
    "TeamDelete",
    "TeamMessage",
    "SendMessage",
    "TaskCreate",
    "TaskUpdate",
    "TaskList",
    "TaskGet",
    "SpawnTeammate",
    "TeamStatus",
];

/// Prefix carried by both messages of an injected snapshot pair.
pub const SNAPSHOT_MARKER: &str = "[pruner guard: team snapshot]";

static TEAM_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)team.?name|agent.?id|teammate|team.?lead|SendMessage|TeamCreate|TaskCreate|TaskUpdate|agent.?team|spawn.+teammate|team.+config",
    )
    .expect("team keyword pattern should compile")
});

/// True if no strategy may remove or modify `message`.
pub fn is_protected(message: &Message) -> bool {
    matches!(
        message.kind(),
        MessageKind::Summary | MessageKind::QueueOperation
    ) || is_snapshot_message(message)
        || is_team_message(message)
}

/// True if `message` belongs to an injected team snapshot pair.
pub fn is_snapshot_message(message: &Message) -> bool {
    message
        .texts()
        .iter()
        .any(|text| text.starts_with(SNAPSHOT_MARKER))
}

/// True if `message` is part of agent-team coordination.
pub fn is_team_message(message: &Message) -> bool {
    if let Some(Value::String(text)) = message.content() {
        return TEAM_KEYWORDS.is_match(text);
    }
    message.blocks().iter().any(|block| match block_type(block) {
        Some("tool_use") => block
            .get("name")
            .and_then(Value::as_str)
            .is_some_and(|name| TEAM_TOOL_NAMES.contains(&name)),
        Some("tool_result") => TEAM_KEYWORDS.is_match(&tool_result_text(block)),
        Some("text") => block
            .get("text")
            .and_then(Value::as_str)
            .is_some_and(|text| TEAM_KEYWORDS.is_match(text)),
        _ => false,
    })
}

/// Lines of every protected message in `messages`.
pub fn protected_lines(messages: &[Message]) -> BTreeSet<usize> {
    messages
        .iter()
        .filter(|message| is_protected(message))
        .map(|message| message.line)
        .collect()
}
