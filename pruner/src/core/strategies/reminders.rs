//! `system-reminder-dedup`: strip repeats of identical `<system-reminder>` sections.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::core::protection::is_protected;
use crate::core::types::{PruneAction, StrategyConfig, StrategyResult};
use crate::error::StrategyError;
use crate::session::{Message, block_type};

pub const NAME: &str = "system-reminder-dedup";

static REMINDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<system-reminder>.*?</system-reminder>")
        .expect("system reminder pattern should compile")
});

#[derive(Debug, PartialEq, Eq)]
enum Stripped {
    Unchanged,
    Edited,
    /// Nothing but repeated reminders was left.
    Emptied,
}

pub fn run(messages: &[Message], _config: &StrategyConfig) -> Result<StrategyResult, StrategyError> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut result = StrategyResult::new(NAME);

    for message in messages {
        let mut record = message.record().clone();
        let outcome = strip_record(&mut record, &mut seen);
        // Protected messages still register the reminders they carry.
        if outcome == Stripped::Unchanged || is_protected(message) {
            continue;
        }
        if outcome == Stripped::Emptied {
            result.push(PruneAction::remove(message, "held only repeated system reminders"));
            continue;
        }
        let edited = Message::from_record(message.line, record);
        if edited.size() < message.size() {
            result.push(PruneAction::modify(message, edited, "stripped repeated system reminders"));
        }
    }
    Ok(result)
}

fn fingerprint(reminder: &str) -> String {
    hex::encode(Sha256::digest(reminder.as_bytes()))
}

/// Remove reminders already in `seen`; record new ones.
fn strip_text(text: &str, seen: &mut HashSet<String>) -> Option<String> {
    if !text.contains("<system-reminder>") {
        return None;
    }
    let mut changed = false;
    let out = REMINDER.replace_all(text, |caps: &Captures<'_>| {
        let reminder = &caps[0];
        if seen.insert(fingerprint(reminder)) {
            reminder.to_string()
        } else {
            changed = true;
            String::new()
        }
    });
    changed.then(|| out.trim().to_string())
}

fn strip_record(record: &mut Map<String, Value>, seen: &mut HashSet<String>) -> Stripped {
    let Some(content) = record
        .get_mut("message")
        .and_then(Value::as_object_mut)
        .and_then(|body| body.get_mut("content"))
    else {
        return Stripped::Unchanged;
    };

    match content {
        Value::String(text) => match strip_text(text, seen) {
            None => Stripped::Unchanged,
            Some(stripped) if stripped.is_empty() => Stripped::Emptied,
            Some(stripped) => {
                *text = stripped;
                Stripped::Edited
            }
        },
        Value::Array(blocks) => {
            let mut edited = false;
            for block in blocks.iter_mut() {
                edited |= strip_block(block, seen);
            }
            if !edited {
                return Stripped::Unchanged;
            }
            blocks.retain(|block| {
                !(block_type(block) == Some("text")
                    && block.get("text").and_then(Value::as_str) == Some(""))
            });
            if blocks.is_empty() {
                Stripped::Emptied
            } else {
                Stripped::Edited
            }
        }
        _ => Stripped::Unchanged,
    }
}

fn strip_block(block: &mut Value, seen: &mut HashSet<String>) -> bool {
    let field = match block_type(block) {
        Some("text") => "text",
        Some("tool_result") => "content",
        _ => return false,
    };
    match block.get_mut(field) {
        Some(Value::String(text)) => match strip_text(text, seen) {
            Some(stripped) => {
                *text = stripped;
                true
            }
            None => false,
        },
        Some(Value::Array(parts)) => {
            let mut edited = false;
            for part in parts.iter_mut() {
                if let Some(Value::String(text)) = part.get_mut("text")
                    && let Some(stripped) = strip_text(text, seen)
                {
                    *text = stripped;
                    edited = true;
                }
            }
            edited
        }
        _ => false,
    }
}
