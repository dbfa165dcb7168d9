//! `stale-reads`: file reads superseded by a later read of the same path.

use std::collections::HashMap;

use serde_json::Value;

use crate::core::protection::is_protected;
use crate::core::types::{PruneAction, StrategyConfig, StrategyResult};
use crate::error::StrategyError;
use crate::session::{Message, block_type, blocks_mut, tool_result_text};

pub const NAME: &str = "stale-reads";

const READ_TOOL: &str = "Read";

fn placeholder(path: &str) -> String {
    format!("[pruner: stale read of {path} superseded by a later read]")
}

pub fn run(messages: &[Message], _config: &StrategyConfig) -> Result<StrategyResult, StrategyError> {
    let read_paths = read_calls(messages);

    // Position of the latest result for each path.
    let mut latest: HashMap<&str, (usize, usize)> = HashMap::new();
    for (pos, message) in messages.iter().enumerate() {
        for (idx, block) in message.blocks().iter().enumerate() {
            if let Some(path) = result_path(block, &read_paths) {
                latest.insert(path, (pos, idx));
            }
        }
    }

    let mut result = StrategyResult::new(NAME);
    for (pos, message) in messages.iter().enumerate() {
        if is_protected(message) {
            continue;
        }
        let stale: Vec<(usize, String)> = message
            .blocks()
            .iter()
            .enumerate()
            .filter_map(|(idx, block)| {
                let path = result_path(block, &read_paths)?;
                let superseded = latest.get(path) != Some(&(pos, idx));
                let replaced = tool_result_text(block) == placeholder(path);
                (superseded && !replaced).then(|| (idx, placeholder(path)))
            })
            .collect();
        if stale.is_empty() {
            continue;
        }
        let edited = message.edited(|record| {
            if let Some(blocks) = blocks_mut(record) {
                for (idx, text) in &stale {
                    blocks[*idx]["content"] = Value::String(text.clone());
                }
            }
        });
        if edited.size() < message.size() {
            result.push(PruneAction::modify(
                message,
                edited,
                format!("replaced {} superseded file read(s)", stale.len()),
            ));
        }
    }
    Ok(result)
}

/// `tool_use id -> file path` for every Read call.
fn read_calls(messages: &[Message]) -> HashMap<&str, &str> {
    messages
        .iter()
        .flat_map(Message::blocks)
        .filter(|block| block_type(block) == Some("tool_use"))
        .filter(|block| block.get("name").and_then(Value::as_str) == Some(READ_TOOL))
        .filter_map(|block| {
            let id = block.get("id").and_then(Value::as_str)?;
            let path = block.get("input")?.get("file_path")?.as_str()?;
            Some((id, path))
        })
        .collect()
}

fn result_path<'a>(block: &Value, read_paths: &HashMap<&str, &'a str>) -> Option<&'a str> {
    if block_type(block) != Some("tool_result") {
        return None;
    }
    let id = block.get("tool_use_id").and_then(Value::as_str)?;
    read_paths.get(id).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::SessionBuilder;
    use serde_json::json;

    #[test]
    fn earlier_reads_of_the_same_file_are_replaced() {
        let contents = "fn main() {}\n".repeat(200);
        let messages = SessionBuilder::new()
            .tool_use("Read", json!({"file_path": "/src/main.rs"}))
            .tool_result(&contents)
            .tool_use("Read", json!({"file_path": "/src/lib.rs"}))
            .tool_result(&contents)
            .tool_use("Read", json!({"file_path": "/src/main.rs"}))
            .tool_result(&contents)
            .build();

        let result = run(&messages, &StrategyConfig::default()).expect("run");
        let targets: Vec<usize> = result.actions.iter().map(|a| a.target).collect();
        assert_eq!(targets, vec![1]);
        let edited = result.actions[0].replacement.as_ref().expect("replacement");
        assert_eq!(
            tool_result_text(&edited.blocks()[0]),
            placeholder("/src/main.rs")
        );

        let mut next = messages.clone();
        next[1] = edited.clone();
        assert!(run(&next, &StrategyConfig::default()).expect("run").is_empty());
    }
}
