//! `document-dedup`: repeated identical document/image attachments become placeholders.

use std::collections::HashMap;

use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::core::protection::is_protected;
use crate::core::types::{PruneAction, StrategyConfig, StrategyResult};
use crate::error::StrategyError;
use crate::session::{Message, block_type, blocks_mut};

pub const NAME: &str = "document-dedup";

fn attachment_kind(block: &Value) -> Option<&str> {
    match block_type(block) {
        Some(kind @ ("document" | "image")) => Some(kind),
        _ => None,
    }
}

fn fingerprint(block: &Value) -> Option<String> {
    let source = block.get("source")?.to_string();
    Some(hex::encode(Sha256::digest(source.as_bytes())))
}

fn placeholder(kind: &str, first_line: usize) -> Value {
    json!({
        "type": "text",
        "text": format!("[pruner: duplicate {kind} omitted, first attached at line {first_line}]"),
    })
}

pub fn run(messages: &[Message], _config: &StrategyConfig) -> Result<StrategyResult, StrategyError> {
    let mut first_seen: HashMap<String, usize> = HashMap::new();
    let mut result = StrategyResult::new(NAME);

    for message in messages {
        let mut duplicates: Vec<(usize, Value)> = Vec::new();
        for (idx, block) in message.blocks().iter().enumerate() {
            let (Some(kind), Some(print)) = (attachment_kind(block), fingerprint(block)) else {
                continue;
            };
            match first_seen.get(&print) {
                Some(&first_line) => duplicates.push((idx, placeholder(kind, first_line))),
                None => {
                    first_seen.insert(print, message.line);
                }
            }
        }
        if duplicates.is_empty() || is_protected(message) {
            continue;
        }
        let edited = message.edited(|record| {
            if let Some(blocks) = blocks_mut(record) {
                for (idx, replacement) in duplicates {
                    blocks[idx] = replacement;
                }
            }
        });
        if edited.size() < message.size() {
            result.push(PruneAction::modify(
                message,
                edited,
                "replaced duplicate attachments",
            ));
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::msg;

    fn with_image(line: usize, data: &str) -> Message {
        msg(
            line,
            json!({
                "type": "user",
                "uuid": format!("u{line}"),
                "message": {"role": "user", "content": [
                    {"type": "text", "text": "look at this"},
                    {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": data}},
                ]},
            }),
        )
    }

    #[test]
    fn later_copies_become_placeholders() {
        let payload = "A".repeat(4_096);
        let messages = vec![
            with_image(0, &payload),
            with_image(1, "different"),
            with_image(2, &payload),
        ];
        let result = run(&messages, &StrategyConfig::default()).expect("run");
        assert_eq!(result.actions.len(), 1);
        assert_eq!(result.actions[0].target, 2);
        let edited = result.actions[0].replacement.as_ref().expect("replacement");
        assert_eq!(block_type(&edited.blocks()[1]), Some("text"));
        assert!(run(&[messages[0].clone(), edited.clone()], &StrategyConfig::default())
            .expect("run")
            .is_empty());
    }
}
