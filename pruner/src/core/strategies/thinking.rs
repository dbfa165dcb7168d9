//! `thinking-blocks`: remove, truncate or de-sign extended thinking blocks.

use serde_json::{Map, Value};

use crate::core::strategies::candidates;
use crate::core::types::{PruneAction, StrategyConfig, StrategyResult, ThinkingMode};
use crate::error::StrategyError;
use crate::session::{Message, MessageKind, block_type, blocks_mut};

pub const NAME: &str = "thinking-blocks";

const ELLIPSIS: &str = " [...]";

fn is_thinking(block: &Value) -> bool {
    matches!(block_type(block), Some("thinking" | "redacted_thinking"))
}

pub fn run(messages: &[Message], config: &StrategyConfig) -> Result<StrategyResult, StrategyError> {
    let mode = config.thinking.mode;
    let keep_chars = config.thinking.keep_chars;
    let mut result = StrategyResult::new(NAME);

    for message in candidates(messages).filter(|m| m.kind() == MessageKind::Assistant) {
        let blocks = message.blocks();
        if !blocks.iter().any(|block| needs_edit(block, mode, keep_chars)) {
            continue;
        }

        if mode == ThinkingMode::Remove && blocks.iter().all(is_thinking) {
            result.push(PruneAction::remove(message, "message held only thinking blocks"));
            continue;
        }

        let edited = message.edited(|record| edit_blocks(record, mode, keep_chars));
        if edited.size() < message.size() {
            let reason = match mode {
                ThinkingMode::Remove => "removed thinking blocks",
                ThinkingMode::Truncate => "truncated thinking blocks",
                ThinkingMode::SignatureOnly => "stripped thinking signatures",
            };
            result.push(PruneAction::modify(message, edited, reason));
        }
    }
    Ok(result)
}

fn needs_edit(block: &Value, mode: ThinkingMode, keep_chars: usize) -> bool {
    if !is_thinking(block) {
        return false;
    }
    match mode {
        ThinkingMode::Remove => true,
        ThinkingMode::Truncate => thinking_text(block).is_some_and(|t| t.chars().count() > keep_chars),
        ThinkingMode::SignatureOnly => block.get("signature").is_some(),
    }
}

fn thinking_text(block: &Value) -> Option<&str> {
    block.get("thinking").and_then(Value::as_str)
}

fn edit_blocks(record: &mut Map<String, Value>, mode: ThinkingMode, keep_chars: usize) {
    let Some(blocks) = blocks_mut(record) else {
        return;
    };
    match mode {
        ThinkingMode::Remove => blocks.retain(|block| !is_thinking(block)),
        ThinkingMode::Truncate => {
            for block in blocks.iter_mut() {
                if !needs_edit(block, mode, keep_chars) {
                    continue;
                }
                let text = thinking_text(block).unwrap_or_default();
                let keep = keep_chars.saturating_sub(ELLIPSIS.chars().count());
                let short: String = text.chars().take(keep).chain(ELLIPSIS.chars()).collect();
                block["thinking"] = Value::String(short);
            }
        }
        ThinkingMode::SignatureOnly => {
            for block in blocks.iter_mut().filter(|block| is_thinking(block)) {
                if let Some(fields) = block.as_object_mut() {
                    fields.remove("signature");
                }
            }
        }
    }
}
