//! `mega-block-trim`: cap any single text block above the configured size.

use serde_json::Value;

use crate::core::strategies::{candidates, truncate_with_note};
use crate::core::types::{PruneAction, StrategyConfig, StrategyResult};
use crate::error::StrategyError;
use crate::session::{Message, block_type, blocks_mut};

pub const NAME: &str = "mega-block-trim";

pub fn run(messages: &[Message], config: &StrategyConfig) -> Result<StrategyResult, StrategyError> {
    let threshold = config.mega_block.threshold;
    let mut result = StrategyResult::new(NAME);

    for message in candidates(messages) {
        let oversized = message.texts().iter().any(|text| text.len() > threshold);
        if !oversized {
            continue;
        }
        let edited = message.edited(|record| trim_record(record, threshold));
        if edited.size() < message.size() {
            result.push(PruneAction::modify(message, edited, "trimmed oversized text block"));
        }
    }
    Ok(result)
}

fn trim_record(record: &mut serde_json::Map<String, Value>, threshold: usize) {
    if let Some(Value::String(text)) = record
        .get_mut("message")
        .and_then(|body| body.get_mut("content"))
    {
        if text.len() > threshold {
            *text = truncate_with_note(text, threshold, None, "text");
        }
        return;
    }
    let Some(blocks) = blocks_mut(record) else {
        return;
    };
    for block in blocks.iter_mut() {
        if block_type(block) != Some("text") {
            continue;
        }
        if let Some(Value::String(text)) = block.get_mut("text")
            && text.len() > threshold
        {
            *text = truncate_with_note(text, threshold, None, "text");
        }
    }
}
