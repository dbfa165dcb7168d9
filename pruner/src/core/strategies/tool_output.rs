//! `tool-output-trim`: cap oversized tool results.

use serde_json::Value;

use crate::core::strategies::{candidates, line_count, truncate_with_note};
use crate::core::types::{PruneAction, StrategyConfig, StrategyResult, ToolOutputConfig, TrimMode};
use crate::error::StrategyError;
use crate::session::{Message, block_type, blocks_mut, tool_result_text};

pub const NAME: &str = "tool-output-trim";

pub fn run(messages: &[Message], config: &StrategyConfig) -> Result<StrategyResult, StrategyError> {
    let cfg = &config.tool_output;
    let mut result = StrategyResult::new(NAME);

    for message in candidates(messages) {
        let oversized = message
            .blocks()
            .iter()
            .filter(|block| is_oversized(block, cfg))
            .count();
        if oversized == 0 {
            continue;
        }
        let edited = message.edited(|record| {
            if let Some(blocks) = blocks_mut(record) {
                for block in blocks.iter_mut().filter(|b| is_oversized(b, cfg)) {
                    block["content"] = Value::String(trimmed(block, cfg));
                }
            }
        });
        if edited.size() < message.size() {
            result.push(PruneAction::modify(
                message,
                edited,
                format!("trimmed {oversized} oversized tool result(s)"),
            ));
        }
    }
    Ok(result)
}

fn is_oversized(block: &Value, cfg: &ToolOutputConfig) -> bool {
    if block_type(block) != Some("tool_result") {
        return false;
    }
    let text = tool_result_text(block);
    text.len() > cfg.truncate_threshold || line_count(&text) > cfg.max_lines
}

fn trimmed(block: &Value, cfg: &ToolOutputConfig) -> String {
    let text = tool_result_text(block);
    match cfg.mode {
        TrimMode::Truncate => truncate_with_note(
            &text,
            cfg.truncate_threshold,
            Some(cfg.max_lines),
            "tool output",
        ),
        TrimMode::Remove => format!("[pruner: removed {} bytes of tool output]", text.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::user_tool_result;

    fn big_output() -> String {
        (0..1_000)
            .map(|i| format!("row {i:05} of a very chatty build log"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn truncates_to_byte_and_line_cap() {
        let message = user_tool_result(0, "u0", None, "toolu_1", &big_output());
        let config = StrategyConfig::default();
        let result = run(std::slice::from_ref(&message), &config).expect("run");
        assert_eq!(result.modified, 1);

        let edited = result.actions[0].replacement.as_ref().expect("replacement");
        let text = tool_result_text(&edited.blocks()[0]);
        assert!(text.len() <= 8 * 1024);
        assert!(line_count(&text) <= 100);
        assert!(text.starts_with("row 00000"));
        assert_eq!(edited.blocks()[0]["tool_use_id"], "toolu_1");

        let again = run(&[edited.clone()], &config).expect("run");
        assert!(again.is_empty());
    }

    #[test]
    fn remove_mode_leaves_placeholder() {
        let message = user_tool_result(0, "u0", None, "toolu_1", &big_output());
        let mut config = StrategyConfig::default();
        config.tool_output.mode = TrimMode::Remove;
        let result = run(&[message], &config).expect("run");
        let edited = result.actions[0].replacement.as_ref().expect("replacement");
        assert!(tool_result_text(&edited.blocks()[0]).starts_with("[pruner: removed"));
    }

    #[test]
    fn small_outputs_are_untouched() {
        let message = user_tool_result(0, "u0", None, "toolu_1", "ok");
        assert!(run(&[message], &StrategyConfig::default()).expect("run").is_empty());
    }
}
