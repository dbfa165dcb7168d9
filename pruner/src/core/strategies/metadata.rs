//! `metadata-strip`: drop verbose per-response usage detail from assistant records.

use serde_json::Value;

use crate::core::strategies::candidates;
use crate::core::types::{PruneAction, StrategyConfig, StrategyResult};
use crate::error::StrategyError;
use crate::session::{Message, MessageKind};

pub const NAME: &str = "metadata-strip";

/// Usage sub-fields the host never reads back.
const USAGE_DETAIL_KEYS: &[&str] = &["cache_creation", "server_tool_use", "service_tier"];

pub fn run(messages: &[Message], _config: &StrategyConfig) -> Result<StrategyResult, StrategyError> {
    let mut result = StrategyResult::new(NAME);
    for message in candidates(messages).filter(|m| m.kind() == MessageKind::Assistant) {
        if !has_strippable(message) {
            continue;
        }
        let stripped = message.edited(strip);
        if stripped.size() < message.size() {
            result.push(PruneAction::modify(
                message,
                stripped,
                "stripped usage detail metadata",
            ));
        }
    }
    Ok(result)
}

fn has_strippable(message: &Message) -> bool {
    let Some(body) = message.body() else {
        return false;
    };
    let null_stop = matches!(body.get("stop_sequence"), Some(Value::Null));
    let usage_detail = body
        .get("usage")
        .and_then(Value::as_object)
        .is_some_and(|usage| USAGE_DETAIL_KEYS.iter().any(|key| usage.contains_key(*key)));
    null_stop || usage_detail
}

fn strip(record: &mut serde_json::Map<String, Value>) {
    let Some(body) = record.get_mut("message").and_then(Value::as_object_mut) else {
        return;
    };
    if matches!(body.get("stop_sequence"), Some(Value::Null)) {
        body.remove("stop_sequence");
    }
    if let Some(usage) = body.get_mut("usage").and_then(Value::as_object_mut) {
        for key in USAGE_DETAIL_KEYS {
            usage.remove(*key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{assistant_text, msg};
    use serde_json::json;

    #[test]
    fn strips_usage_detail_and_null_stop_sequence() {
        let message = msg(
            0,
            json!({
                "type": "assistant",
                "uuid": "a",
                "message": {
                    "role": "assistant",
                    "content": [{"type": "text", "text": "hi"}],
                    "stop_sequence": null,
                    "usage": {
                        "input_tokens": 3,
                        "output_tokens": 4,
                        "service_tier": "standard",
                        "cache_creation": {"ephemeral_5m_input_tokens": 0},
                    },
                },
            }),
        );
        let result = run(&[message], &StrategyConfig::default()).expect("run");
        assert_eq!(result.modified, 1);
        let replacement = result.actions[0].replacement.as_ref().expect("replacement");
        let usage = &replacement.body().expect("body")["usage"];
        assert_eq!(usage, &json!({"input_tokens": 3, "output_tokens": 4}));
        assert!(!replacement.body().expect("body").contains_key("stop_sequence"));
    }

    #[test]
    fn second_pass_finds_nothing() {
        let message = assistant_text(0, "a", None, "hello");
        let first = run(std::slice::from_ref(&message), &StrategyConfig::default()).expect("run");
        let stripped = first.actions[0].replacement.clone().expect("replacement");
        let second = run(&[stripped], &StrategyConfig::default()).expect("run");
        assert!(second.is_empty());
    }
}
