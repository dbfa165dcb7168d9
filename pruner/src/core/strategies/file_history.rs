//! `file-history-dedup`: keep only the latest file-history snapshot per message.

use std::collections::HashMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::core::strategies::candidates;
use crate::core::types::{PruneAction, StrategyConfig, StrategyResult};
use crate::error::StrategyError;
use crate::session::{Message, MessageKind};

pub const NAME: &str = "file-history-dedup";

pub fn run(messages: &[Message], _config: &StrategyConfig) -> Result<StrategyResult, StrategyError> {
    let snapshots: Vec<&Message> = candidates(messages)
        .filter(|message| message.kind() == MessageKind::FileHistorySnapshot)
        .collect();

    let mut latest: HashMap<String, usize> = HashMap::new();
    for message in &snapshots {
        latest.insert(snapshot_key(message), message.line);
    }

    let mut result = StrategyResult::new(NAME);
    for message in snapshots {
        let key = snapshot_key(message);
        if let Some(&keep) = latest.get(&key)
            && keep != message.line
        {
            result.push(PruneAction::remove(
                message,
                format!("superseded by file-history snapshot at line {keep}"),
            ));
        }
    }
    Ok(result)
}

/// Snapshots group by `messageId`; records without one group by content.
fn snapshot_key(message: &Message) -> String {
    if let Some(id) = message.record().get("messageId").and_then(Value::as_str) {
        return format!("id:{id}");
    }
    let snapshot = message
        .record()
        .get("snapshot")
        .map(Value::to_string)
        .unwrap_or_default();
    format!("sha256:{}", hex::encode(Sha256::digest(snapshot.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::msg;
    use serde_json::json;

    fn snapshot(line: usize, message_id: &str, files: usize) -> Message {
        msg(
            line,
            json!({
                "type": "file-history-snapshot",
                "messageId": message_id,
                "snapshot": {"trackedFileBackups": {"count": files}},
                "isSnapshotUpdate": files > 0,
            }),
        )
    }

    #[test]
    fn keeps_latest_snapshot_per_message_id() {
        let messages = vec![
            snapshot(0, "a", 0),
            snapshot(1, "b", 0),
            snapshot(2, "a", 1),
            snapshot(3, "a", 2),
        ];
        let result = run(&messages, &StrategyConfig::default()).expect("run");
        let targets: Vec<usize> = result.actions.iter().map(|a| a.target).collect();
        assert_eq!(targets, vec![0, 2]);
    }

    #[test]
    fn identical_anonymous_snapshots_dedupe_by_content() {
        let anonymous = |line| {
            msg(
                line,
                json!({"type": "file-history-snapshot", "snapshot": {"files": ["x"]}}),
            )
        };
        let messages = vec![anonymous(0), anonymous(1)];
        let result = run(&messages, &StrategyConfig::default()).expect("run");
        assert_eq!(result.removed, 1);
        assert_eq!(result.actions[0].target, 0);
    }
}
