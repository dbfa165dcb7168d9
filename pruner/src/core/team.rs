//! Team-coordination state: extraction from a session and re-injection as a
//! synthetic message pair.

use std::collections::HashSet;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;
use uuid::Uuid;

use crate::core::lineage::relink_orphans;
use crate::core::protection::{SNAPSHOT_MARKER, is_snapshot_message, is_team_message};
use crate::session::{Message, MessageKind, block_type};

/// Characters kept from each coordination text in the lead summary.
const LEAD_TEXT_CHARS: usize = 300;
/// Coordination texts kept in the lead summary.
const LEAD_TEXT_COUNT: usize = 3;
const HISTORY_SUMMARY_CHARS: usize = 120;

/// Envelope fields copied from the session onto injected messages.
const ENVELOPE_FIELDS: &[&str] = &["sessionId", "cwd", "gitBranch", "version"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeammateInfo {
    pub agent_id: String,
    pub name: String,
    #[serde(default)]
    pub role: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: String,
    pub subject: String,
    pub status: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub description: String,
}

/// One coordination message in session order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub line: usize,
    pub id: Option<String>,
    /// Team tool invoked by the message, if any.
    pub tool: Option<String>,
    pub summary: String,
}

/// Coordination state rebuilt from a session's protected messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamSnapshot {
    pub team_name: String,
    pub teammates: Vec<TeammateInfo>,
    pub tasks: Vec<TaskInfo>,
    pub history: Vec<HistoryEntry>,
    pub lead_summary: String,
    pub message_count: usize,
}

impl TeamSnapshot {
    pub fn is_empty(&self) -> bool {
        self.team_name.is_empty() && self.teammates.is_empty() && self.tasks.is_empty()
    }

    /// Equal team state, ignoring the file lines history entries sit on.
    pub fn same_state(&self, other: &TeamSnapshot) -> bool {
        self.team_name == other.team_name
            && self.teammates == other.teammates
            && self.tasks == other.tasks
            && self.lead_summary == other.lead_summary
            && self.message_count == other.message_count
            && self.history.len() == other.history.len()
            && self
                .history
                .iter()
                .zip(&other.history)
                .all(|(a, b)| a.id == b.id && a.tool == b.tool && a.summary == b.summary)
    }

    fn teammate_mut(&mut self, agent_id: &str) -> Option<&mut TeammateInfo> {
        self.teammates.iter_mut().find(|t| t.agent_id == agent_id)
    }

    fn task_mut(&mut self, task_id: &str) -> Option<&mut TaskInfo> {
        self.tasks.iter_mut().find(|t| t.task_id == task_id)
    }

    fn upsert_teammate(&mut self, teammate: TeammateInfo) {
        match self.teammate_mut(&teammate.agent_id) {
            Some(existing) => *existing = teammate,
            None => self.teammates.push(teammate),
        }
    }

    fn upsert_task(&mut self, task: TaskInfo) {
        match self.task_mut(&task.task_id) {
            Some(existing) => *existing = task,
            None => self.tasks.push(task),
        }
    }
}

/// First present key in `input` as a string. Numbers are accepted for ids.
fn field(input: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match input.get(*key)? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

fn field_or_empty(input: &Value, keys: &[&str]) -> String {
    field(input, keys).unwrap_or_default()
}

fn clip(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

/// Fold the coordination messages of `messages` into a snapshot.
///
/// Previously injected snapshot pairs are ignored. Malformed tool inputs are
/// skipped.
pub fn extract_team_state(messages: &[Message]) -> TeamSnapshot {
    let mut snapshot = TeamSnapshot::default();
    let mut lead_texts: Vec<String> = Vec::new();

    for message in messages {
        if is_snapshot_message(message) || !is_team_message(message) {
            continue;
        }
        snapshot.message_count += 1;

        let mut tool = None;
        for block in message.blocks() {
            if block_type(block) != Some("tool_use") {
                continue;
            }
            let Some(name) = block.get("name").and_then(Value::as_str) else {
                continue;
            };
            let input = block.get("input").unwrap_or(&Value::Null);
            if !input.is_object() {
                debug!(line = message.line, tool = name, "skipping malformed team tool input");
                continue;
            }
            apply_tool_call(&mut snapshot, name, input);
            tool.get_or_insert_with(|| name.to_string());
        }

        if message.kind() == MessageKind::Assistant {
            lead_texts.extend(
                message
                    .texts()
                    .into_iter()
                    .map(|text| clip(text, LEAD_TEXT_CHARS)),
            );
        }

        snapshot.history.push(HistoryEntry {
            line: message.line,
            id: message.id().map(str::to_string),
            summary: history_summary(message, tool.as_deref()),
            tool,
        });
    }

    let keep_from = lead_texts.len().saturating_sub(LEAD_TEXT_COUNT);
    snapshot.lead_summary = lead_texts[keep_from..].join(" [...] ");
    snapshot
}

fn apply_tool_call(snapshot: &mut TeamSnapshot, name: &str, input: &Value) {
    match name {
        "TeamCreate" => {
            if let Some(team_name) = field(input, &["name", "team_name"]) {
                snapshot.team_name = team_name;
            }
            let teammates = input
                .get("teammates")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for entry in teammates {
                let Some(agent_id) = field(entry, &["agentId", "agent_id"]) else {
                    continue;
                };
                snapshot.upsert_teammate(TeammateInfo {
                    name: field(entry, &["name"]).unwrap_or_else(|| agent_id.clone()),
                    role: field_or_empty(entry, &["role", "description"]),
                    status: "running".to_string(),
                    agent_id,
                });
            }
        }
        "TaskCreate" => {
            let task_id = field(input, &["taskId", "id"])
                .unwrap_or_else(|| snapshot.tasks.len().to_string());
            snapshot.upsert_task(TaskInfo {
                task_id,
                subject: field_or_empty(input, &["subject", "title"]),
                status: "pending".to_string(),
                owner: field_or_empty(input, &["owner"]),
                description: field_or_empty(input, &["description"]),
            });
        }
        "TaskUpdate" => {
            let Some(task_id) = field(input, &["taskId", "id"]) else {
                return;
            };
            let status = field(input, &["status"]).filter(|s| !s.is_empty());
            let owner = field(input, &["owner"]).filter(|s| !s.is_empty());
            match snapshot.task_mut(&task_id) {
                Some(task) => {
                    if let Some(status) = status {
                        task.status = status;
                    }
                    if let Some(owner) = owner {
                        task.owner = owner;
                    }
                }
                // Created before the scanned window.
                None => snapshot.tasks.push(TaskInfo {
                    task_id,
                    subject: field_or_empty(input, &["subject"]),
                    status: status.unwrap_or_else(|| "unknown".to_string()),
                    owner: owner.unwrap_or_default(),
                    description: String::new(),
                }),
            }
        }
        "SendMessage" | "TeamMessage" => {
            if let Some(target) = field(input, &["to", "agentId"])
                && let Some(teammate) = snapshot.teammate_mut(&target)
            {
                teammate.status = "running".to_string();
            }
        }
        _ => {}
    }
}

fn history_summary(message: &Message, tool: Option<&str>) -> String {
    let text = match tool {
        Some(name) => {
            let input = message
                .blocks()
                .iter()
                .find(|b| b.get("name").and_then(Value::as_str) == Some(name))
                .and_then(|b| b.get("input"))
                .map(Value::to_string)
                .unwrap_or_default();
            format!("{name} {input}")
        }
        None => message.texts().join(" "),
    };
    clip(text.trim(), HISTORY_SUMMARY_CHARS)
}

/// Outcome of [`inject_snapshot`].
#[derive(Debug, Clone)]
pub struct Injection {
    pub messages: Vec<Message>,
    /// Messages of earlier snapshot pairs that were dropped.
    pub superseded: usize,
    pub injected: bool,
}

/// Text placed in the injected pair.
#[derive(Debug, Clone)]
pub struct RecoveryNote<'a> {
    /// Rendered team state.
    pub recovery_text: &'a str,
    /// Where the checkpoint was written, mentioned to the model.
    pub checkpoint_path: Option<&'a str>,
    pub now: DateTime<Utc>,
}

/// Replace any earlier snapshot pair with a fresh one for `snapshot`.
///
/// An empty snapshot, or a session with no message carrying an id, is
/// returned unchanged.
pub fn inject_snapshot(
    messages: Vec<Message>,
    snapshot: &TeamSnapshot,
    note: &RecoveryNote<'_>,
) -> Injection {
    if snapshot.is_empty() || !messages.iter().any(|m| m.id().is_some()) {
        return Injection {
            messages,
            superseded: 0,
            injected: false,
        };
    }

    let stale: HashSet<usize> = messages
        .iter()
        .filter(|m| is_snapshot_message(m))
        .map(|m| m.line)
        .collect();
    let mut output: Vec<Message> = messages
        .iter()
        .filter(|m| !stale.contains(&m.line))
        .cloned()
        .collect();
    relink_orphans(&messages, &mut output);

    let Some(anchor) = output.iter().rev().find(|m| m.id().is_some()) else {
        return Injection {
            messages,
            superseded: 0,
            injected: false,
        };
    };
    let anchor_id = anchor.id().map(str::to_string);
    let envelope: Map<String, Value> = ENVELOPE_FIELDS
        .iter()
        .filter_map(|key| anchor.record().get(*key).map(|v| ((*key).to_string(), v.clone())))
        .collect();

    let next_line = messages.iter().map(|m| m.line + 1).max().unwrap_or(0);
    let timestamp = note.now.to_rfc3339_opts(SecondsFormat::Millis, true);
    let user_id = Uuid::new_v4().to_string();
    let assistant_id = Uuid::new_v4().to_string();

    let directive = format!(
        "{SNAPSHOT_MARKER} Context was pruned to prevent compaction. \
         Confirm the current agent team state below.\n\n{}",
        note.recovery_text
    );
    let checkpoint_line = note
        .checkpoint_path
        .map(|path| format!("A team state checkpoint was also written to {path}.\n\n"))
        .unwrap_or_default();
    let confirmation = format!(
        "{SNAPSHOT_MARKER} Confirmed, I have an active agent team. {}\n\n\
         {checkpoint_line}Continuing with team coordination.",
        note.recovery_text
    );

    let user = synthetic_record(
        "user",
        &user_id,
        anchor_id.as_deref(),
        &timestamp,
        &envelope,
        json!({"role": "user", "content": directive}),
    );
    let assistant = synthetic_record(
        "assistant",
        &assistant_id,
        Some(&user_id),
        &timestamp,
        &envelope,
        json!({"role": "assistant", "content": [{"type": "text", "text": confirmation}]}),
    );
    output.push(Message::from_record(next_line, user));
    output.push(Message::from_record(next_line + 1, assistant));

    debug!(
        superseded = stale.len(),
        user = %user_id,
        assistant = %assistant_id,
        "injected team snapshot"
    );
    Injection {
        messages: output,
        superseded: stale.len(),
        injected: true,
    }
}

fn synthetic_record(
    kind: &str,
    id: &str,
    parent: Option<&str>,
    timestamp: &str,
    envelope: &Map<String, Value>,
    body: Value,
) -> Map<String, Value> {
    let mut record = Map::new();
    record.insert("parentUuid".to_string(), json!(parent));
    record.insert("isSidechain".to_string(), json!(false));
    record.insert("userType".to_string(), json!("external"));
    for (key, value) in envelope {
        record.insert(key.clone(), value.clone());
    }
    record.insert("type".to_string(), json!(kind));
    record.insert("message".to_string(), body);
    record.insert("uuid".to_string(), json!(id));
    record.insert("timestamp".to_string(), json!(timestamp));
    record
}
