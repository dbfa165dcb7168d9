//! Test-only helpers for constructing transcript messages and sessions.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Value, json};

use crate::core::registry::StrategyDescriptor;
use crate::core::types::{StrategyConfig, StrategyResult, Tier};
use crate::error::StrategyError;
use crate::session::Message;

/// Build a message from a JSON object literal.
pub fn msg(line: usize, value: Value) -> Message {
    let text = serde_json::to_string(&value).expect("serialize test record");
    Message::parse(line, &text).expect("test record must be an object")
}

fn envelope(kind: &str, id: &str, parent: Option<&str>, body: Value) -> Value {
    json!({
        "parentUuid": parent,
        "isSidechain": false,
        "userType": "external",
        "cwd": "/work/project",
        "sessionId": "session-1",
        "version": "2.0.0",
        "gitBranch": "main",
        "type": kind,
        "message": body,
        "uuid": id,
        "timestamp": "2026-01-01T00:00:00.000Z",
    })
}

pub fn user_text(line: usize, id: &str, parent: Option<&str>, text: &str) -> Message {
    msg(
        line,
        envelope(
            "user",
            id,
            parent,
            json!({"role": "user", "content": text}),
        ),
    )
}

pub fn assistant_text(line: usize, id: &str, parent: Option<&str>, text: &str) -> Message {
    msg(
        line,
        envelope(
            "assistant",
            id,
            parent,
            json!({
                "role": "assistant",
                "model": "test-model",
                "content": [{"type": "text", "text": text}],
                "stop_reason": "end_turn",
                "stop_sequence": null,
                "usage": {"input_tokens": 10, "output_tokens": 5},
            }),
        ),
    )
}

/// Assistant message with a single tool call; the call id is `toolu_<id>`.
pub fn assistant_tool_use(
    line: usize,
    id: &str,
    parent: Option<&str>,
    name: &str,
    input: Value,
) -> Message {
    msg(
        line,
        envelope(
            "assistant",
            id,
            parent,
            json!({
                "role": "assistant",
                "content": [{"type": "tool_use", "id": format!("toolu_{id}"), "name": name, "input": input}],
            }),
        ),
    )
}

pub fn user_tool_result(
    line: usize,
    id: &str,
    parent: Option<&str>,
    tool_use_id: &str,
    output: &str,
) -> Message {
    msg(
        line,
        envelope(
            "user",
            id,
            parent,
            json!({
                "role": "user",
                "content": [{"type": "tool_result", "tool_use_id": tool_use_id, "content": output}],
            }),
        ),
    )
}

pub fn progress(line: usize, id: &str, parent: Option<&str>) -> Message {
    msg(
        line,
        json!({
            "parentUuid": parent,
            "type": "progress",
            "data": {"type": "hook_progress", "hookEvent": "PostToolUse"},
            "uuid": id,
            "timestamp": "2026-01-01T00:00:00.000Z",
        }),
    )
}

/// Sequential session builder: assigns lines and chains each message to the previous.
#[derive(Debug, Default)]
pub struct SessionBuilder {
    messages: Vec<Message>,
    last_id: Option<String>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_line(&self) -> usize {
        self.messages.len()
    }

    fn next_id(&self) -> String {
        format!("m{:04}", self.messages.len())
    }

    fn push(&mut self, message: Message) -> &mut Self {
        self.last_id = message.id().map(str::to_string);
        self.messages.push(message);
        self
    }

    pub fn user(&mut self, text: &str) -> &mut Self {
        let message = user_text(self.next_line(), &self.next_id(), self.last_id.as_deref(), text);
        self.push(message)
    }

    pub fn assistant(&mut self, text: &str) -> &mut Self {
        let message =
            assistant_text(self.next_line(), &self.next_id(), self.last_id.as_deref(), text);
        self.push(message)
    }

    pub fn progress(&mut self) -> &mut Self {
        let message = progress(self.next_line(), &self.next_id(), self.last_id.as_deref());
        self.push(message)
    }

    pub fn tool_use(&mut self, name: &str, input: Value) -> &mut Self {
        let message = assistant_tool_use(
            self.next_line(),
            &self.next_id(),
            self.last_id.as_deref(),
            name,
            input,
        );
        self.push(message)
    }

    /// Tool result answering the most recent tool call.
    pub fn tool_result(&mut self, output: &str) -> &mut Self {
        let tool_use_id = self
            .last_id
            .as_deref()
            .map(|id| format!("toolu_{id}"))
            .unwrap_or_default();
        let message = user_tool_result(
            self.next_line(),
            &self.next_id(),
            self.last_id.as_deref(),
            &tool_use_id,
            output,
        );
        self.push(message)
    }

    pub fn raw(&mut self, value: Value) -> &mut Self {
        let message = msg(self.next_line(), value);
        self.push(message)
    }

    pub fn build(&self) -> Vec<Message> {
        self.messages.clone()
    }
}

/// Write messages as a JSONL session file.
pub fn write_session_file(path: &Path, messages: &[Message]) -> Result<()> {
    let mut buf = String::new();
    for message in messages {
        buf.push_str(&message.to_line());
        buf.push('\n');
    }
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

/// Session with 40 progress ticks, 5 team messages and one 40KB tool output.
///
/// Exactly 100 messages.
pub fn scenario_session() -> Vec<Message> {
    let mut builder = SessionBuilder::new();
    builder.user("Build the release pipeline");
    builder.tool_use(
        "TeamCreate",
        json!({
            "name": "release",
            "teammates": [
                {"agentId": "agent-1", "name": "builder", "role": "compiles artifacts"},
                {"agentId": "agent-2", "name": "tester", "role": "runs the suites"},
            ],
        }),
    );
    builder.tool_use(
        "TaskCreate",
        json!({"taskId": "1", "subject": "Compile", "owner": "builder"}),
    );
    builder.tool_use(
        "TaskCreate",
        json!({"taskId": "2", "subject": "Test", "owner": "tester"}),
    );
    builder.tool_use("TaskUpdate", json!({"taskId": "1", "status": "in_progress"}));
    builder.tool_use("SendMessage", json!({"to": "agent-2", "message": "stand by"}));
    for _ in 0..40 {
        builder.progress();
    }
    builder.tool_use("Bash", json!({"command": "cargo build"}));
    let big = (0..720)
        .map(|i| format!("compiling crate number {i:04} ............................"))
        .collect::<Vec<_>>()
        .join("\n");
    builder.tool_result(&big);
    while builder.next_line() < 100 {
        if builder.next_line() % 2 == 0 {
            builder.user("next step please");
        } else {
            builder.assistant("Working on the next step now.");
        }
    }
    builder.build()
}

fn always_fails(_: &[Message], _: &StrategyConfig) -> Result<StrategyResult, StrategyError> {
    Err(StrategyError("simulated failure".to_string()))
}

/// Strategy that always fails, for strict-mode and abort paths.
pub static FAILING_STRATEGY: StrategyDescriptor = StrategyDescriptor {
    name: "always-fails",
    tier: Tier::Aggressive,
    description: "fails without proposing anything",
    estimate: "0%",
    run: always_fails,
};
