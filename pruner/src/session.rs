//! Transcript records and their typed views.
//!
//! A session is an ordered JSONL file. Each line is kept as an order-preserving
//! JSON object so fields this crate does not know about survive a rewrite, and
//! lines that no strategy touched are written back byte-for-byte.

use serde_json::{Map, Value};

/// Record tag (`type` field) of a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    User,
    Assistant,
    Progress,
    Summary,
    QueueOperation,
    FileHistorySnapshot,
    System,
    Other,
}

impl MessageKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "user" => Self::User,
            "assistant" => Self::Assistant,
            "progress" => Self::Progress,
            "summary" => Self::Summary,
            "queue-operation" => Self::QueueOperation,
            "file-history-snapshot" => Self::FileHistorySnapshot,
            "system" => Self::System,
            _ => Self::Other,
        }
    }
}

/// One line of a session transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Zero-based line number in the file the session was loaded from.
    ///
    /// Stable for the lifetime of an invocation; synthetic messages get lines
    /// past the end of the loaded sequence.
    pub line: usize,
    record: Map<String, Value>,
    /// Original line text while the record is untouched.
    raw: Option<String>,
    size: usize,
}

impl Message {
    /// Parse a single JSONL line. The line must hold a JSON object.
    ///
    /// Lone UTF-16 surrogate escapes (half of a split emoji) are read as
    /// U+FFFD; the original text is still what an untouched line writes back.
    pub fn parse(line: usize, text: &str) -> serde_json::Result<Self> {
        let record: Map<String, Value> = match serde_json::from_str(text) {
            Ok(record) => record,
            Err(err) => match replace_lone_surrogates(text) {
                Some(repaired) => serde_json::from_str(&repaired)?,
                None => return Err(err),
            },
        };
        Ok(Self {
            line,
            record,
            size: text.len() + 1,
            raw: Some(text.to_string()),
        })
    }

    /// Build a message from an in-memory record (serialized compactly).
    pub fn from_record(line: usize, record: Map<String, Value>) -> Self {
        let size = serialized_len(&record) + 1;
        Self {
            line,
            record,
            raw: None,
            size,
        }
    }

    pub fn record(&self) -> &Map<String, Value> {
        &self.record
    }

    /// Clone this message and apply `edit` to the clone's record.
    ///
    /// The returned message keeps this message's line number.
    pub fn edited<F: FnOnce(&mut Map<String, Value>)>(&self, edit: F) -> Self {
        let mut record = self.record.clone();
        edit(&mut record);
        Self::from_record(self.line, record)
    }

    pub fn id(&self) -> Option<&str> {
        self.record.get("uuid").and_then(Value::as_str)
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.record.get("parentUuid").and_then(Value::as_str)
    }

    /// Re-point this message at a different parent. Only lineage repair may call this.
    pub(crate) fn set_parent_id(&mut self, parent: Option<&str>) {
        if self.parent_id() == parent {
            return;
        }
        let value = match parent {
            Some(id) => Value::String(id.to_string()),
            None => Value::Null,
        };
        self.record.insert("parentUuid".to_string(), value);
        self.raw = None;
        self.size = serialized_len(&self.record) + 1;
    }

    pub fn kind_tag(&self) -> &str {
        self.record
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn kind(&self) -> MessageKind {
        MessageKind::from_tag(self.kind_tag())
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.record.get("timestamp").and_then(Value::as_str)
    }

    /// Inner `message` object carrying role, content and model metadata.
    pub fn body(&self) -> Option<&Map<String, Value>> {
        self.record.get("message").and_then(Value::as_object)
    }

    pub fn role(&self) -> Option<&str> {
        self.body()?.get("role").and_then(Value::as_str)
    }

    pub fn content(&self) -> Option<&Value> {
        self.body()?.get("content")
    }

    /// Content blocks, or an empty slice when content is a plain string.
    pub fn blocks(&self) -> &[Value] {
        match self.content() {
            Some(Value::Array(blocks)) => blocks,
            _ => &[],
        }
    }

    /// Text of every text block, or the plain string content.
    pub fn texts(&self) -> Vec<&str> {
        match self.content() {
            Some(Value::String(text)) => vec![text.as_str()],
            Some(Value::Array(blocks)) => blocks
                .iter()
                .filter(|block| block_type(block) == Some("text"))
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Serialized size in bytes including the trailing newline.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_untouched(&self) -> bool {
        self.raw.is_some()
    }

    /// JSONL text for this message (without the trailing newline).
    pub fn to_line(&self) -> String {
        match &self.raw {
            Some(raw) => raw.clone(),
            None => serde_json::to_string(&self.record).unwrap_or_default(),
        }
    }

    /// True if both records are equal once `parentUuid` is ignored.
    pub fn same_body(&self, other: &Message) -> bool {
        if self.record.len() != other.record.len() {
            return false;
        }
        self.record
            .iter()
            .filter(|(key, _)| key.as_str() != "parentUuid")
            .all(|(key, value)| other.record.get(key) == Some(value))
    }
}

/// Total serialized size of a sequence in bytes.
pub fn total_size(messages: &[Message]) -> usize {
    messages.iter().map(Message::size).sum()
}

/// `type` tag of a content block.
pub fn block_type(block: &Value) -> Option<&str> {
    block.get("type").and_then(Value::as_str)
}

/// Mutable content block list inside a record, if content is an array.
pub fn blocks_mut(record: &mut Map<String, Value>) -> Option<&mut Vec<Value>> {
    record
        .get_mut("message")?
        .as_object_mut()?
        .get_mut("content")?
        .as_array_mut()
}

/// Flattened text of a `tool_result` block's content (string or text blocks).
pub fn tool_result_text(block: &Value) -> String {
    match block.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn surrogate_escape(bytes: &[u8], at: usize) -> Option<u16> {
    let digits = bytes.get(at + 2..at + 6)?;
    if bytes.get(at + 1) != Some(&b'u') {
        return None;
    }
    let code = u16::from_str_radix(std::str::from_utf8(digits).ok()?, 16).ok()?;
    (0xD800..=0xDFFF).contains(&code).then_some(code)
}

/// Copy of `text` with unpaired `\uD800`-`\uDFFF` escapes replaced by
/// `\ufffd`, or `None` when there are none.
fn replace_lone_surrogates(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    let mut changed = false;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            i += 1;
            continue;
        }
        let Some(code) = surrogate_escape(bytes, i) else {
            // Any other escape, `\\` included: skip both characters.
            i += 2;
            continue;
        };
        let paired = (0xD800..0xDC00).contains(&code)
            && bytes.get(i + 6) == Some(&b'\\')
            && surrogate_escape(bytes, i + 6).is_some_and(|low| low >= 0xDC00);
        if paired {
            i += 12;
            continue;
        }
        out.push_str(&text[copied..i]);
        out.push_str("\\ufffd");
        i += 6;
        copied = i;
        changed = true;
    }
    if !changed {
        return None;
    }
    out.push_str(&text[copied..]);
    Some(out)
}

fn serialized_len(record: &Map<String, Value>) -> usize {
    serde_json::to_string(record).map(|s| s.len()).unwrap_or(0)
}
