//! Decoding of raw session log records into typed events
//!
//! Each line of the host's session log is one JSON record. `user` and
//! `assistant` records carry a `message` whose `content` is either a string
//! or a list of blocks; every block of interest becomes one [`Event`].
//! Other record types (summaries, system notices, file snapshots) decode to
//! [`Event::Unknown`].

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokenwise_telemetry::TokenUsage;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid JSON record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{kind} record has no decodable message")]
    MissingMessage { kind: String },

    #[error("{kind} record has an invalid message: {source}")]
    Message {
        kind: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Success,
    Error,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::Success => "success",
            ToolStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    UserTurn {
        text: String,
    },
    AssistantText {
        text: String,
    },
    ToolUse {
        invocation_id: String,
        tool_name: String,
        parameters: Value,
    },
    ToolResult {
        invocation_id: String,
        status: ToolStatus,
        output: String,
    },
    Unknown {
        kind: String,
    },
}

/// One decoded log line
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub session_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub cwd: Option<String>,
    pub git_branch: Option<String>,
    /// API message id; split messages repeat it along with their usage
    pub message_id: Option<String>,
    pub usage: Option<TokenUsage>,
    pub events: Vec<Event>,
}

impl Record {
    pub fn is_unknown(&self) -> bool {
        matches!(self.events.as_slice(), [Event::Unknown { .. }])
    }
}

#[derive(Deserialize)]
struct RawRecord {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(rename = "sessionId", default)]
    session_id: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(rename = "gitBranch", default)]
    git_branch: Option<String>,
    #[serde(default)]
    message: Option<Value>,
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    content: RawContent,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Blocks(Vec<RawBlock>),
}

impl Default for RawContent {
    fn default() -> Self {
        RawContent::Text(String::new())
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: Option<bool>,
    },
    #[serde(other)]
    Other,
}

/// Decode one log line
pub fn decode_line(line: &str) -> Result<Record, DecodeError> {
    let raw: RawRecord = serde_json::from_str(line)?;
    let kind = raw.kind.unwrap_or_else(|| "unknown".to_string());

    let mut record = Record {
        session_id: raw.session_id,
        timestamp: raw.timestamp,
        cwd: raw.cwd,
        git_branch: raw.git_branch,
        message_id: None,
        usage: None,
        events: Vec::new(),
    };

    let is_user = match kind.as_str() {
        "user" => true,
        "assistant" => false,
        _ => {
            record.events.push(Event::Unknown { kind });
            return Ok(record);
        }
    };

    let message = match raw.message {
        Some(Value::Object(map)) => Value::Object(map),
        _ => return Err(DecodeError::MissingMessage { kind }),
    };
    let message: RawMessage = serde_json::from_value(message)
        .map_err(|source| DecodeError::Message { kind, source })?;

    record.message_id = message.id;
    record.usage = message.usage;
    record.events = match message.content {
        RawContent::Text(text) if text.trim().is_empty() => Vec::new(),
        RawContent::Text(text) => vec![text_event(is_user, text)],
        RawContent::Blocks(blocks) => block_events(is_user, blocks),
    };
    Ok(record)
}

fn text_event(is_user: bool, text: String) -> Event {
    if is_user {
        Event::UserTurn { text }
    } else {
        Event::AssistantText { text }
    }
}

fn block_events(is_user: bool, blocks: Vec<RawBlock>) -> Vec<Event> {
    let mut events = Vec::new();
    let mut text_parts: Vec<String> = Vec::new();

    for block in blocks {
        match block {
            RawBlock::Text { text } if !text.trim().is_empty() => text_parts.push(text),
            RawBlock::Text { .. } | RawBlock::Other => {}
            RawBlock::ToolUse { id, name, input } => events.push(Event::ToolUse {
                invocation_id: id,
                tool_name: name,
                parameters: input,
            }),
            RawBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => events.push(Event::ToolResult {
                invocation_id: tool_use_id,
                status: if is_error.unwrap_or(false) {
                    ToolStatus::Error
                } else {
                    ToolStatus::Success
                },
                output: result_text(&content),
            }),
        }
    }

    if !text_parts.is_empty() {
        events.insert(0, text_event(is_user, text_parts.join("\n")));
    }
    events
}

/// Flatten a tool result's content (string or list of text blocks)
fn result_text(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                other => other.get("text").and_then(Value::as_str).map(str::to_string),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}
