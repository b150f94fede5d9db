//! Replay of a session log into an ordered list of conversation messages

use crate::events::{decode_line, Event, Record, ToolStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::io::BufRead;
use std::path::Path;
use tokenwise_telemetry::TokenUsage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    User,
    Assistant,
    ToolResult,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::ToolResult => "tool-result",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub invocation_id: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutcome {
    pub invocation_id: String,
    #[serde(serialize_with = "serialize_status")]
    pub status: ToolStatus,
    pub output: String,
}

fn serialize_status<S: serde::Serializer>(status: &ToolStatus, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(status.as_str())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub usage: TokenUsage,
    pub tool_use: Option<ToolInvocation>,
    pub tool_result: Option<ToolOutcome>,
    /// Tool result whose invocation never appeared earlier in the session
    pub orphan: bool,
}

impl ConversationMessage {
    fn new(role: Role, content: String, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            role,
            content,
            timestamp,
            tokens_in: 0,
            tokens_out: 0,
            usage: TokenUsage::default(),
            tool_use: None,
            tool_result: None,
            orphan: false,
        }
    }

    fn add_usage(&mut self, usage: TokenUsage) {
        self.usage += usage;
        self.tokens_in = self.usage.tokens_in();
        self.tokens_out = self.usage.tokens_out();
    }
}

/// Everything reconstructed from one session log
#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    pub session_id: Option<String>,
    pub cwd: Option<String>,
    pub git_branch: Option<String>,
    pub messages: Vec<ConversationMessage>,
    pub malformed_records: usize,
    pub unknown_records: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Transcript {
    pub fn orphans(&self) -> Vec<&ConversationMessage> {
        self.messages.iter().filter(|m| m.orphan).collect()
    }

    /// Tool invocations that never received a result
    pub fn unanswered_tool_uses(&self) -> Vec<&ToolInvocation> {
        let answered: HashSet<&str> = self
            .messages
            .iter()
            .filter_map(|m| m.tool_result.as_ref())
            .map(|r| r.invocation_id.as_str())
            .collect();

        self.messages
            .iter()
            .filter_map(|m| m.tool_use.as_ref())
            .filter(|u| !answered.contains(u.invocation_id.as_str()))
            .collect()
    }

    pub fn tool_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for invocation in self.messages.iter().filter_map(|m| m.tool_use.as_ref()) {
            *counts.entry(invocation.tool_name.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Summed fresh on every call
    pub fn usage(&self) -> TokenUsage {
        self.messages.iter().map(|m| m.usage).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Incremental state of one replay
#[derive(Default)]
struct Replay {
    transcript: Transcript,
    seen_tool_uses: HashSet<String>,
    /// Usage already attributed, by API message id
    counted_messages: HashSet<String>,
    /// Usage from records that produced no message yet
    pending_usage: Option<TokenUsage>,
}

impl Replay {
    fn apply(&mut self, record: Record) {
        let t = &mut self.transcript;
        if t.session_id.is_none() {
            t.session_id = record.session_id.clone();
        }
        if t.cwd.is_none() {
            t.cwd = record.cwd.clone();
        }
        if t.git_branch.is_none() {
            t.git_branch = record.git_branch.clone();
        }
        if let Some(ts) = record.timestamp {
            t.started_at = Some(t.started_at.map_or(ts, |s| s.min(ts)));
            t.ended_at = Some(t.ended_at.map_or(ts, |e| e.max(ts)));
        }

        if record.is_unknown() {
            t.unknown_records += 1;
            return;
        }

        let fresh = self.fresh_usage(&record);
        let first_message = self.transcript.messages.len();

        for event in record.events {
            if let Some(message) = self.message_for(event, record.timestamp) {
                self.transcript.messages.push(message);
            }
        }

        let usage = match (self.pending_usage.take(), fresh) {
            (None, None) => return,
            (pending, fresh) => {
                let mut total = pending.unwrap_or_default();
                total += fresh.unwrap_or_default();
                total
            }
        };

        // Usage belongs to the first message a record produced
        match self.transcript.messages.get_mut(first_message) {
            Some(message) => message.add_usage(usage),
            None => self.pending_usage = Some(usage),
        }
    }

    /// Usage of a record unless its API message was already counted
    fn fresh_usage(&mut self, record: &Record) -> Option<TokenUsage> {
        let usage = record.usage?;
        match &record.message_id {
            Some(id) if !self.counted_messages.insert(id.clone()) => None,
            _ => Some(usage),
        }
    }

    fn message_for(
        &mut self,
        event: Event,
        timestamp: Option<DateTime<Utc>>,
    ) -> Option<ConversationMessage> {
        let message = match event {
            Event::UserTurn { text } => ConversationMessage::new(Role::User, text, timestamp),
            Event::AssistantText { text } => {
                ConversationMessage::new(Role::Assistant, text, timestamp)
            }
            Event::ToolUse {
                invocation_id,
                tool_name,
                parameters,
            } => {
                self.seen_tool_uses.insert(invocation_id.clone());
                let mut message = ConversationMessage::new(
                    Role::Assistant,
                    format!("[tool: {tool_name}]"),
                    timestamp,
                );
                message.tool_use = Some(ToolInvocation {
                    tool_name,
                    invocation_id,
                    parameters,
                });
                message
            }
            Event::ToolResult {
                invocation_id,
                status,
                output,
            } => {
                let orphan = !self.seen_tool_uses.contains(&invocation_id);
                if orphan {
                    tracing::warn!(invocation_id = %invocation_id, "tool result without a preceding tool use");
                }
                let mut message = ConversationMessage::new(Role::ToolResult, output.clone(), timestamp);
                message.orphan = orphan;
                message.tool_result = Some(ToolOutcome {
                    invocation_id,
                    status,
                    output,
                });
                message
            }
            Event::Unknown { .. } => return None,
        };
        Some(message)
    }

    fn finish(mut self) -> Transcript {
        if let Some(pending) = self.pending_usage.take() {
            if let Some(last) = self.transcript.messages.last_mut() {
                last.add_usage(pending);
            }
        }
        if self.transcript.malformed_records > 0 {
            tracing::warn!(
                count = self.transcript.malformed_records,
                "skipped malformed session log records"
            );
        }
        self.transcript
    }
}

/// Replay a log stream from the start. A read error ends the replay early
/// with whatever was decoded so far.
pub fn parse<R: BufRead>(reader: R) -> Transcript {
    let mut replay = Replay::default();

    for line in reader.split(b'\n') {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "session log read interrupted");
                break;
            }
        };
        let Ok(line) = std::str::from_utf8(&line) else {
            replay.transcript.malformed_records += 1;
            continue;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match decode_line(line) {
            Ok(record) => replay.apply(record),
            Err(e) => {
                tracing::debug!(error = %e, "malformed session log record");
                replay.transcript.malformed_records += 1;
            }
        }
    }

    replay.finish()
}

pub fn parse_str(log: &str) -> Transcript {
    parse(log.as_bytes())
}

pub fn parse_file(path: &Path) -> std::io::Result<Transcript> {
    let file = std::fs::File::open(path)?;
    Ok(parse(std::io::BufReader::new(file)))
}
