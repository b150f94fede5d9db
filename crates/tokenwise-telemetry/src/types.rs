//! Persisted telemetry record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::path::PathBuf;

/// One prompt-submit invocation, appended to the day's optimizer log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub original_text: String,
    pub optimized_text: String,
    pub is_simple_query: bool,
    pub char_savings: usize,
    #[serde(default)]
    pub optimization_applied: bool,
    /// Written while the project was in baseline (optimization disabled) mode
    #[serde(default)]
    pub baseline: bool,
}

impl PromptRecord {
    pub fn original_chars(&self) -> usize {
        self.original_text.chars().count()
    }

    pub fn optimized_chars(&self) -> usize {
        self.optimized_text.chars().count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
    Hit,
    Miss,
    Store,
}

/// Instrumentation record for one cache lookup or store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Operation kind (`file_read`, `command`, `search`)
    pub kind: String,
    pub outcome: CacheOutcome,
    #[serde(default)]
    pub payload_bytes: usize,
    #[serde(default)]
    pub estimated_tokens: usize,
}

/// One completed tool call, appended to the day's tool usage log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUsageRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub tool_name: String,
    #[serde(default = "default_success")]
    pub success: bool,
}

fn default_success() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    Stop,
    PreCompact,
}

/// A session lifecycle hook firing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub event: SessionEventKind,
}

/// One transcript moved from the current area into the archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub session_id: String,
    pub source_path: PathBuf,
    pub archived_path: PathBuf,
    pub archived_at: DateTime<Utc>,
}

/// Token counts reported by the model API for one message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(rename = "input_tokens", default)]
    pub input: u64,
    #[serde(rename = "output_tokens", default)]
    pub output: u64,
    #[serde(rename = "cache_creation_input_tokens", default)]
    pub cache_creation: u64,
    #[serde(rename = "cache_read_input_tokens", default)]
    pub cache_read: u64,
}

impl TokenUsage {
    /// Everything sent to the model, cached or not
    pub fn tokens_in(&self) -> u64 {
        self.input + self.cache_creation + self.cache_read
    }

    pub fn tokens_out(&self) -> u64 {
        self.output
    }

    pub fn total(&self) -> u64 {
        self.tokens_in() + self.tokens_out()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input += rhs.input;
        self.output += rhs.output;
        self.cache_creation += rhs.cache_creation;
        self.cache_read += rhs.cache_read;
    }
}

impl std::iter::Sum for TokenUsage {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        let mut total = TokenUsage::default();
        for usage in iter {
            total += usage;
        }
        total
    }
}
