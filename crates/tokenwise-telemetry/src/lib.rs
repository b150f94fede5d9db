//! Telemetry records, JSONL storage and path layout shared by every tokenwise crate

mod io;
mod paths;
mod tokens;
mod types;

pub use io::{append_jsonl, atomic_write, is_temp_artifact, read_jsonl, read_jsonl_counted};
pub use paths::{encode_project_path, Paths};
pub use tokens::{estimate_json_tokens, estimate_tokens, ContentMix};
pub use types::{
    ArchiveRecord, CacheEvent, CacheOutcome, PromptRecord, SessionEvent, SessionEventKind, TokenUsage,
    ToolUsageRecord,
};
