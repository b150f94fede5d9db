//! Session log parsing, transcript rendering, handoff summaries and archive rotation

mod archive;
mod events;
mod handoff;
mod parser;
mod render;
mod summary;

pub use archive::{ArchiveError, Materialized, Rotation, SessionArchiver, SessionState};
pub use events::{decode_line, DecodeError, Event, Record, ToolStatus};
pub use handoff::{key_topics, render_update, write_handoff, SUMMARY_TITLE};
pub use parser::{
    parse, parse_file, parse_str, ConversationMessage, Role, ToolInvocation, ToolOutcome,
    Transcript,
};
pub use render::{render_markdown, MAX_CONTENT_CHARS};
pub use summary::SessionSummary;
