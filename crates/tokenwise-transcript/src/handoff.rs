//! Handoff summary written before the host compacts a conversation
//!
//! One file per project. Each compaction prepends a dated update section and
//! keeps the most recent earlier ones below it, so the file carries context
//! across several compactions without growing without bound.

use crate::parser::{Role, Transcript};
use crate::summary::SessionSummary;
use chrono::{DateTime, Local};
use std::path::Path;
use tokenwise_core::Pricing;
use tokenwise_telemetry::atomic_write;

pub const SUMMARY_TITLE: &str = "# Conversation Summary";

const UPDATE_HEADING: &str = "## Update ";
const MAX_TOPICS: usize = 10;
const MAX_TOPIC_CHARS: usize = 100;
const MIN_PROMPT_CHARS: usize = 20;
const MIN_TOPIC_CHARS: usize = 10;
const MAX_UPDATES: usize = 10;

/// Opening sentence of each substantial user prompt, oldest first
pub fn key_topics(transcript: &Transcript) -> Vec<String> {
    transcript
        .messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.trim())
        .filter(|content| content.chars().count() > MIN_PROMPT_CHARS && !content.starts_with('<'))
        .filter_map(|content| {
            let sentence = content.split('.').next().unwrap_or(content);
            let topic: String = sentence
                .chars()
                .take(MAX_TOPIC_CHARS)
                .map(|c| if c.is_whitespace() { ' ' } else { c })
                .collect();
            let topic = topic.trim().to_string();
            (topic.chars().count() > MIN_TOPIC_CHARS).then_some(topic)
        })
        .take(MAX_TOPICS)
        .collect()
}

/// One update section for the summary file
pub fn render_update(
    transcript: &Transcript,
    pricing: &Pricing,
    trigger: &str,
    now: DateTime<Local>,
) -> String {
    let summary = SessionSummary::from_transcript(transcript, pricing);
    let usage = summary.usage;

    let mut lines = vec![
        format!("{UPDATE_HEADING}{} ({trigger})", now.format("%Y-%m-%d %H:%M:%S")),
        format!("Session: {}", summary.session_id),
        format!(
            "Messages: {} | Tool calls: {} | Duration: {}",
            summary.message_count,
            summary.tool_calls,
            summary
                .duration_secs()
                .map(|s| format!("{s}s"))
                .unwrap_or_else(|| "unknown".to_string())
        ),
        String::new(),
        "### Token Usage".to_string(),
        format!("- Input: {}", usage.input),
        format!("- Output: {}", usage.output),
        format!("- Cache: {}", usage.cache_read + usage.cache_creation),
        format!("- Estimated cost: ${:.4}", summary.estimated_cost),
        String::new(),
        "### Tools Used".to_string(),
    ];

    let mut tools: Vec<(String, usize)> = transcript.tool_counts().into_iter().collect();
    tools.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    if tools.is_empty() {
        lines.push("- none".to_string());
    }
    lines.extend(tools.iter().map(|(name, count)| format!("- {name}: {count}")));

    lines.push(String::new());
    lines.push("### Key Topics".to_string());
    let topics = key_topics(transcript);
    if topics.is_empty() {
        lines.push("- none recorded".to_string());
    }
    lines.extend(
        topics
            .iter()
            .enumerate()
            .map(|(i, topic)| format!("{}. {topic}", i + 1)),
    );

    lines.join("\n")
}

/// Prepend a fresh update to the summary file at `path`, keeping the newest
/// earlier updates
pub fn write_handoff(
    path: &Path,
    transcript: &Transcript,
    pricing: &Pricing,
    trigger: &str,
    now: DateTime<Local>,
) -> std::io::Result<()> {
    let existing = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    let update = render_update(transcript, pricing, trigger, now);
    let previous = previous_updates(&existing);

    let mut out = format!("{SUMMARY_TITLE}\n");
    for section in std::iter::once(update.as_str())
        .chain(previous.iter().map(String::as_str))
        .take(MAX_UPDATES)
    {
        out.push('\n');
        out.push_str(section.trim_end());
        out.push('\n');
    }

    atomic_write(path, out.as_bytes())?;
    tracing::debug!(path = %path.display(), kept = previous.len().min(MAX_UPDATES - 1), "wrote handoff summary");
    Ok(())
}

fn previous_updates(existing: &str) -> Vec<String> {
    let separator = format!("\n{UPDATE_HEADING}");
    existing
        .split(separator.as_str())
        .skip(1)
        .map(|section| format!("{UPDATE_HEADING}{}", section.trim_end()))
        .collect()
}
