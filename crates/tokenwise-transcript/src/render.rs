//! Markdown rendering of a reconstructed transcript

use crate::parser::{Role, Transcript};
use crate::summary::SessionSummary;
use tokenwise_core::Pricing;

/// Longer message bodies are cut here, on a char boundary
pub const MAX_CONTENT_CHARS: usize = 2000;

pub fn render_markdown(transcript: &Transcript, pricing: &Pricing) -> String {
    let summary = SessionSummary::from_transcript(transcript, pricing);
    let or_unknown = |value: Option<String>| value.unwrap_or_else(|| "Unknown".to_string());
    let usage = summary.usage;

    let mut lines = vec![
        "# Session Transcript".to_string(),
        format!("Session ID: {}", summary.session_id),
        format!("Project: {}", or_unknown(transcript.cwd.clone())),
        format!("Git Branch: {}", or_unknown(transcript.git_branch.clone())),
        format!("Start Time: {}", or_unknown(summary.start_ts.map(|t| t.to_rfc3339()))),
        format!("End Time: {}", or_unknown(summary.end_ts.map(|t| t.to_rfc3339()))),
        String::new(),
        "## Token Usage Summary".to_string(),
        format!("- Input Tokens: {}", usage.input),
        format!("- Output Tokens: {}", usage.output),
        format!("- Cache Creation: {}", usage.cache_creation),
        format!("- Cache Read: {}", usage.cache_read),
        format!("- **Total Tokens: {}**", summary.total_tokens),
        format!("- **Estimated Cost: ${:.6}**", summary.estimated_cost),
    ];
    if transcript.malformed_records > 0 {
        lines.push(format!(
            "- Malformed records skipped: {}",
            transcript.malformed_records
        ));
    }
    lines.push(String::new());

    let tools = transcript.tool_counts();
    if !tools.is_empty() {
        lines.push("## Tool Usage".to_string());
        lines.push("| Tool | Calls |".to_string());
        lines.push("|------|-------|".to_string());
        lines.extend(tools.iter().map(|(name, count)| format!("| {name} | {count} |")));
        lines.push(String::new());
    }

    lines.push(format!(
        "## Conversation ({} messages)",
        transcript.messages.len()
    ));
    lines.push(String::new());

    for (i, message) in transcript.messages.iter().enumerate() {
        let when = or_unknown(
            message
                .timestamp
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
        );
        lines.push(format!(
            "### Message {} - {} [{}]",
            i + 1,
            message.role.as_str().to_uppercase(),
            when
        ));

        if message.role == Role::Assistant && !message.usage.is_empty() {
            lines.push(format!(
                "*Tokens: {} in + {} out*",
                message.tokens_in, message.tokens_out
            ));
        }
        if let Some(result) = &message.tool_result {
            let marker = if message.orphan { " (orphan: no matching tool use)" } else { "" };
            lines.push(format!(
                "*Result for {} [{}]{}*",
                result.invocation_id,
                result.status.as_str(),
                marker
            ));
        }
        lines.push(String::new());

        let (body, total) = truncate_chars(&message.content, MAX_CONTENT_CHARS);
        match total {
            Some(total) => {
                lines.push(format!("{body}..."));
                lines.push(format!("*[Content truncated - {total} total characters]*"));
            }
            None => lines.push(body.to_string()),
        }
        lines.extend([String::new(), "---".to_string(), String::new()]);
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Prefix of at most `max` chars, plus the full length when truncated
fn truncate_chars(text: &str, max: usize) -> (&str, Option<usize>) {
    match text.char_indices().nth(max) {
        Some((cut, _)) => (&text[..cut], Some(text.chars().count())),
        None => (text, None),
    }
}
