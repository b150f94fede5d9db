//! Per-session totals derived from a transcript

use crate::parser::Transcript;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokenwise_core::Pricing;
use tokenwise_telemetry::TokenUsage;

/// Recomputed from the transcript on every request; never persisted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub message_count: usize,
    pub tool_calls: usize,
    pub orphan_results: usize,
    pub malformed_records: usize,
    pub usage: TokenUsage,
    pub total_tokens: u64,
    pub estimated_cost: f64,
    pub start_ts: Option<DateTime<Utc>>,
    pub end_ts: Option<DateTime<Utc>>,
}

impl SessionSummary {
    pub fn from_transcript(transcript: &Transcript, pricing: &Pricing) -> Self {
        let usage = transcript.usage();
        Self {
            session_id: transcript
                .session_id
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            message_count: transcript.messages.len(),
            tool_calls: transcript.tool_counts().values().sum(),
            orphan_results: transcript.orphans().len(),
            malformed_records: transcript.malformed_records,
            usage,
            total_tokens: usage.total(),
            estimated_cost: pricing.cost(&usage),
            start_ts: transcript.started_at,
            end_ts: transcript.ended_at,
        }
    }

    pub fn duration_secs(&self) -> Option<i64> {
        Some((self.end_ts? - self.start_ts?).num_seconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_str;

    #[test]
    fn test_summary_totals() {
        let log = r#"{"type":"user","sessionId":"abc","timestamp":"2025-01-01T10:00:00Z","message":{"role":"user","content":"hi"}}
{"type":"assistant","sessionId":"abc","timestamp":"2025-01-01T10:01:30Z","message":{"id":"m1","role":"assistant","content":"hello","usage":{"input_tokens":1000000,"output_tokens":1000000,"cache_read_input_tokens":1000000}}}"#;
        let t = parse_str(log);
        let s = SessionSummary::from_transcript(&t, &Pricing::new());

        assert_eq!(s.session_id, "abc");
        assert_eq!(s.message_count, 2);
        assert_eq!(s.total_tokens, 3_000_000);
        assert!((s.estimated_cost - 18.30).abs() < 1e-9);
        assert_eq!(s.duration_secs(), Some(90));
    }

    #[test]
    fn test_empty_transcript() {
        let s = SessionSummary::from_transcript(&Transcript::default(), &Pricing::new());
        assert_eq!(s.session_id, "unknown");
        assert_eq!(s.total_tokens, 0);
        assert_eq!(s.estimated_cost, 0.0);
        assert_eq!(s.duration_secs(), None);
    }
}
