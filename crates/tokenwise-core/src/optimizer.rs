//! Prompt compression and simple-query routing hints

use crate::config::Config;
use chrono::{Local, Utc};
use regex::{Captures, Regex};
use std::sync::OnceLock;
use tokenwise_telemetry::{append_jsonl, Paths, PromptRecord};

static HORIZONTAL_WS_RE: OnceLock<Regex> = OnceLock::new();
static TRAILING_WS_RE: OnceLock<Regex> = OnceLock::new();
static BLANK_LINES_RE: OnceLock<Regex> = OnceLock::new();
static INTENSIFIER_RE: OnceLock<Regex> = OnceLock::new();
static FILLER_RE: OnceLock<Regex> = OnceLock::new();
static FILE_REF_RE: OnceLock<Regex> = OnceLock::new();
static CLOSED_FORM_RE: OnceLock<Vec<Regex>> = OnceLock::new();
static CONTEXT_VERB_RE: OnceLock<Regex> = OnceLock::new();

const MAX_SIMPLE_QUERY_CHARS: usize = 200;

/// Result of optimizing one prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Optimized {
    pub text: String,
    pub is_simple_query: bool,
    pub char_savings: usize,
}

#[derive(Debug, Clone)]
pub struct PromptOptimizer {
    enabled: bool,
}

impl PromptOptimizer {
    pub fn new(config: &Config) -> Self {
        Self {
            enabled: config.optimization_enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Compress and classify. Disabled optimizers pass the prompt through.
    pub fn optimize(&self, raw: &str) -> Optimized {
        if !self.enabled {
            return Optimized {
                text: raw.to_string(),
                is_simple_query: false,
                char_savings: 0,
            };
        }

        let (text, char_savings) = match compress(raw) {
            Some(compressed) => {
                let savings = raw.chars().count().saturating_sub(compressed.chars().count());
                (compressed, savings)
            }
            None => (raw.to_string(), 0),
        };

        Optimized {
            text,
            is_simple_query: is_simple_query(raw),
            char_savings,
        }
    }

    /// Optimize and append the outcome to the day's prompt log.
    ///
    /// A failed append is logged; the optimization result is still returned.
    pub fn submit(&self, paths: &Paths, session_id: Option<&str>, raw: &str) -> Optimized {
        let optimized = self.optimize(raw);
        let record = PromptRecord {
            timestamp: Utc::now(),
            session_id: session_id.map(str::to_string),
            original_text: raw.to_string(),
            optimized_text: optimized.text.clone(),
            is_simple_query: optimized.is_simple_query,
            char_savings: optimized.char_savings,
            optimization_applied: optimized.char_savings > 0,
            baseline: !self.enabled,
        };

        let log = paths.prompt_log(Local::now().date_naive());
        if let Err(e) = append_jsonl(&log, &record) {
            tracing::warn!(path = %log.display(), error = %e, "failed to append prompt record");
        }
        optimized
    }
}

/// Conservative compression; `None` when confidence is too low to rewrite
pub fn compress(text: &str) -> Option<String> {
    if contains_code(text) {
        return None;
    }

    let horizontal = HORIZONTAL_WS_RE.get_or_init(|| Regex::new(r"[ \t]+").unwrap());
    let trailing = TRAILING_WS_RE.get_or_init(|| Regex::new(r"[ \t]+\n").unwrap());
    let blank_lines = BLANK_LINES_RE.get_or_init(|| Regex::new(r"\n{3,}").unwrap());
    let intensifiers = INTENSIFIER_RE.get_or_init(|| {
        Regex::new(
            r"(?i)(\b(?:not|never)[ \t]+|n't[ \t]+)?\b(?:very|really|quite|extremely|incredibly)\b[ \t]*",
        )
        .unwrap()
    });
    let fillers = FILLER_RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:um|uh)\b,?[ \t]*|,[ \t]*you know[ \t]*,").unwrap()
    });

    // After a negation the intensifier sets the degree and must stay
    let out = intensifiers.replace_all(text, |caps: &Captures| match caps.get(1) {
        Some(_) => caps[0].to_string(),
        None => String::new(),
    });
    let out = fillers.replace_all(&out, "");
    let out = horizontal.replace_all(&out, " ");
    let out = trailing.replace_all(&out, "\n");
    let out = blank_lines.replace_all(&out, "\n\n");
    let out = out.trim().to_string();

    if out.is_empty() {
        return None;
    }

    // Whitespace is free to drop; words are not
    let before = non_whitespace_chars(text);
    let after = non_whitespace_chars(&out);
    if (before - after.min(before)) * 3 > before {
        return None;
    }

    Some(out)
}

/// Routing hint: short closed-form questions a cheaper model can answer
pub fn is_simple_query(prompt: &str) -> bool {
    let prompt = prompt.trim();
    if prompt.is_empty() || prompt.contains('\n') {
        return false;
    }
    if prompt.chars().count() > MAX_SIMPLE_QUERY_CHARS {
        return false;
    }
    if contains_code(prompt) || references_files(prompt) {
        return false;
    }

    let lower = prompt.to_lowercase();
    if [" and ", " then ", ";"].iter().any(|c| lower.contains(c)) {
        return false;
    }

    let patterns = CLOSED_FORM_RE.get_or_init(|| {
        [
            r"^(?:what|who|when|where|which|why|how)\b",
            r"^(?:is|are|can|does|do|will|would|should|could)\b.*\?$",
            r"^(?:define|explain|describe)(?:\s+\S+){1,6}\??$",
            r"^\d+(?:\.\d+)?\s*[-+*/x]\s*\d+(?:\.\d+)?\s*\??$",
            r"^(?:ls|pwd|date)$",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    });
    patterns.iter().any(|re| re.is_match(&lower))
}

/// Implementation requests benefit from a list of recently read files
pub fn wants_cached_context(prompt: &str) -> bool {
    let re = CONTEXT_VERB_RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:implement|create|build|modify|update|fix|refactor)").unwrap()
    });
    re.is_match(prompt)
}

fn contains_code(text: &str) -> bool {
    text.contains('`') || text.contains('{') || text.contains('}')
}

fn references_files(text: &str) -> bool {
    let re = FILE_REF_RE.get_or_init(|| {
        Regex::new(
            r"(?:[\w.-]+/[\w.-]+)|::|\b[\w-]+\.(?:rs|py|js|ts|tsx|jsx|go|java|md|json|toml|yaml|yml|html|css|c|cpp|h|sh|txt|lock)\b",
        )
        .unwrap()
    });
    re.is_match(text)
}

fn non_whitespace_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokenwise_telemetry::read_jsonl;

    #[test]
    fn test_end_to_end_classification() {
        let optimizer = PromptOptimizer::new(&Config::new());
        assert!(
            !optimizer
                .optimize("please list the files in src and tell me if there are any tests")
                .is_simple_query
        );
        assert!(optimizer.optimize("what does HTTP 404 mean").is_simple_query);
    }

    #[test]
    fn test_simple_query_patterns() {
        assert!(is_simple_query("Is Rust memory safe?"));
        assert!(is_simple_query("define idempotent"));
        assert!(is_simple_query("12 * 7"));
        assert!(is_simple_query("pwd"));
        assert!(!is_simple_query("Is Rust memory safe"));
        assert!(!is_simple_query("what does src/main.rs do"));
        assert!(!is_simple_query("what does Cargo.toml configure"));
        assert!(!is_simple_query("how does `Option::map` work"));
        assert!(!is_simple_query("refactor the parser"));
        assert!(!is_simple_query(""));
        assert!(!is_simple_query("what is this\nand that"));
        assert!(!is_simple_query(&format!("what {}", "x ".repeat(150))));
    }

    #[test]
    fn test_compress_removes_fillers() {
        let out = compress("um, can you  make this really   fast\n\n\n\nthanks").unwrap();
        assert_eq!(out, "can you make this fast\n\nthanks");
    }

    #[test]
    fn test_compress_keeps_negated_degree() {
        assert_eq!(
            compress("The retry logic is not quite right yet").as_deref(),
            Some("The retry logic is not quite right yet")
        );
        assert_eq!(
            compress("it isn't   really broken, just very slow").as_deref(),
            Some("it isn't really broken, just slow")
        );
    }

    #[test]
    fn test_compress_keeps_you_know_questions() {
        assert_eq!(
            compress("Do you know where the config file lives?").as_deref(),
            Some("Do you know where the config file lives?")
        );
        assert_eq!(
            compress("the parser is, you know, slow on big inputs").as_deref(),
            Some("the parser is slow on big inputs")
        );
    }

    #[test]
    fn test_compress_whole_words_only() {
        // "veryfied" and "umbrella" are not fillers
        let out = compress("the umbrella was veryfied").unwrap();
        assert_eq!(out, "the umbrella was veryfied");
    }

    #[test]
    fn test_code_passes_through() {
        let optimizer = PromptOptimizer::new(&Config::new());
        let raw = "fix this   really slow fn: `fn a() { very_slow() }`";
        let out = optimizer.optimize(raw);
        assert_eq!(out.text, raw);
        assert_eq!(out.char_savings, 0);
    }

    #[test]
    fn test_aggressive_loss_passes_through() {
        assert_eq!(compress("really very quite um"), None);
        assert_eq!(compress("very very very good"), None);
    }

    #[test]
    fn test_savings_counted_in_chars() {
        let optimizer = PromptOptimizer::new(&Config::new());
        let out = optimizer.optimize("explain   the café menu   please");
        assert_eq!(out.text, "explain the café menu please");
        assert_eq!(out.char_savings, 4);
    }

    #[test]
    fn test_disabled_passthrough() {
        let optimizer = PromptOptimizer::new(&Config::baseline());
        let out = optimizer.optimize("what   is   very   nice");
        assert_eq!(out.text, "what   is   very   nice");
        assert!(!out.is_simple_query);
        assert_eq!(out.char_savings, 0);
    }

    #[test]
    fn test_context_verbs() {
        assert!(wants_cached_context("Please implement the retry loop"));
        assert!(wants_cached_context("fixes for the build"));
        assert!(!wants_cached_context("what time is it"));
    }

    #[test]
    fn test_submit_appends_record_every_time() {
        let temp = tempfile::TempDir::new().unwrap();
        let paths = Paths::with_roots(temp.path(), temp.path().join("home"));
        let optimizer = PromptOptimizer::new(&Config::new());

        optimizer.submit(&paths, Some("s1"), "what is a monad");
        optimizer.submit(&paths, Some("s1"), "really   long   request here");

        let records: Vec<PromptRecord> =
            read_jsonl(&paths.prompt_log(Local::now().date_naive())).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].is_simple_query);
        assert!(!records[0].optimization_applied);
        assert_eq!(records[1].optimized_text, "long request here");
        assert!(records[1].optimization_applied);
        assert!(records.iter().all(|r| !r.baseline));
    }
}
