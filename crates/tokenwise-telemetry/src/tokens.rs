//! Token estimation for cached payloads and prompts
//!
//! There is no tokenizer on the hook path, so counts come from a
//! chars-per-token heuristic weighted by how code-like the text looks.

use serde_json::Value;

const CODE_CHARS_PER_TOKEN: f64 = 2.5;
const MARKDOWN_CHARS_PER_TOKEN: f64 = 3.0;
const PROSE_CHARS_PER_TOKEN: f64 = 4.0;

/// Fractions of a text that read as code, markdown and prose (sum to 1.0)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContentMix {
    pub code: f64,
    pub markdown: f64,
    pub prose: f64,
}

impl ContentMix {
    pub fn of(text: &str) -> Self {
        let total_chars = text.chars().count().max(1) as f64;
        let total_lines = text.lines().count().max(1) as f64;

        let mut code_chars = 0usize;
        let mut md_chars = 0usize;
        for c in text.chars() {
            if "{}[]();=<>|&!@#$%^*~`\\".contains(c) {
                code_chars += 1;
            }
            if "#-*_>".contains(c) {
                md_chars += 1;
            }
        }
        let indented = text
            .lines()
            .filter(|line| line.starts_with("    ") || line.starts_with('\t'))
            .count() as f64;

        let code = ((code_chars as f64 / total_chars) * 10.0 + (indented / total_lines) * 0.5)
            .min(1.0);
        let markdown = ((md_chars as f64 / total_chars) * 8.0).min(1.0 - code);

        Self {
            code,
            markdown,
            prose: 1.0 - code - markdown,
        }
    }

    pub fn chars_per_token(&self) -> f64 {
        self.code * CODE_CHARS_PER_TOKEN
            + self.markdown * MARKDOWN_CHARS_PER_TOKEN
            + self.prose * PROSE_CHARS_PER_TOKEN
    }
}

/// Estimate BPE token count from text
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let chars = text.chars().count() as f64;
    (chars / ContentMix::of(text).chars_per_token()).max(1.0) as usize
}

/// Estimate tokens for a JSON payload: string leaves are counted as text,
/// structure is counted from its compact serialization
pub fn estimate_json_tokens(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::String(s) => estimate_tokens(s),
        Value::Array(items) => items.iter().map(estimate_json_tokens).sum(),
        Value::Object(map) => map.values().map(estimate_json_tokens).sum(),
        other => estimate_tokens(&other.to_string()),
    }
}
