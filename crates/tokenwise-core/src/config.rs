//! Configuration for caching, prompt optimization and cost estimation

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokenwise_telemetry::{Paths, TokenUsage};

/// USD per million tokens, per token class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pricing {
    pub input: f64,
    pub output: f64,
    pub cache_write: f64,
    pub cache_read: f64,
}

impl Pricing {
    pub fn new() -> Self {
        Self {
            input: 3.00,
            output: 15.00,
            cache_write: 3.75,
            cache_read: 0.30,
        }
    }

    /// Linear cost of a token count at these rates
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.input as f64 * self.input
            + usage.output as f64 * self.output
            + usage.cache_creation as f64 * self.cache_write
            + usage.cache_read as f64 * self.cache_read)
            / 1_000_000.0
    }
}

impl Default for Pricing {
    fn default() -> Self {
        Self::new()
    }
}

/// Runtime configuration, passed explicitly to the cache manager and optimizer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Consult and populate the tool-invocation cache
    pub caching_enabled: bool,

    /// Compress prompts and emit routing hints
    pub optimization_enabled: bool,

    /// TTL for shell command results
    pub command_ttl_secs: u64,

    /// TTL for grep/glob results
    pub search_ttl_secs: u64,

    /// Files larger than this are never cached
    pub max_cached_file_bytes: u64,

    /// Savings below this many chars do not replace the submitted prompt
    pub min_rewrite_savings: usize,

    /// Transcripts smaller than this are deleted instead of archived
    pub min_transcript_bytes: u64,

    pub pricing: Pricing,
}

impl Config {
    pub fn new() -> Self {
        Self {
            caching_enabled: true,
            optimization_enabled: true,
            command_ttl_secs: 60,
            search_ttl_secs: 600,
            max_cached_file_bytes: 1024 * 1024,
            min_rewrite_savings: 10,
            min_transcript_bytes: 512,
            pricing: Pricing::new(),
        }
    }

    /// Both optimizations off, as in baseline runs
    pub fn baseline() -> Self {
        Self {
            caching_enabled: false,
            optimization_enabled: false,
            ..Self::new()
        }
    }

    /// Load `tokenwise.json` for the project, honouring the baseline flag file.
    ///
    /// A missing or unreadable file yields defaults.
    pub fn load(paths: &Paths) -> Self {
        let mut config = Self::from_file(&paths.config_file());
        if paths.baseline_flag().exists() {
            config.caching_enabled = false;
            config.optimization_enabled = false;
        }
        config
    }

    fn from_file(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Self::new(),
        };

        match serde_json::from_str::<Config>(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable config");
                Self::new()
            }
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
