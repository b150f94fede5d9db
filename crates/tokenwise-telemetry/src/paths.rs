//! Path resolution for cache stores, daily logs and transcripts

use chrono::NaiveDate;
use std::path::{Path, PathBuf};

/// Resolves the on-disk layout for one project checkout
#[derive(Debug, Clone)]
pub struct Paths {
    pub project_root: PathBuf,
    pub home_claude: PathBuf,
}

impl Paths {
    /// Create a resolver for the current working directory
    pub fn new() -> std::io::Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "home directory not found")
        })?;
        let project_root = std::env::current_dir()?;

        Ok(Self::with_roots(project_root, home.join(".claude")))
    }

    /// Create a resolver with explicit roots
    pub fn with_roots(project_root: impl Into<PathBuf>, home_claude: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            home_claude: home_claude.into(),
        }
    }

    /// Project-local `.claude` directory
    pub fn project_claude_dir(&self) -> PathBuf {
        self.project_root.join(".claude")
    }

    pub fn config_file(&self) -> PathBuf {
        self.project_claude_dir().join("tokenwise.json")
    }

    /// Flag file that switches the project into baseline (unoptimized) mode
    pub fn baseline_flag(&self) -> PathBuf {
        self.project_claude_dir().join(".optimization_disabled")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.project_claude_dir().join("settings.json")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.project_claude_dir().join("cache")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.project_root.join("logs")
    }

    /// Directory holding the active session's transcript
    pub fn current_dir(&self) -> PathBuf {
        self.logs_dir().join("current")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.logs_dir().join("archive")
    }

    pub fn archive_lock(&self) -> PathBuf {
        self.logs_dir().join(".archive.lock")
    }

    /// Daily prompt optimizer log
    pub fn prompt_log(&self, day: NaiveDate) -> PathBuf {
        self.logs_dir()
            .join(format!("prompts_{}.jsonl", day.format("%Y-%m-%d")))
    }

    /// Daily cache instrumentation log
    pub fn cache_events_log(&self, day: NaiveDate) -> PathBuf {
        self.logs_dir()
            .join(format!("cache_events_{}.jsonl", day.format("%Y-%m-%d")))
    }

    /// Daily per-tool usage log, written for every completed tool call
    pub fn tool_usage_log(&self, day: NaiveDate) -> PathBuf {
        self.logs_dir()
            .join(format!("tool_usage_{}.jsonl", day.format("%Y-%m-%d")))
    }

    /// Stop and pre-compact hook firings
    pub fn session_events_log(&self) -> PathBuf {
        self.logs_dir().join("session_events.jsonl")
    }

    /// Handoff summary, rewritten in place at every compaction
    pub fn conversation_summary(&self) -> PathBuf {
        self.project_claude_dir().join("logs").join("CONVERSATION_SUMMARY.md")
    }

    /// Host-owned directory of raw session event logs for this project
    pub fn sessions_dir(&self) -> PathBuf {
        self.home_claude
            .join("projects")
            .join(encode_project_path(&self.project_root))
    }

    /// Raw event log for one session
    pub fn session_log(&self, session_id: &str) -> PathBuf {
        self.sessions_dir().join(format!("{session_id}.jsonl"))
    }
}

/// Directory name the host uses for a project: separators and dots become dashes
pub fn encode_project_path(path: &Path) -> String {
    path.to_string_lossy().replace(['/', '\\', '.'], "-")
}
