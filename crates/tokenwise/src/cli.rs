use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tokenwise")]
#[command(version)]
#[command(about = "Tool-result caching, prompt optimization and session telemetry for Claude Code")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install tokenwise hooks into the project's .claude/settings.json
    Init,

    /// Show cache, session and optimizer state
    Status,

    /// Print version information
    Version,

    /// Render a session log into logs/current, archiving other sessions
    Materialize {
        /// Session id (defaults to the newest session log)
        #[arg(short, long)]
        session: Option<String>,

        /// Explicit session log path
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Move current transcripts into the archive
    Archive {
        /// Also delete degenerate files already in the archive
        #[arg(long)]
        prune: bool,
    },

    /// Print a usage and savings report
    Report {
        #[arg(long, value_enum, default_value_t = Scope::CurrentSession)]
        scope: Scope,
    },

    /// Inspect or clear the tool cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Hook: serve cached tool results (stdin/stdout JSON)
    #[command(name = "hook:pre-tool-use")]
    HookPreToolUse,

    /// Hook: log tool usage and cache tool results
    #[command(name = "hook:post-tool-use")]
    HookPostToolUse,

    /// Hook: optimize and log the prompt
    #[command(name = "hook:user-prompt-submit")]
    HookUserPromptSubmit,

    /// Hook: materialize the transcript when Claude stops
    #[command(name = "hook:stop")]
    HookStop,

    /// Hook: write the handoff summary and materialize the transcript before compaction
    #[command(name = "hook:pre-compact")]
    HookPreCompact,
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// Entry counts per operation kind
    Stats,
    /// Remove every cached entry
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scope {
    CurrentSession,
    Today,
}
