mod cli;
mod commands;

use clap::Parser;
use cli::{CacheAction, Cli, Commands};

fn main() -> anyhow::Result<()> {
    // Hook stdout is consumed by Claude Code, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => commands::init::run(),
        Commands::Status => commands::status::run(),
        Commands::Version => commands::version::run(),
        Commands::Materialize { session, file } => {
            commands::session::run_materialize(session.as_deref(), file.as_deref())
        }
        Commands::Archive { prune } => commands::session::run_archive(prune),
        Commands::Report { scope } => commands::report::run(scope),
        Commands::Cache { action } => match action {
            CacheAction::Stats => commands::cache::run_stats(),
            CacheAction::Clear => commands::cache::run_clear(),
        },
        Commands::HookPreToolUse => commands::hooks::hook_pre_tool_use(),
        Commands::HookPostToolUse => commands::hooks::hook_post_tool_use(),
        Commands::HookUserPromptSubmit => commands::hooks::hook_user_prompt_submit(),
        Commands::HookStop => commands::hooks::hook_stop(),
        Commands::HookPreCompact => commands::hooks::hook_pre_compact(),
    }
}
