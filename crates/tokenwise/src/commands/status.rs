use chrono::{Local, NaiveDate};
use tokenwise_core::{CacheManager, Config};
use tokenwise_telemetry::{read_jsonl, Paths, PromptRecord};
use tokenwise_transcript::SessionArchiver;

pub fn run() -> anyhow::Result<()> {
    let paths = Paths::new()?;
    let config = Config::load(&paths);
    println!("{}", status(&paths, &config, Local::now().date_naive()));
    Ok(())
}

fn status(paths: &Paths, config: &Config, today: NaiveDate) -> serde_json::Value {
    let stats = CacheManager::new(paths.clone(), config.clone()).stats();
    let session = SessionArchiver::new(paths.clone(), config).state();
    let prompts_today = read_jsonl::<PromptRecord>(&paths.prompt_log(today))
        .map(|records| records.len())
        .unwrap_or(0);

    let mut output = serde_json::json!({
        "caching_enabled": config.caching_enabled,
        "optimization_enabled": config.optimization_enabled,
        "cache": stats,
        "prompts_today": prompts_today,
    });

    if let Some(state) = session {
        output["session"] = serde_json::json!({
            "id": state.session_id,
            "transcript": state.current_file,
            "started_at": state.started_at,
        });
    }

    output
}
