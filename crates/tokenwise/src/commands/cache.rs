use tokenwise_core::{CacheManager, Config};
use tokenwise_telemetry::Paths;

pub fn run_stats() -> anyhow::Result<()> {
    let paths = Paths::new()?;
    let config = Config::load(&paths);
    let stats = CacheManager::new(paths, config).stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

pub fn run_clear() -> anyhow::Result<()> {
    let paths = Paths::new()?;
    let config = Config::load(&paths);
    let removed = CacheManager::new(paths, config).clear()?;
    println!("Cleared {removed} cache store(s)");
    Ok(())
}
