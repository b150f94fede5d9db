pub fn run() -> anyhow::Result<()> {
    println!("tokenwise {}", env!("CARGO_PKG_VERSION"));
    println!("Tool-result caching and session telemetry for Claude Code");
    Ok(())
}
