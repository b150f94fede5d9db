use super::session::materialize_session;
use chrono::{Duration, Local, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use tokenwise_core::{wants_cached_context, CacheEntry, CacheManager, Config, Lookup, PromptOptimizer};
use tokenwise_telemetry::{append_jsonl, Paths, SessionEvent, SessionEventKind, ToolUsageRecord};
use tokenwise_transcript::{parse_file, write_handoff, ArchiveError, Materialized};

const CONTEXT_WINDOW_MINUTES: i64 = 5;
const MAX_CONTEXT_FILES: usize = 3;

#[derive(Debug, Deserialize)]
pub struct ToolHookInput {
    #[serde(default)]
    pub session_id: Option<String>,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default)]
    pub tool_response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreToolUseOutput {
    pub hook_specific_output: PermissionDecision,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDecision {
    pub hook_event_name: &'static str,
    pub permission_decision: &'static str,
    pub permission_decision_reason: String,
}

#[derive(Debug, Deserialize)]
pub struct PromptInput {
    #[serde(default)]
    pub session_id: Option<String>,
    pub prompt: String,
}

#[derive(Debug, Serialize)]
pub struct PromptOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimized_prompt: Option<String>,
    pub is_simple_query: bool,
    pub char_savings: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionHookInput {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub transcript_path: Option<PathBuf>,
    #[serde(default)]
    pub stop_hook_active: bool,
}

/// Read stdin JSON, run the hook, print its output. Failures are logged and
/// swallowed so the host session is never interrupted.
fn run_hook<I, O>(name: &str, hook: impl FnOnce(&Paths, &Config, I) -> anyhow::Result<Option<O>>) -> anyhow::Result<()>
where
    I: DeserializeOwned,
    O: Serialize,
{
    let result = (|| -> anyhow::Result<Option<O>> {
        let mut input_str = String::new();
        io::stdin().read_to_string(&mut input_str)?;
        let input: I = serde_json::from_str(&input_str)?;

        let paths = Paths::new()?;
        let config = Config::load(&paths);
        hook(&paths, &config, input)
    })();

    match result {
        Ok(Some(output)) => {
            let output_json = serde_json::to_string(&output)?;
            io::stdout().write_all(output_json.as_bytes())?;
            io::stdout().flush()?;
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(hook = name, error = %e, "hook failed, continuing without it"),
    }
    Ok(())
}

pub fn hook_pre_tool_use() -> anyhow::Result<()> {
    run_hook("pre-tool-use", |paths, config, input: ToolHookInput| {
        Ok(pre_tool_use(paths, config, &input))
    })
}

pub fn hook_post_tool_use() -> anyhow::Result<()> {
    run_hook::<_, Value>("post-tool-use", |paths, config, input: ToolHookInput| {
        post_tool_use(paths, config, &input)?;
        Ok(None)
    })
}

pub fn hook_user_prompt_submit() -> anyhow::Result<()> {
    run_hook("user-prompt-submit", |paths, config, input: PromptInput| {
        Ok(user_prompt_submit(paths, config, &input))
    })
}

pub fn hook_stop() -> anyhow::Result<()> {
    run_hook::<_, Value>("stop", |paths, config, input: SessionHookInput| {
        session_end(paths, config, &input)?;
        Ok(None)
    })
}

pub fn hook_pre_compact() -> anyhow::Result<()> {
    run_hook::<_, Value>("pre-compact", |paths, config, input: SessionHookInput| {
        pre_compact(paths, config, &input)?;
        Ok(None)
    })
}

fn cache_manager(paths: &Paths, config: &Config, session_id: Option<&str>) -> CacheManager {
    let manager = CacheManager::new(paths.clone(), config.clone());
    match session_id {
        Some(id) => manager.with_session(id),
        None => manager,
    }
}

/// Deny the tool call and hand Claude the cached result instead
pub fn pre_tool_use(paths: &Paths, config: &Config, input: &ToolHookInput) -> Option<PreToolUseOutput> {
    let manager = cache_manager(paths, config, input.session_id.as_deref());
    let op = manager.operation(&input.tool_name, &input.tool_input)?;

    match manager.lookup(&op) {
        Lookup::Hit(entry) => Some(PreToolUseOutput {
            hook_specific_output: PermissionDecision {
                hook_event_name: "PreToolUse",
                permission_decision: "deny",
                permission_decision_reason: cached_reason(&input.tool_name, &entry),
            },
        }),
        Lookup::Miss(_) => None,
    }
}

fn cached_reason(tool_name: &str, entry: &CacheEntry) -> String {
    let age = (Utc::now() - entry.created_at).num_seconds().max(0);
    format!(
        "[tokenwise cache] {tool_name} result cached {age}s ago (hit #{}), unchanged since. Cached output:\n{}",
        entry.hit_count,
        cached_text(&entry.payload)
    )
}

/// The useful part of a tool response
fn cached_text(payload: &Value) -> String {
    if let Some(content) = payload.pointer("/file/content").and_then(Value::as_str) {
        return content.to_string();
    }
    if let Some(stdout) = payload.get("stdout").and_then(Value::as_str) {
        return stdout.to_string();
    }
    match payload {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_default(),
    }
}

fn succeeded(response: &Value) -> bool {
    if response.is_null() {
        return false;
    }
    let flag = |key: &str| response.get(key).and_then(Value::as_bool);
    flag("success") != Some(false) && flag("is_error") != Some(true) && flag("interrupted") != Some(true)
}

/// Log the tool call, then cache the result when it succeeded and is cacheable
pub fn post_tool_use(paths: &Paths, config: &Config, input: &ToolHookInput) -> anyhow::Result<bool> {
    record_tool_use(paths, input);
    if !succeeded(&input.tool_response) {
        return Ok(false);
    }
    let manager = cache_manager(paths, config, input.session_id.as_deref());
    let Some(op) = manager.operation(&input.tool_name, &input.tool_input) else {
        return Ok(false);
    };
    let stored = manager.store_result(&op, input.tool_response.clone())?;
    Ok(stored.is_some())
}

/// Every completed tool call lands in the day's tool usage log, cached or not
fn record_tool_use(paths: &Paths, input: &ToolHookInput) {
    let record = ToolUsageRecord {
        timestamp: Utc::now(),
        session_id: input.session_id.clone(),
        tool_name: input.tool_name.clone(),
        success: succeeded(&input.tool_response),
    };
    let log = paths.tool_usage_log(Local::now().date_naive());
    if let Err(e) = append_jsonl(&log, &record) {
        tracing::warn!(path = %log.display(), error = %e, "failed to append tool usage record");
    }
}

fn record_session_event(paths: &Paths, session_id: Option<&str>, event: SessionEventKind) {
    let record = SessionEvent {
        timestamp: Utc::now(),
        session_id: session_id.map(str::to_string),
        event,
    };
    let log = paths.session_events_log();
    if let Err(e) = append_jsonl(&log, &record) {
        tracing::warn!(path = %log.display(), error = %e, "failed to append session event");
    }
}

pub fn user_prompt_submit(paths: &Paths, config: &Config, input: &PromptInput) -> Option<PromptOutput> {
    let optimizer = PromptOptimizer::new(config);
    let optimized = optimizer.submit(paths, input.session_id.as_deref(), &input.prompt);

    let context = if optimizer.is_enabled() && wants_cached_context(&input.prompt) {
        recent_file_context(paths, config)
    } else {
        None
    };

    let optimized_prompt = (optimized.char_savings >= config.min_rewrite_savings).then_some(optimized.text);

    if optimized_prompt.is_none() && context.is_none() && !optimized.is_simple_query {
        return None;
    }

    Some(PromptOutput {
        optimized_prompt,
        is_simple_query: optimized.is_simple_query,
        char_savings: optimized.char_savings,
        context,
    })
}

fn recent_file_context(paths: &Paths, config: &Config) -> Option<String> {
    let manager = cache_manager(paths, config, None);
    let files = manager.recent_file_reads(Duration::minutes(CONTEXT_WINDOW_MINUTES), Utc::now());
    if files.is_empty() {
        return None;
    }

    let mut context = String::from("Recent file context (cached):\n");
    for path in files.iter().take(MAX_CONTEXT_FILES) {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        context.push_str(&format!("- {} ({} bytes)\n", path.display(), size));
    }
    Some(context)
}

/// Raw log of the hook's session: the host-supplied path, else the
/// conventional location
fn session_source<'a>(paths: &Paths, input: &'a SessionHookInput) -> Option<(&'a str, PathBuf)> {
    let session_id = input.session_id.as_deref()?;
    let source = input
        .transcript_path
        .clone()
        .unwrap_or_else(|| paths.session_log(session_id));
    if !source.exists() {
        tracing::warn!(path = %source.display(), "session log not found");
        return None;
    }
    Some((session_id, source))
}

/// Record the stop and materialize the session transcript
pub fn session_end(paths: &Paths, config: &Config, input: &SessionHookInput) -> anyhow::Result<Option<Materialized>> {
    if input.stop_hook_active {
        return Ok(None);
    }
    record_session_event(paths, input.session_id.as_deref(), SessionEventKind::Stop);
    materialize(paths, config, input)
}

/// Write the handoff summary, then materialize, before the host compacts
pub fn pre_compact(paths: &Paths, config: &Config, input: &SessionHookInput) -> anyhow::Result<Option<Materialized>> {
    record_session_event(paths, input.session_id.as_deref(), SessionEventKind::PreCompact);

    if let Some((_, source)) = session_source(paths, input) {
        let transcript = parse_file(&source)?;
        let summary = paths.conversation_summary();
        write_handoff(&summary, &transcript, &config.pricing, "pre-compact", Local::now())?;
        tracing::info!(path = %summary.display(), "wrote conversation summary");
    }

    materialize(paths, config, input)
}

fn materialize(paths: &Paths, config: &Config, input: &SessionHookInput) -> anyhow::Result<Option<Materialized>> {
    let Some((session_id, source)) = session_source(paths, input) else {
        return Ok(None);
    };

    match materialize_session(paths, config, session_id, &source) {
        Ok(materialized) => Ok(Some(materialized)),
        Err(ArchiveError::Busy) => {
            tracing::warn!("session logs are being rotated elsewhere, will retry next time");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use tokenwise_telemetry::read_jsonl;

    fn setup() -> (TempDir, Paths) {
        let temp = TempDir::new().unwrap();
        let paths = Paths::with_roots(temp.path().join("project"), temp.path().join("home"));
        std::fs::create_dir_all(&paths.project_root).unwrap();
        (temp, paths)
    }

    fn bash(command: &str, response: Value) -> ToolHookInput {
        ToolHookInput {
            session_id: Some("s1".to_string()),
            tool_name: "Bash".to_string(),
            tool_input: json!({"command": command}),
            tool_response: response,
        }
    }

    #[test]
    fn test_post_then_pre_serves_cached_result() {
        let (_temp, paths) = setup();
        let config = Config::new();
        let input = bash("ls -la", json!({"stdout": "Cargo.toml\nsrc\n", "stderr": "", "interrupted": false}));

        assert!(pre_tool_use(&paths, &config, &input).is_none());
        assert!(post_tool_use(&paths, &config, &input).unwrap());

        let output = pre_tool_use(&paths, &config, &input).unwrap();
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["hookSpecificOutput"]["hookEventName"], "PreToolUse");
        assert_eq!(json["hookSpecificOutput"]["permissionDecision"], "deny");
        let reason = json["hookSpecificOutput"]["permissionDecisionReason"].as_str().unwrap();
        assert!(reason.contains("Cargo.toml\nsrc\n"));
    }

    #[test]
    fn test_failed_results_not_cached() {
        let (_temp, paths) = setup();
        let config = Config::new();

        let interrupted = bash("ls", json!({"stdout": "", "interrupted": true}));
        assert!(!post_tool_use(&paths, &config, &interrupted).unwrap());
        let errored = bash("ls", json!({"is_error": true}));
        assert!(!post_tool_use(&paths, &config, &errored).unwrap());
        let empty = bash("ls", Value::Null);
        assert!(!post_tool_use(&paths, &config, &empty).unwrap());
    }

    #[test]
    fn test_every_tool_call_logged() {
        let (_temp, paths) = setup();
        let config = Config::new();
        let edit = ToolHookInput {
            session_id: Some("s1".to_string()),
            tool_name: "Edit".to_string(),
            tool_input: json!({"file_path": "a.rs"}),
            tool_response: json!({"success": true}),
        };
        post_tool_use(&paths, &config, &edit).unwrap();
        post_tool_use(&paths, &config, &bash("ls", json!({"is_error": true}))).unwrap();

        let records: Vec<ToolUsageRecord> =
            read_jsonl(&paths.tool_usage_log(Local::now().date_naive())).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tool_name, "Edit");
        assert!(records[0].success);
        assert_eq!(records[1].tool_name, "Bash");
        assert!(!records[1].success);
        assert!(records.iter().all(|r| r.session_id.as_deref() == Some("s1")));
    }

    #[test]
    fn test_uncacheable_tool_ignored() {
        let (_temp, paths) = setup();
        let input = ToolHookInput {
            session_id: None,
            tool_name: "Edit".to_string(),
            tool_input: json!({"file_path": "a.rs"}),
            tool_response: json!({"success": true}),
        };
        assert!(!post_tool_use(&paths, &Config::new(), &input).unwrap());
        assert!(pre_tool_use(&paths, &Config::new(), &input).is_none());
    }

    #[test]
    fn test_prompt_rewrite_threshold() {
        let (_temp, paths) = setup();
        let config = Config::new();

        let small = PromptInput {
            session_id: None,
            prompt: "please  sort this list".to_string(),
        };
        assert!(user_prompt_submit(&paths, &config, &small).is_none());

        let big = PromptInput {
            session_id: None,
            prompt: "um, could you please tidy up the readme in the docs folder, it is really   really   messy"
                .to_string(),
        };
        let output = user_prompt_submit(&paths, &config, &big).unwrap();
        assert_eq!(
            output.optimized_prompt.as_deref(),
            Some("could you please tidy up the readme in the docs folder, it is messy")
        );
        assert!(output.char_savings >= config.min_rewrite_savings);
    }

    #[test]
    fn test_prompt_simple_query_reported() {
        let (_temp, paths) = setup();
        let input = PromptInput {
            session_id: Some("s1".to_string()),
            prompt: "what does HTTP 404 mean".to_string(),
        };
        let output = user_prompt_submit(&paths, &Config::new(), &input).unwrap();
        assert!(output.is_simple_query);
        assert!(output.optimized_prompt.is_none());
    }

    #[test]
    fn test_prompt_context_from_recent_reads() {
        let (_temp, paths) = setup();
        let config = Config::new();
        let file = paths.project_root.join("lib.rs");
        std::fs::write(&file, "pub fn a() {}").unwrap();

        let read = ToolHookInput {
            session_id: None,
            tool_name: "Read".to_string(),
            tool_input: json!({"file_path": file}),
            tool_response: json!({"type": "text", "file": {"content": "pub fn a() {}"}}),
        };
        assert!(post_tool_use(&paths, &config, &read).unwrap());

        let input = PromptInput {
            session_id: None,
            prompt: "implement the parser".to_string(),
        };
        let output = user_prompt_submit(&paths, &config, &input).unwrap();
        let context = output.context.unwrap();
        assert!(context.contains("lib.rs (13 bytes)"));
    }

    #[test]
    fn test_stop_hook_active_skips() {
        let (_temp, paths) = setup();
        let input = SessionHookInput {
            session_id: Some("s1".to_string()),
            transcript_path: None,
            stop_hook_active: true,
        };
        assert!(session_end(&paths, &Config::new(), &input).unwrap().is_none());
        assert!(!paths.session_events_log().exists());
    }

    #[test]
    fn test_session_end_materializes() {
        let (temp, paths) = setup();
        let log = temp.path().join("s1.jsonl");
        std::fs::write(
            &log,
            r#"{"type":"user","sessionId":"s1","message":{"role":"user","content":"hello"}}"#,
        )
        .unwrap();

        let input = SessionHookInput {
            session_id: Some("s1".to_string()),
            transcript_path: Some(log),
            stop_hook_active: false,
        };
        let materialized = session_end(&paths, &Config::new(), &input).unwrap().unwrap();
        assert!(materialized.path.starts_with(paths.current_dir()));
        assert!(std::fs::read_to_string(&materialized.path).unwrap().contains("hello"));

        let events: Vec<SessionEvent> = read_jsonl(&paths.session_events_log()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, SessionEventKind::Stop);
        assert!(!paths.conversation_summary().exists());
    }

    #[test]
    fn test_pre_compact_writes_summary_and_event() {
        let (temp, paths) = setup();
        let log = temp.path().join("s1.jsonl");
        std::fs::write(
            &log,
            r#"{"type":"user","sessionId":"s1","message":{"role":"user","content":"Add a tool usage section to the report. Keep it short."}}
{"type":"assistant","sessionId":"s1","message":{"id":"m1","role":"assistant","content":[{"type":"tool_use","id":"t1","name":"Read","input":{"file_path":"report.rs"}}]}}"#,
        )
        .unwrap();

        let input = SessionHookInput {
            session_id: Some("s1".to_string()),
            transcript_path: Some(log),
            stop_hook_active: false,
        };
        let materialized = pre_compact(&paths, &Config::new(), &input).unwrap();
        assert!(materialized.is_some());

        let summary = std::fs::read_to_string(paths.conversation_summary()).unwrap();
        assert!(summary.contains("(pre-compact)"));
        assert!(summary.contains("- Read: 1"));
        assert!(summary.contains("1. Add a tool usage section to the report"));

        let events: Vec<SessionEvent> = read_jsonl(&paths.session_events_log()).unwrap();
        assert_eq!(events[0].event, SessionEventKind::PreCompact);
    }

    #[test]
    fn test_pre_compact_without_log_records_event() {
        let (_temp, paths) = setup();
        let input = SessionHookInput {
            session_id: Some("missing".to_string()),
            transcript_path: None,
            stop_hook_active: false,
        };
        assert!(pre_compact(&paths, &Config::new(), &input).unwrap().is_none());
        assert!(!paths.conversation_summary().exists());
        assert_eq!(read_jsonl::<SessionEvent>(&paths.session_events_log()).unwrap().len(), 1);
    }
}
