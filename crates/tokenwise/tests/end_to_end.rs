mod common;

use chrono::Local;
use common::{synthetic_session, TestProject};
use serde_json::{json, Value};
use std::io::Write;
use std::process::{Command, Output, Stdio};
use tokenwise_telemetry::{read_jsonl, PromptRecord, ToolUsageRecord};

/// Run the binary inside the project with `stdin` piped in
fn tokenwise(project: &TestProject, args: &[&str], stdin: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_tokenwise"))
        .args(args)
        .current_dir(project.root())
        .env("HOME", project.home())
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(stdin.as_bytes())
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(
        output.status.success(),
        "tokenwise {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

fn stdout_json(output: &Output) -> Option<Value> {
    let text = String::from_utf8_lossy(&output.stdout);
    let text = text.trim();
    (!text.is_empty()).then(|| serde_json::from_str(text).unwrap())
}

fn bash_event(command: &str, stdout: &str) -> String {
    json!({
        "session_id": "e2e-session",
        "hook_event_name": "PostToolUse",
        "tool_name": "Bash",
        "tool_input": {"command": command},
        "tool_response": {"stdout": stdout, "stderr": "", "interrupted": false}
    })
    .to_string()
}

#[test]
fn test_repeated_command_served_from_cache() {
    let project = TestProject::new();
    let event = bash_event("ls -la", "Cargo.toml\nsrc\n");

    let first = tokenwise(&project, &["hook:pre-tool-use"], &event);
    assert!(stdout_json(&first).is_none());

    tokenwise(&project, &["hook:post-tool-use"], &event);

    let second = tokenwise(&project, &["hook:pre-tool-use"], &event);
    let decision = stdout_json(&second).unwrap();
    let output = &decision["hookSpecificOutput"];
    assert_eq!(output["permissionDecision"], "deny");
    assert!(output["permissionDecisionReason"]
        .as_str()
        .unwrap()
        .contains("Cargo.toml\nsrc\n"));

    let stats = tokenwise(&project, &["cache", "stats"], "");
    let stats = stdout_json(&stats).unwrap();
    assert_eq!(stats["command"], 1);
    assert_eq!(stats["total_hits"], 1);
}

#[test]
fn test_failed_tool_result_not_cached() {
    let project = TestProject::new();
    let event = json!({
        "session_id": "e2e-session",
        "tool_name": "Bash",
        "tool_input": {"command": "ls missing"},
        "tool_response": {"stdout": "", "stderr": "No such file", "is_error": true}
    })
    .to_string();

    tokenwise(&project, &["hook:post-tool-use"], &event);
    let pre = tokenwise(&project, &["hook:pre-tool-use"], &event);
    assert!(stdout_json(&pre).is_none());

    let usage: Vec<ToolUsageRecord> =
        read_jsonl(&project.paths.tool_usage_log(Local::now().date_naive())).unwrap();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].tool_name, "Bash");
    assert!(!usage[0].success);
}

#[test]
fn test_prompt_classification() {
    let project = TestProject::new();
    let prompt = |text: &str| json!({"session_id": "e2e-session", "prompt": text}).to_string();

    let simple = tokenwise(&project, &["hook:user-prompt-submit"], &prompt("What is a monad?"));
    let simple = stdout_json(&simple).unwrap();
    assert_eq!(simple["is_simple_query"], true);

    let complex = tokenwise(
        &project,
        &["hook:user-prompt-submit"],
        &prompt("refactor src/cache.rs so that eviction runs on a timer and then update the tests"),
    );
    assert!(stdout_json(&complex).is_none());

    let verbose = tokenwise(
        &project,
        &["hook:user-prompt-submit"],
        &prompt("um, could you please tidy up the readme in the docs folder, it is really   really   messy"),
    );
    let verbose = stdout_json(&verbose).unwrap();
    assert_eq!(
        verbose["optimized_prompt"],
        "could you please tidy up the readme in the docs folder, it is messy"
    );

    let log = project.paths.prompt_log(Local::now().date_naive());
    let records: Vec<PromptRecord> = read_jsonl(&log).unwrap();
    assert_eq!(records.len(), 3);
    assert!(records[0].is_simple_query);
    assert!(!records[1].is_simple_query);
    assert!(records[2].optimization_applied);
}

#[test]
fn test_baseline_flag_disables_everything() {
    let project = TestProject::new();
    project.write_file(".claude/.optimization_disabled", "");
    let event = bash_event("ls", "a\n");

    tokenwise(&project, &["hook:post-tool-use"], &event);
    let pre = tokenwise(&project, &["hook:pre-tool-use"], &event);
    assert!(stdout_json(&pre).is_none());
    assert!(!project.paths.cache_dir().join("command_cache.json").exists());

    let submit = tokenwise(
        &project,
        &["hook:user-prompt-submit"],
        &json!({"prompt": "um, basically just fix the really broken build"}).to_string(),
    );
    assert!(stdout_json(&submit).is_none());

    let log = project.paths.prompt_log(Local::now().date_naive());
    let records: Vec<PromptRecord> = read_jsonl(&log).unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].baseline);
    assert_eq!(records[0].char_savings, 0);
}

#[test]
fn test_stop_hook_materializes_then_rotates() {
    let project = TestProject::new();
    let first = project.write_session_log("11111111-aaaa", &synthetic_session("11111111-aaaa", 4));
    let second = project.write_session_log("22222222-bbbb", &synthetic_session("22222222-bbbb", 4));

    let stop = |id: &str, path: &std::path::Path| {
        json!({"session_id": id, "transcript_path": path, "stop_hook_active": false}).to_string()
    };

    tokenwise(&project, &["hook:stop"], &stop("11111111-aaaa", &first));
    let current: Vec<_> = std::fs::read_dir(project.paths.current_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".md"))
        .collect();
    assert_eq!(current.len(), 1);
    assert!(current[0].ends_with("_11111111.md"));

    tokenwise(&project, &["hook:pre-compact"], &stop("22222222-bbbb", &second));
    let archived: Vec<_> = std::fs::read_dir(project.paths.archive_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|x| x == "md"))
        .collect();
    assert_eq!(archived.len(), 1);

    let summary = std::fs::read_to_string(project.paths.conversation_summary()).unwrap();
    assert!(summary.starts_with("# Conversation Summary"));
    assert!(summary.contains("Session: 22222222-bbbb"));
    assert!(summary.contains("- Read: 4"));
}

#[test]
fn test_garbage_input_never_fails_the_host() {
    let project = TestProject::new();
    for hook in ["hook:pre-tool-use", "hook:post-tool-use", "hook:user-prompt-submit", "hook:stop"] {
        let output = tokenwise(&project, &[hook], "this is not json");
        assert!(output.stdout.is_empty(), "{hook} wrote to stdout");
    }
}

#[test]
fn test_init_and_report() {
    let project = TestProject::new();
    tokenwise(&project, &["init"], "");

    let settings: Value =
        serde_json::from_str(&std::fs::read_to_string(project.paths.settings_file()).unwrap())
            .unwrap();
    for event in ["PreToolUse", "PostToolUse", "UserPromptSubmit", "Stop", "PreCompact"] {
        assert!(settings["hooks"][event].is_array(), "{event} missing");
    }

    // Running twice adds nothing
    tokenwise(&project, &["init"], "");
    let again: Value =
        serde_json::from_str(&std::fs::read_to_string(project.paths.settings_file()).unwrap())
            .unwrap();
    assert_eq!(settings, again);

    let report = tokenwise(&project, &["report", "--scope", "today"], "");
    let report = String::from_utf8_lossy(&report.stdout);
    assert!(report.contains("Session\n-------"));
    assert!(report.contains("Prompt Optimization"));
    assert!(report.contains("Tool Usage"));
    assert!(report.contains("Recommendations"));
}
