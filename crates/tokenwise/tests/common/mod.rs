#![allow(dead_code)]

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokenwise_telemetry::Paths;

/// A throwaway project checkout with its own fake home directory
pub struct TestProject {
    _temp: TempDir,
    pub paths: Paths,
}

impl TestProject {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("project");
        let home = temp.path().join("home");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::create_dir_all(home.join(".claude")).unwrap();
        let paths = Paths::with_roots(project, home.join(".claude"));
        Self { _temp: temp, paths }
    }

    pub fn root(&self) -> &Path {
        &self.paths.project_root
    }

    /// Home directory as `dirs::home_dir` would see it
    pub fn home(&self) -> PathBuf {
        self.paths.home_claude.parent().unwrap().to_path_buf()
    }

    pub fn write_file(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Write a raw session log where the host keeps it
    pub fn write_session_log(&self, session_id: &str, lines: &[String]) -> PathBuf {
        let path = self.paths.session_log(session_id);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();
        path
    }
}

pub fn user_line(session: &str, ts: &str, text: &str) -> String {
    json!({
        "type": "user",
        "sessionId": session,
        "timestamp": ts,
        "cwd": "/work/demo",
        "gitBranch": "main",
        "message": {"role": "user", "content": text}
    })
    .to_string()
}

pub fn assistant_line(session: &str, ts: &str, message_id: &str, blocks: Value, usage: Value) -> String {
    json!({
        "type": "assistant",
        "sessionId": session,
        "timestamp": ts,
        "message": {
            "id": message_id,
            "role": "assistant",
            "content": blocks,
            "usage": usage
        }
    })
    .to_string()
}

pub fn text_block(text: &str) -> Value {
    json!({"type": "text", "text": text})
}

pub fn tool_use_block(id: &str, name: &str, input: Value) -> Value {
    json!({"type": "tool_use", "id": id, "name": name, "input": input})
}

pub fn tool_result_line(session: &str, ts: &str, tool_use_id: &str, output: &str, is_error: bool) -> String {
    json!({
        "type": "user",
        "sessionId": session,
        "timestamp": ts,
        "message": {
            "role": "user",
            "content": [{
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": output,
                "is_error": is_error
            }]
        }
    })
    .to_string()
}

pub fn usage(input: u64, output: u64) -> Value {
    json!({"input_tokens": input, "output_tokens": output})
}

/// A session with `turns` user prompts, each answered by one Read call
pub fn synthetic_session(session: &str, turns: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for i in 0..turns {
        let ts = format!("2025-03-01T10:{:02}:00Z", i % 60);
        let tool_id = format!("toolu_{i}");
        lines.push(user_line(session, &ts, &format!("look at module {i} please")));
        lines.push(assistant_line(
            session,
            &ts,
            &format!("msg_{i}"),
            json!([
                text_block("Reading it now."),
                tool_use_block(&tool_id, "Read", json!({"file_path": format!("src/mod_{i}.rs")}))
            ]),
            usage(1200, 80),
        ));
        lines.push(tool_result_line(session, &ts, &tool_id, "fn main() {}", false));
    }
    lines
}
