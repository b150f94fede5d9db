//! Operation kinds, parameter normalization and cache key derivation

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};

/// Parameter keys whose values name filesystem paths
const PATH_KEYS: &[&str] = &["file_path", "path", "notebook_path"];

/// Parameters that describe an invocation but never change its result
const IGNORED_KEYS: &[&str] = &["description", "timeout"];

const SAFE_COMMANDS: &[&str] = &["ls", "find", "grep", "wc", "cat", "head", "tail"];
const TIME_SENSITIVE_WORDS: &[&str] = &["date", "time", "ps", "top", "df"];
const SHELL_OPERATORS: &[&str] = &[">", "|", ";", "&&", "`", "$("];

/// Class of cacheable tool invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    FileRead,
    Command,
    Search,
}

impl OperationKind {
    pub const ALL: [OperationKind; 3] = [
        OperationKind::FileRead,
        OperationKind::Command,
        OperationKind::Search,
    ];

    /// Map a host tool name onto a kind; unknown tools are never cached
    pub fn from_tool(tool_name: &str) -> Option<Self> {
        match tool_name {
            "Read" => Some(Self::FileRead),
            "Bash" => Some(Self::Command),
            "Grep" | "Glob" => Some(Self::Search),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileRead => "file_read",
            Self::Command => "command",
            Self::Search => "search",
        }
    }

    /// File name of this kind's store inside the cache directory
    pub fn store_file(&self) -> String {
        format!("{}_cache.json", self.as_str())
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool invocation with normalized parameters, ready for keying
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OperationKind,
    pub params: Value,
}

impl Operation {
    /// Build from the host's tool name and raw input
    pub fn from_tool(tool_name: &str, tool_input: &Value, project_root: &Path) -> Option<Self> {
        let kind = OperationKind::from_tool(tool_name)?;
        let mut params = normalize_params(kind, tool_input, project_root);

        // Grep and Glob share a kind but not semantics
        if kind == OperationKind::Search {
            if let Value::Object(map) = &mut params {
                map.insert("tool".to_string(), Value::String(tool_name.to_lowercase()));
            }
        }

        Some(Self { kind, params })
    }

    pub fn key(&self) -> String {
        derive_key(self.kind, &self.params)
    }

    /// Path of the backing file for file reads
    pub fn file_path(&self) -> Option<PathBuf> {
        if self.kind != OperationKind::FileRead {
            return None;
        }
        self.params
            .get("file_path")
            .and_then(Value::as_str)
            .map(PathBuf::from)
    }

    pub fn command(&self) -> Option<&str> {
        self.params.get("command").and_then(Value::as_str)
    }
}

/// Canonicalize parameters so that equivalent invocations compare equal.
///
/// Key order is irrelevant because the result is serialized with sorted keys.
pub fn normalize_params(kind: OperationKind, params: &Value, project_root: &Path) -> Value {
    let Value::Object(input) = params else {
        return params.clone();
    };

    let mut out = Map::new();
    for (key, value) in input {
        if IGNORED_KEYS.contains(&key.as_str()) || value.is_null() {
            continue;
        }

        let normalized = match (key.as_str(), value) {
            (k, Value::String(s)) if PATH_KEYS.contains(&k) => {
                Value::String(normalize_path(s.trim(), project_root))
            }
            ("command", Value::String(s)) => Value::String(collapse_unquoted_whitespace(s)),
            // Patterns and other values are matched byte for byte
            _ => value.clone(),
        };
        out.insert(key.clone(), normalized);
    }

    if kind == OperationKind::Search && !out.contains_key("path") {
        out.insert(
            "path".to_string(),
            Value::String(normalize_path(".", project_root)),
        );
    }

    Value::Object(out)
}

/// Lowercase hex SHA-256 of the kind and the canonical parameter JSON
pub fn derive_key(kind: OperationKind, normalized: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical_json(normalized).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Serialize with object keys sorted at every depth
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        Value::String(k.clone()),
                        canonical_json(&map[k.as_str()])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

/// Lexical normalization: no filesystem access, symlinks are not resolved
pub fn normalize_path(raw: &str, project_root: &Path) -> String {
    let path = Path::new(raw);
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }

    out.to_string_lossy().into_owned()
}

/// Collapse whitespace runs to one space, leaving quoted and
/// backslash-escaped characters untouched
pub fn collapse_unquoted_whitespace(command: &str) -> String {
    let mut out = String::with_capacity(command.len());
    let mut quote: Option<char> = None;
    let mut pending_space = false;
    let mut escaped = false;

    for ch in command.trim().chars() {
        if escaped {
            out.push(ch);
            escaped = false;
            continue;
        }
        match quote {
            Some(q) => {
                out.push(ch);
                if ch == q {
                    quote = None;
                } else if ch == '\\' && q == '"' {
                    escaped = true;
                }
            }
            None if ch.is_whitespace() => pending_space = true,
            None => {
                if pending_space {
                    out.push(' ');
                    pending_space = false;
                }
                match ch {
                    '"' | '\'' => quote = Some(ch),
                    '\\' => escaped = true,
                    _ => {}
                }
                out.push(ch);
            }
        }
    }

    out
}

/// Only read-only, deterministic commands are worth caching
pub fn is_cacheable_command(command: &str) -> bool {
    let mut words = command.split_whitespace();
    let Some(first) = words.next() else {
        return false;
    };

    if !SAFE_COMMANDS.contains(&first) {
        return false;
    }

    if SHELL_OPERATORS.iter().any(|op| command.contains(op)) {
        return false;
    }

    !command
        .split_whitespace()
        .any(|word| TIME_SENSITIVE_WORDS.contains(&word))
}
