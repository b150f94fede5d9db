use serde_json::Value;
use tokenwise_telemetry::Paths;

const TOOL_MATCHER: &str = "Read|Bash|Grep|Glob";

const HOOKS: &[(&str, &str, &str)] = &[
    ("PreToolUse", TOOL_MATCHER, "tokenwise hook:pre-tool-use"),
    ("PostToolUse", TOOL_MATCHER, "tokenwise hook:post-tool-use"),
    ("UserPromptSubmit", "", "tokenwise hook:user-prompt-submit"),
    ("Stop", "", "tokenwise hook:stop"),
    ("PreCompact", "", "tokenwise hook:pre-compact"),
];

pub fn run() -> anyhow::Result<()> {
    let paths = Paths::new()?;
    let added = install(&paths)?;

    if added.is_empty() {
        println!("✓ tokenwise hooks already installed in {}", paths.settings_file().display());
        return Ok(());
    }

    println!("✓ Installed tokenwise hooks in {}", paths.settings_file().display());
    println!("\nHooks added:");
    for event in added {
        println!("  - {event}");
    }
    Ok(())
}

/// Add any missing hooks to the project settings; returns the events touched
fn install(paths: &Paths) -> anyhow::Result<Vec<&'static str>> {
    let settings_path = paths.settings_file();
    let mut settings: Value = if settings_path.exists() {
        let content = std::fs::read_to_string(&settings_path)?;
        serde_json::from_str(&content)?
    } else {
        serde_json::json!({})
    };

    if settings.get("hooks").is_none() {
        settings["hooks"] = serde_json::json!({});
    }

    let mut added = Vec::new();
    for &(event_name, matcher, command) in HOOKS {
        if add_hook_if_missing(&mut settings, event_name, matcher, command)? {
            added.push(event_name);
        }
    }

    if !added.is_empty() {
        std::fs::create_dir_all(paths.project_claude_dir())?;
        let json = serde_json::to_string_pretty(&settings)?;
        tokenwise_telemetry::atomic_write(&settings_path, json.as_bytes())?;
    }
    Ok(added)
}

fn add_hook_if_missing(
    settings: &mut Value,
    event_name: &str,
    matcher: &str,
    command: &str,
) -> anyhow::Result<bool> {
    let hooks = settings
        .get_mut("hooks")
        .and_then(|h| h.as_object_mut())
        .ok_or_else(|| anyhow::anyhow!("hooks is not an object"))?;

    let event_array = hooks
        .entry(event_name)
        .or_insert_with(|| serde_json::json!([]));

    let event_groups = event_array
        .as_array_mut()
        .ok_or_else(|| anyhow::anyhow!("event {} is not an array", event_name))?;

    let already_exists = event_groups.iter().any(|group| {
        group
            .get("hooks")
            .and_then(|h| h.as_array())
            .is_some_and(|hooks_array| {
                hooks_array
                    .iter()
                    .any(|hook| hook.get("command").and_then(|c| c.as_str()) == Some(command))
            })
    });

    if already_exists {
        return Ok(false);
    }

    event_groups.push(serde_json::json!({
        "matcher": matcher,
        "hooks": [
            {
                "type": "command",
                "command": command
            }
        ]
    }));
    Ok(true)
}
