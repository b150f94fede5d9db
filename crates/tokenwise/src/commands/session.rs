use std::path::{Path, PathBuf};
use tokenwise_core::Config;
use tokenwise_telemetry::Paths;
use tokenwise_transcript::{ArchiveError, Materialized, SessionArchiver};

pub fn materialize_session(
    paths: &Paths,
    config: &Config,
    session_id: &str,
    source_log: &Path,
) -> Result<Materialized, ArchiveError> {
    SessionArchiver::new(paths.clone(), config).materialize(session_id, source_log)
}

/// Most recently modified raw session log for this project
pub fn newest_session_log(paths: &Paths) -> Option<PathBuf> {
    let entries = std::fs::read_dir(paths.sessions_dir()).ok()?;
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
        .filter_map(|p| {
            let modified = std::fs::metadata(&p).and_then(|m| m.modified()).ok()?;
            Some((modified, p))
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, p)| p)
}

/// Session id and log path from explicit arguments, falling back to the newest log
pub fn resolve_session(
    paths: &Paths,
    session: Option<&str>,
    file: Option<&Path>,
) -> Option<(String, PathBuf)> {
    match (session, file) {
        (Some(id), Some(file)) => Some((id.to_string(), file.to_path_buf())),
        (Some(id), None) => Some((id.to_string(), paths.session_log(id))),
        (None, Some(file)) => Some((session_id_from_path(file)?, file.to_path_buf())),
        (None, None) => {
            let file = newest_session_log(paths)?;
            Some((session_id_from_path(&file)?, file))
        }
    }
}

fn session_id_from_path(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().into_owned())
}

pub fn run_materialize(session: Option<&str>, file: Option<&Path>) -> anyhow::Result<()> {
    let paths = Paths::new()?;
    let config = Config::load(&paths);

    let Some((session_id, source)) = resolve_session(&paths, session, file) else {
        anyhow::bail!(
            "no session log found under {}; pass --session or --file",
            paths.sessions_dir().display()
        );
    };
    if !source.exists() {
        anyhow::bail!("session log {} does not exist", source.display());
    }

    let materialized = materialize_session(&paths, &config, &session_id, &source)?;
    for record in &materialized.rotation.archived {
        println!("Archived {}", record.archived_path.display());
    }
    for removed in &materialized.rotation.removed {
        println!("Removed empty transcript {}", removed.display());
    }
    println!("{}", materialized.path.display());
    Ok(())
}

pub fn run_archive(prune: bool) -> anyhow::Result<()> {
    let paths = Paths::new()?;
    let config = Config::load(&paths);
    let archiver = SessionArchiver::new(paths, &config);

    let rotation = archiver.archive_current()?;
    if rotation.archived.is_empty() && rotation.removed.is_empty() {
        println!("Nothing to archive");
    }
    for record in &rotation.archived {
        println!("Archived {}", record.archived_path.display());
    }
    for removed in &rotation.removed {
        println!("Removed empty transcript {}", removed.display());
    }

    if prune {
        for removed in archiver.prune_archive()? {
            println!("Pruned {}", removed.display());
        }
    }
    Ok(())
}
