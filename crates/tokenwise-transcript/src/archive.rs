//! Rotation of materialized session transcripts
//!
//! `logs/current/` holds the transcript of the tracked session. When a
//! different session is materialized, every transcript in `current/` moves to
//! `logs/archive/` first. Moves never overwrite: a taken name gets a
//! disambiguating suffix. Rotation runs under a non-blocking advisory lock so
//! two hook processes cannot rotate at the same time; the loser gets
//! [`ArchiveError::Busy`] and the next invocation retries.

use crate::parser::parse_file;
use crate::render::render_markdown;
use chrono::{DateTime, Local, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokenwise_core::{Config, Pricing};
use tokenwise_telemetry::{append_jsonl, atomic_write, is_temp_artifact, read_jsonl, ArchiveRecord, Paths};

const STATE_FILE: &str = "session.json";
const INDEX_FILE: &str = "index.jsonl";
const MAX_NAME_ATTEMPTS: usize = 1000;
const HEADER_LINES: usize = 8;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session state encoding error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("another process is rotating session logs")]
    Busy,
}

/// The tracked active session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub current_file: PathBuf,
    pub started_at: DateTime<Utc>,
}

/// Outcome of one rotation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rotation {
    pub archived: Vec<ArchiveRecord>,
    /// Degenerate transcripts deleted instead of archived
    pub removed: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Materialized {
    pub path: PathBuf,
    pub rotation: Rotation,
}

struct ArchiveLock {
    file: File,
}

impl Drop for ArchiveLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

pub struct SessionArchiver {
    paths: Paths,
    min_bytes: u64,
    pricing: Pricing,
}

impl SessionArchiver {
    pub fn new(paths: Paths, config: &Config) -> Self {
        Self {
            paths,
            min_bytes: config.min_transcript_bytes,
            pricing: config.pricing,
        }
    }

    /// Tracked session, if any. Unreadable state counts as none.
    pub fn state(&self) -> Option<SessionState> {
        let path = self.state_path();
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt session state");
                None
            }
        }
    }

    pub fn materialize(&self, session_id: &str, source_log: &Path) -> Result<Materialized, ArchiveError> {
        self.materialize_at(session_id, source_log, Local::now())
    }

    /// Render the session's log into `current/`, rotating out any other
    /// session's transcripts first
    pub fn materialize_at(
        &self,
        session_id: &str,
        source_log: &Path,
        now: DateTime<Local>,
    ) -> Result<Materialized, ArchiveError> {
        let _lock = self.try_lock()?;

        let transcript = parse_file(source_log)?;
        let rendered = render_markdown(&transcript, &self.pricing);

        let state = self.state();
        if let Some(state) = &state {
            if state.session_id == session_id && state.current_file.exists() {
                atomic_write(&state.current_file, rendered.as_bytes())?;
                tracing::debug!(path = %state.current_file.display(), "refreshed current transcript");
                return Ok(Materialized {
                    path: state.current_file.clone(),
                    rotation: Rotation::default(),
                });
            }
        }

        let rotation = self.rotate(state.as_ref(), now)?;

        let current_dir = self.paths.current_dir();
        fs::create_dir_all(&current_dir)?;
        let path = current_dir.join(format!(
            "session_{}_{}.md",
            now.format("%Y%m%d_%H%M%S"),
            short_id(session_id)
        ));
        atomic_write(&path, rendered.as_bytes())?;

        let state = SessionState {
            session_id: session_id.to_string(),
            current_file: path.clone(),
            started_at: now.with_timezone(&Utc),
        };
        atomic_write(&self.state_path(), &serde_json::to_vec_pretty(&state)?)?;
        tracing::info!(session = %session_id, path = %path.display(), "started session transcript");

        Ok(Materialized { path, rotation })
    }

    /// Move everything in `current/` to the archive and forget the tracked
    /// session. A no-op when nothing is current.
    pub fn archive_current(&self) -> Result<Rotation, ArchiveError> {
        self.archive_current_at(Local::now())
    }

    pub fn archive_current_at(&self, now: DateTime<Local>) -> Result<Rotation, ArchiveError> {
        let _lock = self.try_lock()?;
        let state = self.state();
        let rotation = self.rotate(state.as_ref(), now)?;

        match fs::remove_file(self.state_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(rotation)
    }

    /// Delete degenerate transcripts already sitting in the archive
    pub fn prune_archive(&self) -> Result<Vec<PathBuf>, ArchiveError> {
        let _lock = self.try_lock()?;
        let mut removed = Vec::new();
        for path in transcripts_in(&self.paths.archive_dir())? {
            if fs::metadata(&path)?.len() < self.min_bytes {
                fs::remove_file(&path)?;
                removed.push(path);
            }
        }
        Ok(removed)
    }

    /// Every recorded move, oldest first
    pub fn archive_index(&self) -> Vec<ArchiveRecord> {
        read_jsonl(&self.index_path()).unwrap_or_default()
    }

    pub fn index_path(&self) -> PathBuf {
        self.paths.archive_dir().join(INDEX_FILE)
    }

    fn state_path(&self) -> PathBuf {
        self.paths.current_dir().join(STATE_FILE)
    }

    fn rotate(&self, state: Option<&SessionState>, now: DateTime<Local>) -> Result<Rotation, ArchiveError> {
        let mut rotation = Rotation::default();

        for path in transcripts_in(&self.paths.current_dir())? {
            let len = match fs::metadata(&path) {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            if len < self.min_bytes {
                fs::remove_file(&path)?;
                tracing::debug!(path = %path.display(), bytes = len, "deleted degenerate transcript");
                rotation.removed.push(path);
                continue;
            }

            let session_id = session_for(&path, state);
            let archived_path = self.move_into_archive(&path, now)?;
            let record = ArchiveRecord {
                session_id,
                source_path: path,
                archived_path,
                archived_at: now.with_timezone(&Utc),
            };
            if let Err(e) = append_jsonl(&self.index_path(), &record) {
                tracing::warn!(error = %e, "failed to append archive index");
            }
            tracing::info!(
                from = %record.source_path.display(),
                to = %record.archived_path.display(),
                "archived transcript"
            );
            rotation.archived.push(record);
        }

        Ok(rotation)
    }

    fn move_into_archive(&self, source: &Path, now: DateTime<Local>) -> std::io::Result<PathBuf> {
        let archive_dir = self.paths.archive_dir();
        fs::create_dir_all(&archive_dir)?;

        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "session".to_string());
        let base = format!("{stem}__archived_{}", now.format("%Y%m%d_%H%M%S"));
        let nanos = now.timestamp_subsec_nanos();

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = match attempt {
                0 => format!("{base}.md"),
                1 => format!("{base}_{nanos:09}.md"),
                n => format!("{base}_{nanos:09}_{}.md", n - 1),
            };
            let target = archive_dir.join(name);
            match place(source, &target) {
                Ok(()) => return Ok(target),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }

        Err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free archive name for {}", source.display()),
        ))
    }

    fn try_lock(&self) -> Result<ArchiveLock, ArchiveError> {
        let lock_path = self.paths.archive_lock();
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(ArchiveLock { file }),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(ArchiveError::Busy),
            Err(e) => Err(e.into()),
        }
    }
}

/// Move `source` to `target` without ever replacing an existing file
fn place(source: &Path, target: &Path) -> std::io::Result<()> {
    match fs::hard_link(source, target) {
        Ok(()) => fs::remove_file(source),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(e),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(e),
        Err(_) => {
            // Filesystems without hard links
            if target.exists() {
                return Err(std::io::Error::new(ErrorKind::AlreadyExists, "archive target exists"));
            }
            fs::rename(source, target)
        }
    }
}

/// Markdown transcripts in `dir`, sorted by name; missing dir is empty
fn transcripts_in(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file()
            && !is_temp_artifact(&path)
            && path.extension().is_some_and(|ext| ext == "md")
        {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn short_id(session_id: &str) -> String {
    let id: String = session_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .take(8)
        .collect();
    if id.is_empty() {
        "unknown".to_string()
    } else {
        id
    }
}

/// Full session id of a transcript: tracked state first, then the rendered
/// `Session ID:` header, then the short id in the file name
fn session_for(path: &Path, state: Option<&SessionState>) -> String {
    if let Some(state) = state.filter(|s| s.current_file == path) {
        return state.session_id.clone();
    }
    if let Some(id) = header_session_id(path) {
        return id;
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.rsplit('_').next())
        .unwrap_or("unknown")
        .to_string()
}

fn header_session_id(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    BufReader::new(file)
        .lines()
        .take(HEADER_LINES)
        .map_while(Result::ok)
        .find_map(|line| {
            line.strip_prefix("Session ID: ")
                .map(str::trim)
                .filter(|id| !id.is_empty() && *id != "unknown")
                .map(str::to_string)
        })
}
