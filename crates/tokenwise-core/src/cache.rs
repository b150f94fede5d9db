//! Disk-backed tool-invocation cache
//!
//! One JSON store per operation kind, keyed by derived hash. Reads never take
//! the lock because every write replaces the store with a rename. Writers take
//! an advisory lock without waiting; a contended lock means the write is
//! skipped and the next invocation tries again.
//!
//! Every failure degrades to a miss.

use crate::config::Config;
use crate::error::CacheError;
use crate::key::{is_cacheable_command, Operation, OperationKind};
use crate::types::{file_mtime, CacheEntry, CacheStats, InvalidationBasis, Lookup, MissReason};
use chrono::{DateTime, Duration, Local, Utc};
use fs2::FileExt;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokenwise_telemetry::{append_jsonl, atomic_write, estimate_json_tokens, CacheEvent, CacheOutcome, Paths};

/// Decoded contents of one store file
#[derive(Debug, Default)]
struct Store {
    entries: BTreeMap<String, CacheEntry>,
    skipped: usize,
}

/// Exclusive hold on the cache directory, released on drop
pub struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

pub struct CacheManager {
    paths: Paths,
    config: Config,
    session_id: Option<String>,
}

impl CacheManager {
    pub fn new(paths: Paths, config: Config) -> Self {
        Self {
            paths,
            config,
            session_id: None,
        }
    }

    /// Tag instrumentation events with a session id
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Normalize a host tool invocation against this project
    pub fn operation(&self, tool_name: &str, tool_input: &Value) -> Option<Operation> {
        Operation::from_tool(tool_name, tool_input, &self.paths.project_root)
    }

    pub fn lookup(&self, op: &Operation) -> Lookup {
        self.lookup_at(op, Utc::now())
    }

    pub fn lookup_at(&self, op: &Operation, now: DateTime<Utc>) -> Lookup {
        if !self.config.caching_enabled {
            return Lookup::Miss(MissReason::Disabled);
        }
        if !self.is_cacheable(op) {
            return Lookup::Miss(MissReason::NotCacheable);
        }

        let key = op.key();
        let store = match self.read_store(op.kind) {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!(kind = %op.kind, error = %e, "cache store unavailable, treating as miss");
                self.record(op.kind, CacheOutcome::Miss, None);
                return Lookup::Miss(MissReason::StoreUnavailable);
            }
        };

        let reason = match store.entries.get(&key) {
            None => MissReason::Absent,
            Some(entry) if !entry.basis.is_valid_at(now) => MissReason::Stale,
            Some(entry) => {
                let hit = entry.with_hit();
                if let Err(e) = self.put(&hit) {
                    tracing::debug!(error = %e, "hit count not persisted");
                }
                tracing::debug!(kind = %op.kind, key = %key, hits = hit.hit_count, "cache hit");
                self.record(op.kind, CacheOutcome::Hit, Some(&hit));
                return Lookup::Hit(hit);
            }
        };

        tracing::debug!(kind = %op.kind, ?reason, "cache miss");
        self.record(op.kind, CacheOutcome::Miss, None);
        Lookup::Miss(reason)
    }

    /// Store a result with an explicit invalidation basis.
    ///
    /// Returns `None` when caching is disabled.
    pub fn store(
        &self,
        op: &Operation,
        payload: Value,
        basis: InvalidationBasis,
    ) -> Result<Option<CacheEntry>, CacheError> {
        self.store_at(op, payload, basis, Utc::now())
    }

    pub fn store_at(
        &self,
        op: &Operation,
        payload: Value,
        basis: InvalidationBasis,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, CacheError> {
        if !self.config.caching_enabled {
            return Ok(None);
        }

        let entry = CacheEntry {
            key: op.key(),
            kind: op.kind,
            payload,
            basis,
            created_at: now,
            hit_count: 0,
        };
        self.put(&entry)?;
        self.record(op.kind, CacheOutcome::Store, Some(&entry));
        Ok(Some(entry))
    }

    /// Store a tool result if policy allows, deriving the basis from config
    pub fn store_result(
        &self,
        op: &Operation,
        payload: Value,
    ) -> Result<Option<CacheEntry>, CacheError> {
        if !self.config.caching_enabled || !self.is_cacheable(op) {
            return Ok(None);
        }
        let now = Utc::now();
        match self.basis_for(op, now) {
            Some(basis) => self.store_at(op, payload, basis, now),
            None => Ok(None),
        }
    }

    /// Invalidation basis for a fresh result of `op`
    pub fn basis_for(&self, op: &Operation, now: DateTime<Utc>) -> Option<InvalidationBasis> {
        match op.kind {
            OperationKind::FileRead => {
                let path = op.file_path()?;
                let mtime = file_mtime(&path)?;
                Some(InvalidationBasis::Mtime { path, mtime })
            }
            OperationKind::Command => Some(InvalidationBasis::Ttl {
                expires_at: now + ttl(self.config.command_ttl_secs),
            }),
            OperationKind::Search => Some(InvalidationBasis::Ttl {
                expires_at: now + ttl(self.config.search_ttl_secs),
            }),
        }
    }

    pub fn is_cacheable(&self, op: &Operation) -> bool {
        match op.kind {
            OperationKind::FileRead => op
                .file_path()
                .and_then(|p| fs::metadata(p).ok())
                .is_some_and(|m| m.is_file() && m.len() <= self.config.max_cached_file_bytes),
            OperationKind::Command => op.command().is_some_and(is_cacheable_command),
            OperationKind::Search => op
                .params
                .get("pattern")
                .and_then(Value::as_str)
                .is_some_and(|p| !p.is_empty()),
        }
    }

    /// Still-valid cached file reads created within `window`, newest first
    pub fn recent_file_reads(&self, window: Duration, now: DateTime<Utc>) -> Vec<PathBuf> {
        let Ok(store) = self.read_store(OperationKind::FileRead) else {
            return Vec::new();
        };

        let mut recent: Vec<&CacheEntry> = store
            .entries
            .values()
            .filter(|e| now - e.created_at <= window && e.basis.is_valid_at(now))
            .collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        recent
            .into_iter()
            .filter_map(|e| match &e.basis {
                InvalidationBasis::Mtime { path, .. } => Some(path.clone()),
                InvalidationBasis::Ttl { .. } => None,
            })
            .collect()
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for kind in OperationKind::ALL {
            let store = match self.read_store(kind) {
                Ok(store) => store,
                Err(e) => {
                    tracing::warn!(kind = %kind, error = %e, "skipping unreadable cache store");
                    continue;
                }
            };
            let count = store.entries.len();
            match kind {
                OperationKind::FileRead => stats.file_read = count,
                OperationKind::Command => stats.command = count,
                OperationKind::Search => stats.search = count,
            }
            stats.skipped += store.skipped;
            stats.total_hits += store.entries.values().map(|e| e.hit_count).sum::<u64>();
        }
        stats
    }

    /// Remove every store file; returns how many were removed
    pub fn clear(&self) -> Result<usize, CacheError> {
        let _lock = self.try_lock()?;
        let mut removed = 0;
        for kind in OperationKind::ALL {
            match fs::remove_file(self.store_path(kind)) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    /// Take the writer lock without waiting
    pub fn try_lock(&self) -> Result<StoreLock, CacheError> {
        let dir = self.paths.cache_dir();
        fs::create_dir_all(&dir)?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(dir.join(".lock"))?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(StoreLock { file }),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(CacheError::Contended),
            Err(e) => Err(e.into()),
        }
    }

    pub fn store_path(&self, kind: OperationKind) -> PathBuf {
        self.paths.cache_dir().join(kind.store_file())
    }

    fn read_store(&self, kind: OperationKind) -> Result<Store, CacheError> {
        read_store_file(&self.store_path(kind))
    }

    /// Insert or replace one entry under the writer lock
    fn put(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let _lock = match self.try_lock() {
            Ok(lock) => lock,
            Err(CacheError::Contended) => {
                tracing::warn!(kind = %entry.kind, "cache store busy, skipping write");
                return Err(CacheError::Contended);
            }
            Err(e) => return Err(e),
        };

        let path = self.store_path(entry.kind);
        let mut store = match read_store_file(&path) {
            Ok(store) => store,
            Err(CacheError::Serde(e)) => {
                tracing::warn!(path = %path.display(), error = %e, "rewriting corrupt cache store");
                Store::default()
            }
            Err(e) => return Err(e),
        };
        store.entries.insert(entry.key.clone(), entry.clone());

        let data = serde_json::to_vec(&store.entries)?;
        atomic_write(&path, &data)?;
        Ok(())
    }

    fn record(&self, kind: OperationKind, outcome: CacheOutcome, entry: Option<&CacheEntry>) {
        let (payload_bytes, estimated_tokens) = match entry {
            Some(e) => (e.payload_bytes(), estimate_json_tokens(&e.payload)),
            None => (0, 0),
        };
        let event = CacheEvent {
            timestamp: Utc::now(),
            session_id: self.session_id.clone(),
            kind: kind.as_str().to_string(),
            outcome,
            payload_bytes,
            estimated_tokens,
        };

        let log = self.paths.cache_events_log(Local::now().date_naive());
        if let Err(e) = append_jsonl(&log, &event) {
            tracing::debug!(error = %e, "cache event not recorded");
        }
    }
}

/// Ten years; keeps deadline arithmetic in range for absurd configs
const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn ttl(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_TTL_SECS) as i64)
}

fn read_store_file(path: &Path) -> Result<Store, CacheError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Store::default()),
        Err(e) => return Err(e.into()),
    };

    let raw: Map<String, Value> = serde_json::from_str(&content)?;
    let mut store = Store::default();
    for (key, value) in raw {
        match serde_json::from_value::<CacheEntry>(value) {
            Ok(entry) if entry.key == key => {
                store.entries.insert(key, entry);
            }
            _ => store.skipped += 1,
        }
    }

    if store.skipped > 0 {
        tracing::warn!(path = %path.display(), skipped = store.skipped, "skipped undecodable cache entries");
    }
    Ok(store)
}
