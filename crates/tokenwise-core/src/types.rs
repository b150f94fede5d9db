//! Cache entry and lookup types

use crate::key::OperationKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Rule deciding when an entry stops being valid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvalidationBasis {
    /// Valid while the backing file is no newer than when it was cached
    Mtime {
        path: PathBuf,
        mtime: DateTime<Utc>,
    },
    /// Valid until the deadline
    Ttl { expires_at: DateTime<Utc> },
}

impl InvalidationBasis {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Mtime { path, mtime } => match file_mtime(path) {
                Some(current) => *mtime >= current,
                None => false,
            },
            Self::Ttl { expires_at } => now < *expires_at,
        }
    }
}

/// Current modification time, `None` if the file is gone or unreadable
pub fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// One cached tool result. Never modified after it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub kind: OperationKind,
    pub payload: Value,
    pub basis: InvalidationBasis,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub hit_count: u64,
}

impl CacheEntry {
    /// Copy of this entry recording one more hit
    pub fn with_hit(&self) -> Self {
        Self {
            hit_count: self.hit_count + 1,
            ..self.clone()
        }
    }

    pub fn payload_bytes(&self) -> usize {
        match &self.payload {
            Value::String(s) => s.len(),
            other => other.to_string().len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    /// Caching is switched off in config
    Disabled,
    /// The operation is outside the cacheability policy
    NotCacheable,
    Absent,
    Stale,
    /// Store missing-but-expected, corrupt, or unreadable
    StoreUnavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Hit(CacheEntry),
    Miss(MissReason),
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    pub fn entry(&self) -> Option<&CacheEntry> {
        match self {
            Lookup::Hit(entry) => Some(entry),
            Lookup::Miss(_) => None,
        }
    }
}

/// Entry counts per operation kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub file_read: usize,
    pub command: usize,
    pub search: usize,
    /// Entries that could not be decoded
    pub skipped: usize,
    pub total_hits: u64,
}

impl CacheStats {
    pub fn entries(&self) -> usize {
        self.file_read + self.command + self.search
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::time::SystemTime;

    #[test]
    fn test_ttl_basis() {
        let now = Utc::now();
        let basis = InvalidationBasis::Ttl {
            expires_at: now + Duration::seconds(60),
        };
        assert!(basis.is_valid_at(now));
        assert!(basis.is_valid_at(now + Duration::seconds(59)));
        assert!(!basis.is_valid_at(now + Duration::seconds(60)));
    }

    #[test]
    fn test_mtime_basis_missing_file_is_stale() {
        let temp = tempfile::TempDir::new().unwrap();
        let basis = InvalidationBasis::Mtime {
            path: temp.path().join("gone.txt"),
            mtime: Utc::now(),
        };
        assert!(!basis.is_valid_at(Utc::now()));
    }

    #[test]
    fn test_mtime_basis_tracks_modification() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("a.txt");
        std::fs::write(&path, "one").unwrap();

        let basis = InvalidationBasis::Mtime {
            path: path.clone(),
            mtime: file_mtime(&path).unwrap(),
        };
        assert!(basis.is_valid_at(Utc::now()));

        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + std::time::Duration::from_secs(5))
            .unwrap();
        assert!(!basis.is_valid_at(Utc::now()));
    }

    #[test]
    fn test_basis_serde_shape() {
        let basis = InvalidationBasis::Ttl {
            expires_at: Utc::now(),
        };
        let json = serde_json::to_value(&basis).unwrap();
        assert_eq!(json["type"], "ttl");
    }
}
