use thiserror::Error;

/// Failures inside the cache manager. Callers treat all of them as a miss.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache store encoding error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("cache store is locked by another process")]
    Contended,
}
