//! Tool-invocation cache, prompt optimizer and their shared configuration

mod cache;
mod config;
mod error;
mod key;
mod optimizer;
mod types;

pub use cache::{CacheManager, StoreLock};
pub use config::{Config, Pricing};
pub use error::CacheError;
pub use key::{
    collapse_unquoted_whitespace, derive_key, is_cacheable_command, normalize_params,
    normalize_path, Operation, OperationKind,
};
pub use optimizer::{compress, is_simple_query, wants_cached_context, Optimized, PromptOptimizer};
pub use types::{file_mtime, CacheEntry, CacheStats, InvalidationBasis, Lookup, MissReason};
