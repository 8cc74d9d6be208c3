//! Response cache for offline support.
//!
//! This module provides:
//! - Named stores of request/response pairs, persisted in SQLite
//! - Versioned generations (static assets and dynamic content)
//! - Freshness classification by storage timestamp
//! - Cache-first and network-first fetch strategies

mod freshness;
mod layer;
mod storage;
mod types;

pub use freshness::FreshnessPolicy;
pub use layer::CacheLayer;
pub use storage::{CacheHandle, CacheStorage, SqliteStorage};
pub use types::{CacheEntry, CacheResult, CacheSource, Generations};

#[cfg(test)]
pub use types::CACHE_TIMESTAMP_HEADER;
