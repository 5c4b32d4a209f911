//! # Core Cache
//!
//! Read-path half of the offline engine: a multi-policy cache store with
//! LRU byte-budget eviction, dependency cascade invalidation, and
//! stale-while-revalidate refresh scheduling. All contents are persisted
//! through SQLite and rebuilt on startup.

pub mod entry;
pub mod error;
pub mod policy;
pub mod repository;
pub mod store;

pub use entry::{CacheEntry, CacheWrite, RefreshSource};
pub use error::{CacheError, Result};
pub use policy::{CachePolicy, Freshness};
pub use repository::{CacheRepository, SqliteCacheRepository};
pub use store::{CacheStats, CacheStore, Lookup, RefreshRequest};
