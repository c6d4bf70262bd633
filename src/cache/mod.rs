//! Caching tiers for list reads.
//!
//! - [`DedupCache`]: in-memory coalescing of concurrent identical requests, with TTL
//! - [`PersistentCache`]: durable stale-while-revalidate cache over a [`CacheStorage`]

mod dedup;
mod layer;
mod storage;
mod traits;

pub use dedup::{DedupCache, DedupOptions, SharedResult};
pub use layer::{DataCallback, ErrorCallback, FetchOptions, PersistentCache};
pub use storage::{CacheStorage, MemoryStorage, NoopStorage, SqliteStorage};
pub use traits::{CacheEntry, CacheError, CacheResult, CacheSource, QueryKey};
