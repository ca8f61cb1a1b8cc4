//! Offline content cache
//!
//! Keeps downloaded books available without a connection, within a fixed
//! byte budget. Least recently accessed books are evicted in batches.

mod content;
mod types;

pub use content::ContentCache;
pub use types::{
    format_size, BookPayload, CacheConfig, CacheEntry, CacheStats, OfflineContentRecord,
    DEFAULT_EVICTION_FRACTION, DEFAULT_MAX_CACHE_SIZE,
};
