//! Los Libros offline reading
//!
//! Local-first support for reading without a connection and for keeping the
//! reading position consistent across a user's devices.
//!
//! # Modules
//!
//! - `cache`: Size-bounded offline book cache with batch LRU eviction
//! - `progress`: Per-device reading positions and their local persistence
//! - `sync`: Conflict resolution, remote progress clients, periodic auto sync
//! - `storage`: Key-value backends (in-memory, SQLite)
//! - `reader`: The facade composing all of the above

pub mod cache;
pub mod config;
pub mod error;
pub mod progress;
pub mod reader;
pub mod storage;
pub mod sync;

pub use cache::{BookPayload, CacheConfig, CacheStats, ContentCache, OfflineContentRecord};
pub use config::Config;
pub use error::{ReaderError, Result};
pub use progress::{ProgressRecord, ProgressStore};
pub use reader::OfflineReader;
pub use sync::{RemoteProgressService, SyncConfig, SyncScheduler};
