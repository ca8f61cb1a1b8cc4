//! Durable key-value storage backends
//!
//! The cache and progress store persist JSON documents through the
//! [`KeyValueStore`] trait. Two backends are provided:
//!
//! - [`MemoryStore`] - in-process, lost on exit
//! - [`SqliteStore`] - SQLite via sqlx, survives restarts

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{create_pool, SqliteStore};

use async_trait::async_trait;

use crate::error::Result;

/// Key-value storage trait
///
/// Values are serialized JSON documents. Keys are namespaced by the caller
/// (`content:<book>`, `progress:<user>:<book>:<device>`), so `list_all` takes a
/// prefix to scope the scan to one namespace.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Insert or overwrite the value stored under `key`
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Fetch the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Remove `key`; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// All `(key, value)` pairs whose key starts with `prefix`
    async fn list_all(&self, prefix: &str) -> Result<Vec<(String, String)>>;
}
