//! Bounded offline content cache with batch eviction
//!
//! Records live in the key-value store under `content:<book_id>`. Each has a
//! small [`CacheEntry`] beside it under `cache-index:<book_id>` carrying its size
//! and access time, so budget checks and eviction never decode book content.
//! The total `size_bytes` across all entries is kept within
//! `CacheConfig::max_size_bytes`.
//!
//! # Eviction
//!
//! When the budget is exceeded the entries are sorted by `last_accessed` and the
//! oldest `ceil(fraction * count)` are removed in one batch, repeating until the
//! cache fits. A batch may free more than strictly necessary.
//!
//! Stored values that no longer decode are logged and skipped, so one damaged
//! record cannot wedge listing or eviction.
//!
//! # Thread Safety
//!
//! Every mutation (put, delete, the access-time write-back in `get`, eviction)
//! runs under one async mutex, so an eviction scan never interleaves with a
//! write that would invalidate its selection.

use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use super::types::{CacheConfig, CacheEntry, CacheStats, OfflineContentRecord};
use crate::error::{ReaderError, Result};
use crate::storage::KeyValueStore;

const CONTENT_PREFIX: &str = "content:";
const INDEX_PREFIX: &str = "cache-index:";

fn content_key(book_id: &str) -> String {
    format!("{}{}", CONTENT_PREFIX, book_id)
}

fn index_key(book_id: &str) -> String {
    format!("{}{}", INDEX_PREFIX, book_id)
}

/// Decode every value, dropping the ones that fail with a warning
fn decode_readable<T: DeserializeOwned>(values: Vec<(String, String)>) -> Vec<T> {
    values
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_str(&value) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Skipping unreadable cache value");
                None
            }
        })
        .collect()
}

/// Size-bounded store of downloaded books
pub struct ContentCache {
    store: Arc<dyn KeyValueStore>,
    config: CacheConfig,
    /// Serializes all mutations of this cache instance
    write_lock: Mutex<()>,
}

impl ContentCache {
    pub fn new(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            write_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Store a record, then evict until the cache fits its budget
    ///
    /// Returns the ids of any records evicted to make room. A record larger than
    /// the whole budget is rejected and the cache is left untouched. If storing
    /// or evicting fails, the record (or the copy it replaced) is put back the
    /// way it was before the error is returned.
    pub async fn put(&self, record: OfflineContentRecord) -> Result<Vec<String>> {
        if record.size_bytes > self.config.max_size_bytes {
            tracing::warn!(
                book_id = %record.book_id,
                size = record.size_bytes,
                budget = self.config.max_size_bytes,
                "Rejected content larger than cache budget"
            );
            return Err(ReaderError::RecordTooLarge {
                book_id: record.book_id,
                size: record.size_bytes,
                budget: self.config.max_size_bytes,
            });
        }

        let _guard = self.write_lock.lock().await;

        let previous_content = self.store.get(&content_key(&record.book_id)).await?;
        let previous_entry = self.store.get(&index_key(&record.book_id)).await?;

        match self.insert_and_evict(&record).await {
            Ok(evicted) => Ok(evicted),
            Err(e) => {
                self.roll_back(&record.book_id, previous_content, previous_entry)
                    .await;
                Err(e)
            }
        }
    }

    /// Fetch a record, refreshing its access time
    pub async fn get(&self, book_id: &str) -> Result<Option<OfflineContentRecord>> {
        let _guard = self.write_lock.lock().await;

        let key = content_key(book_id);
        let Some(value) = self.store.get(&key).await? else {
            return Ok(None);
        };

        let mut record: OfflineContentRecord = serde_json::from_str(&value)?;
        record.last_accessed = Utc::now();
        self.store.put(&key, &serde_json::to_string(&record)?).await?;
        self.write_entry(&record).await?;

        Ok(Some(record))
    }

    /// Check presence without touching the access time
    pub async fn has(&self, book_id: &str) -> Result<bool> {
        Ok(self.store.get(&content_key(book_id)).await?.is_some())
    }

    /// All readable cached records, ordered by book id
    pub async fn list(&self) -> Result<Vec<OfflineContentRecord>> {
        Ok(decode_readable(self.store.list_all(CONTENT_PREFIX).await?))
    }

    /// Remove a record; returns whether it was present
    pub async fn delete(&self, book_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let removed = self.remove_both(book_id).await?;
        if removed {
            tracing::debug!(book_id = %book_id, "Deleted offline content");
        }
        Ok(removed)
    }

    /// Run batch eviction if the cache is over budget
    pub async fn evict_if_needed(&self) -> Result<Vec<String>> {
        let _guard = self.write_lock.lock().await;
        self.evict_locked().await
    }

    /// Sum of `size_bytes` over all records
    pub async fn total_size(&self) -> Result<u64> {
        Ok(self.load_entries().await?.iter().map(|e| e.size_bytes).sum())
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let entries = self.load_entries().await?;
        Ok(CacheStats {
            records: entries.len(),
            used_bytes: entries.iter().map(|e| e.size_bytes).sum(),
            budget_bytes: self.config.max_size_bytes,
        })
    }

    async fn load_entries(&self) -> Result<Vec<CacheEntry>> {
        Ok(decode_readable(self.store.list_all(INDEX_PREFIX).await?))
    }

    async fn write_entry(&self, record: &OfflineContentRecord) -> Result<()> {
        let entry = serde_json::to_string(&CacheEntry::from(record))?;
        self.store.put(&index_key(&record.book_id), &entry).await
    }

    /// Returns whether the content itself was present
    async fn remove_both(&self, book_id: &str) -> Result<bool> {
        let removed = self.store.delete(&content_key(book_id)).await?;
        self.store.delete(&index_key(book_id)).await?;
        Ok(removed)
    }

    /// Caller must hold `write_lock`
    async fn insert_and_evict(&self, record: &OfflineContentRecord) -> Result<Vec<String>> {
        let value = serde_json::to_string(record)?;
        self.store.put(&content_key(&record.book_id), &value).await?;
        self.write_entry(record).await?;

        tracing::debug!(
            book_id = %record.book_id,
            size = record.size_bytes,
            "Stored offline content"
        );

        self.evict_locked().await
    }

    /// Put both keys for `book_id` back to their values before a failed put
    async fn roll_back(
        &self,
        book_id: &str,
        previous_content: Option<String>,
        previous_entry: Option<String>,
    ) {
        let restores = [
            (content_key(book_id), previous_content),
            (index_key(book_id), previous_entry),
        ];

        for (key, previous) in restores {
            let restored = match previous {
                Some(value) => self.store.put(&key, &value).await,
                None => self.store.delete(&key).await.map(|_| ()),
            };
            if let Err(e) = restored {
                tracing::error!(key = %key, error = %e, "Failed to roll back cached content");
            }
        }
    }

    /// Caller must hold `write_lock`
    async fn evict_locked(&self) -> Result<Vec<String>> {
        let mut entries = self.load_entries().await?;
        let mut total: u64 = entries.iter().map(|e| e.size_bytes).sum();
        let budget = self.config.max_size_bytes;
        let mut evicted = Vec::new();

        if total <= budget {
            return Ok(evicted);
        }

        // Oldest access first; book id keeps equal timestamps deterministic
        entries.sort_by(|a, b| {
            a.last_accessed
                .cmp(&b.last_accessed)
                .then_with(|| a.book_id.cmp(&b.book_id))
        });

        while total > budget && !entries.is_empty() {
            let batch = self.config.eviction_batch(entries.len());
            for entry in entries.drain(..batch) {
                self.remove_both(&entry.book_id).await?;
                total -= entry.size_bytes;
                evicted.push(entry.book_id);
            }
        }

        tracing::info!(
            evicted = evicted.len(),
            remaining = entries.len(),
            total_bytes = total,
            budget,
            "Evicted least recently accessed content"
        );

        Ok(evicted)
    }
}
