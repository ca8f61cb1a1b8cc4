//! Offline reader facade
//!
//! The surface exposed to the UI. Storage failures are logged and degraded to
//! `false`/`None` so callers can fall back to online reading instead of failing.

use std::sync::Arc;

use crate::cache::{BookPayload, CacheConfig, CacheStats, ContentCache, OfflineContentRecord};
use crate::error::Result;
use crate::progress::{ProgressRecord, ProgressStore};
use crate::storage::KeyValueStore;
use crate::sync::{self, RemoteProgressService, SyncConfig, SyncScheduler};

/// Offline content and progress sync for one device
pub struct OfflineReader {
    cache: ContentCache,
    progress: ProgressStore,
    scheduler: SyncScheduler,
    remote: Arc<dyn RemoteProgressService>,
    device_id: String,
}

impl OfflineReader {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteProgressService>,
        cache_config: CacheConfig,
        sync_config: SyncConfig,
    ) -> Self {
        let progress = ProgressStore::new(store.clone());
        let scheduler = SyncScheduler::new(progress.clone(), remote.clone(), sync_config.interval);

        Self {
            cache: ContentCache::new(store, cache_config),
            progress,
            scheduler,
            remote,
            device_id: sync_config.device_id,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    // ========================================================================
    // Offline content
    // ========================================================================

    /// Cache a book for offline reading
    pub async fn download_content(&self, book_id: &str, payload: BookPayload) -> bool {
        let record = OfflineContentRecord::from_payload(book_id, payload);
        let size = record.size_bytes;

        match self.cache.put(record).await {
            Ok(evicted) => {
                tracing::info!(
                    book_id = %book_id,
                    size = size,
                    evicted = evicted.len(),
                    "Downloaded book for offline reading"
                );
                true
            }
            Err(e) => {
                tracing::error!(book_id = %book_id, error = %e, "Failed to download book");
                false
            }
        }
    }

    pub async fn get_content(&self, book_id: &str) -> Option<OfflineContentRecord> {
        self.cache.get(book_id).await.unwrap_or_else(|e| {
            tracing::error!(book_id = %book_id, error = %e, "Failed to get offline book");
            None
        })
    }

    /// Presence check that does not count as an access
    pub async fn is_available_offline(&self, book_id: &str) -> bool {
        self.cache.has(book_id).await.unwrap_or_else(|e| {
            tracing::error!(book_id = %book_id, error = %e, "Failed to check offline book");
            false
        })
    }

    /// Returns whether a cached copy was removed
    pub async fn remove_content(&self, book_id: &str) -> bool {
        self.cache.delete(book_id).await.unwrap_or_else(|e| {
            tracing::error!(book_id = %book_id, error = %e, "Failed to delete offline book");
            false
        })
    }

    pub async fn list_offline_content(&self) -> Vec<OfflineContentRecord> {
        self.cache.list().await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to list offline books");
            Vec::new()
        })
    }

    pub async fn cache_stats(&self) -> Option<CacheStats> {
        self.cache
            .stats()
            .await
            .map_err(|e| tracing::error!(error = %e, "Failed to read cache stats"))
            .ok()
    }

    // ========================================================================
    // Progress sync
    // ========================================================================

    /// Start periodic sync; replaces any running session
    pub fn start_auto_sync<F>(&self, user_id: &str, book_id: &str, accessor: F)
    where
        F: Fn() -> ProgressRecord + Send + Sync + 'static,
    {
        self.scheduler.start(user_id, book_id, accessor);
    }

    /// Idempotent
    pub fn stop_auto_sync(&self) {
        self.scheduler.stop();
    }

    pub fn is_auto_syncing(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Save and push one position immediately; true when the push succeeded
    pub async fn sync_progress(&self, record: ProgressRecord) -> bool {
        self.scheduler.sync_now(record).await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to save progress");
            false
        })
    }

    /// This device's last saved position
    pub async fn local_progress(&self, user_id: &str, book_id: &str) -> Option<ProgressRecord> {
        self.progress
            .get(user_id, book_id, &self.device_id)
            .await
            .unwrap_or_else(|e| {
                tracing::error!(book_id = %book_id, error = %e, "Failed to read local progress");
                None
            })
    }

    /// Canonical resume position across every device
    ///
    /// Gathers the device records held locally and those fetched remotely. Either
    /// source may fail without failing the call; only an empty candidate set is
    /// an error.
    pub async fn resolve_canonical_progress(
        &self,
        user_id: &str,
        book_id: &str,
    ) -> Result<ProgressRecord> {
        let mut candidates = self
            .progress
            .list_for_book(user_id, book_id)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(book_id = %book_id, error = %e, "Local progress unavailable");
                Vec::new()
            });

        match self.remote.fetch_all(user_id, book_id).await {
            Ok(remote) => candidates.extend(remote),
            Err(e) => {
                tracing::warn!(book_id = %book_id, error = %e, "Remote progress unavailable, using local only");
            }
        }

        let canonical = sync::resolve(&candidates)?;

        tracing::debug!(
            book_id = %book_id,
            candidates = candidates.len(),
            device_id = %canonical.device_id,
            position = canonical.current_position,
            "Resolved canonical progress"
        );

        Ok(canonical)
    }
}
