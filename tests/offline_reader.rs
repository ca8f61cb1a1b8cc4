//! End-to-end behaviour of the offline reader over a SQLite store

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use sqlx::sqlite::SqlitePoolOptions;

use libros_offline::storage::{KeyValueStore, MemoryStore, SqliteStore};
use libros_offline::sync::{self, MemoryProgressService};
use libros_offline::{
    BookPayload, CacheConfig, ContentCache, OfflineContentRecord, OfflineReader, ProgressRecord,
    RemoteProgressService, SyncConfig,
};

async fn sqlite_store() -> Arc<dyn KeyValueStore> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = SqliteStore::new(pool);
    store.init().await.unwrap();
    Arc::new(store)
}

fn sync_config(device_id: &str) -> SyncConfig {
    SyncConfig {
        interval: Duration::from_secs(30),
        device_id: device_id.to_string(),
    }
}

fn content(book_id: &str, size: u64, accessed_secs: i64) -> OfflineContentRecord {
    let at = Utc.timestamp_opt(1_700_000_000 + accessed_secs, 0).unwrap();
    OfflineContentRecord {
        book_id: book_id.to_string(),
        title: book_id.to_uppercase(),
        author: "Anonymous".to_string(),
        content: String::new(),
        cover_url: None,
        downloaded_at: at,
        last_accessed: at,
        size_bytes: size,
    }
}

#[tokio::test]
async fn four_puts_over_budget_evict_exactly_the_oldest() {
    let cache = ContentCache::new(
        sqlite_store().await,
        CacheConfig {
            max_size_bytes: 1000,
            eviction_fraction: 0.25,
        },
    );

    for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
        cache.put(content(id, 300, i as i64)).await.unwrap();
    }

    let remaining: Vec<String> = cache.list().await.unwrap().into_iter().map(|r| r.book_id).collect();
    assert_eq!(remaining, vec!["b", "c", "d"]);
    assert_eq!(cache.total_size().await.unwrap(), 900);
}

#[tokio::test]
async fn oversized_download_is_rejected_on_empty_cache() {
    let reader = OfflineReader::new(
        sqlite_store().await,
        Arc::new(MemoryProgressService::new()),
        CacheConfig {
            max_size_bytes: 1000,
            eviction_fraction: 0.25,
        },
        sync_config("phone"),
    );

    let payload = BookPayload {
        title: "Big".to_string(),
        author: "Author".to_string(),
        content: "x".repeat(2000),
        cover_url: None,
    };

    assert!(!reader.download_content("big", payload).await);
    assert!(reader.list_offline_content().await.is_empty());
}

#[tokio::test]
async fn later_sync_wins_even_with_lower_position() {
    let mut device_a = ProgressRecord::new("user-1", "book-1", "device-a", 50, 100).unwrap();
    device_a.last_synced_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let mut device_b = ProgressRecord::new("user-1", "book-1", "device-b", 30, 100).unwrap();
    device_b.last_synced_at = Utc.timestamp_opt(1_700_000_060, 0).unwrap();

    let winner = sync::resolve(&[device_a.clone(), device_b.clone()]).unwrap();
    assert_eq!(winner, device_b);
    assert_eq!(sync::resolve(&[device_b.clone(), device_a]).unwrap(), device_b);
}

#[tokio::test(start_paused = true)]
async fn slow_remote_upserts_match_non_overlapping_intervals() {
    // Paused time auto-advances while sqlx waits on its worker thread, so the
    // timing test runs over the in-memory store
    let remote = MemoryProgressService::new().with_latency(Duration::from_secs(70));
    let reader = OfflineReader::new(
        Arc::new(MemoryStore::new()),
        Arc::new(remote.clone()),
        CacheConfig::default(),
        sync_config("phone"),
    );
    let reads = Arc::new(AtomicUsize::new(0));
    let counter = reads.clone();

    reader.start_auto_sync("user-1", "book-1", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        ProgressRecord::new("user-1", "book-1", "phone", 10, 100).unwrap()
    });

    // Ticks every 30s from t=30; each push takes 70s.
    // Push at 30 (done 100), skip 60 and 90, push at 120 (done 190),
    // skip 150 and 180, push at 210: 3 upserts out of 7 firings.
    tokio::time::sleep(Duration::from_secs(215)).await;
    reader.stop_auto_sync();

    assert_eq!(remote.upsert_count(), 3);
    assert_eq!(reads.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn two_devices_converge_on_the_latest_position() {
    let remote = MemoryProgressService::new();
    let phone = OfflineReader::new(
        sqlite_store().await,
        Arc::new(remote.clone()),
        CacheConfig::default(),
        sync_config("phone"),
    );
    let tablet = OfflineReader::new(
        sqlite_store().await,
        Arc::new(remote.clone()),
        CacheConfig::default(),
        sync_config("tablet"),
    );

    assert!(
        phone
            .sync_progress(ProgressRecord::new("user-1", "book-1", "phone", 80, 200).unwrap())
            .await
    );
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(
        tablet
            .sync_progress(ProgressRecord::new("user-1", "book-1", "tablet", 40, 200).unwrap())
            .await
    );

    let on_phone = phone.resolve_canonical_progress("user-1", "book-1").await.unwrap();
    let on_tablet = tablet.resolve_canonical_progress("user-1", "book-1").await.unwrap();

    assert_eq!(on_phone.device_id, "tablet");
    assert_eq!(on_phone, on_tablet);
    assert_eq!(remote.fetch_all("user-1", "book-1").await.unwrap().len(), 2);
}
