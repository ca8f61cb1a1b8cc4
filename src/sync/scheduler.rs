//! Periodic progress sync
//!
//! Each tick reads the reader's current position, saves it locally, then pushes
//! it to the remote service. The push runs as its own task so the timer keeps
//! its cadence; while a push is outstanding, further ticks are skipped entirely
//! so remote writes can never arrive out of order.
//!
//! The outstanding push is tracked by a lock owned by the scheduler rather than
//! by a session, so a push that outlives `stop` still holds off the ticks of the
//! next session, and `sync_now` queues behind it.
//!
//! A failed push is only logged. The next tick pushes a fresher record anyway.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

use super::remote::RemoteProgressService;
use crate::error::Result;
use crate::progress::{ProgressRecord, ProgressStore};

/// Default sync cadence: 30 seconds
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Caller-supplied snapshot of the current reading position
pub type ProgressAccessor = Box<dyn Fn() -> ProgressRecord + Send + Sync>;

/// Sync configuration options
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Time between ticks
    pub interval: Duration,
    /// Identifies this device's records
    pub device_id: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SYNC_INTERVAL,
            device_id: Uuid::new_v4().to_string(),
        }
    }
}

struct ActiveSession {
    user_id: String,
    book_id: String,
    handle: JoinHandle<()>,
}

/// Drives auto-sync for one reading session at a time
pub struct SyncScheduler {
    store: ProgressStore,
    remote: Arc<dyn RemoteProgressService>,
    interval: Duration,
    session: Mutex<Option<ActiveSession>>,
    /// Held for the whole of every remote push
    push_lock: Arc<AsyncMutex<()>>,
}

impl SyncScheduler {
    /// A zero `interval` falls back to [`DEFAULT_SYNC_INTERVAL`]
    pub fn new(
        store: ProgressStore,
        remote: Arc<dyn RemoteProgressService>,
        interval: Duration,
    ) -> Self {
        let interval = if interval.is_zero() {
            tracing::warn!("Zero sync interval, using the default");
            DEFAULT_SYNC_INTERVAL
        } else {
            interval
        };

        Self {
            store,
            remote,
            interval,
            session: Mutex::new(None),
            push_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Begin syncing `accessor`'s position every interval
    ///
    /// The first tick fires one interval from now. Any running session is
    /// stopped first. Must be called from within a tokio runtime.
    pub fn start<F>(&self, user_id: &str, book_id: &str, accessor: F)
    where
        F: Fn() -> ProgressRecord + Send + Sync + 'static,
    {
        let ctx = TickContext {
            store: self.store.clone(),
            remote: self.remote.clone(),
            push_lock: self.push_lock.clone(),
            user_id: user_id.to_string(),
            book_id: book_id.to_string(),
            accessor: Box::new(accessor),
        };
        let period = self.interval;

        let mut slot = self.session.lock();
        if let Some(previous) = slot.take() {
            previous.handle.abort();
            tracing::debug!(
                user_id = %previous.user_id,
                book_id = %previous.book_id,
                "Replaced running auto sync"
            );
        }

        let handle = tokio::spawn(run_session(ctx, period));
        *slot = Some(ActiveSession {
            user_id: user_id.to_string(),
            book_id: book_id.to_string(),
            handle,
        });

        tracing::info!(
            user_id = %user_id,
            book_id = %book_id,
            interval_secs = period.as_secs(),
            "Started auto sync"
        );
    }

    /// Cancel the timer; a no-op when nothing is running
    ///
    /// A push already in flight is left to finish, and the next session's ticks
    /// skip until it does.
    pub fn stop(&self) {
        if let Some(session) = self.session.lock().take() {
            session.handle.abort();
            tracing::info!(
                user_id = %session.user_id,
                book_id = %session.book_id,
                "Stopped auto sync"
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }

    /// One-shot sync of an explicit position change
    ///
    /// Saves locally (errors propagate), then pushes once any push already in
    /// flight has finished. Returns whether the push reached the remote service.
    pub async fn sync_now(&self, mut record: ProgressRecord) -> Result<bool> {
        record.last_synced_at = Utc::now();
        self.store.set(&record).await?;

        let _pushing = self.push_lock.lock().await;
        Ok(push(self.remote.as_ref(), &record).await)
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

struct TickContext {
    store: ProgressStore,
    remote: Arc<dyn RemoteProgressService>,
    push_lock: Arc<AsyncMutex<()>>,
    user_id: String,
    book_id: String,
    accessor: ProgressAccessor,
}

impl TickContext {
    /// Snapshot the position, stamped with the tick time
    fn capture(&self) -> Option<ProgressRecord> {
        let mut record = (self.accessor)();

        if !record.is_for(&self.user_id, &self.book_id) {
            tracing::warn!(
                expected_user = %self.user_id,
                expected_book = %self.book_id,
                user_id = %record.user_id,
                book_id = %record.book_id,
                "Accessor returned progress for another session, skipping tick"
            );
            return None;
        }

        record.last_synced_at = Utc::now();
        Some(record)
    }
}

async fn run_session(ctx: TickContext, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let Ok(pushing) = ctx.push_lock.clone().try_lock_owned() else {
            tracing::debug!(book_id = %ctx.book_id, "Previous push still in flight, skipping tick");
            continue;
        };

        let Some(record) = ctx.capture() else {
            continue;
        };

        // Local first: the position survives even if the push never lands
        if let Err(e) = ctx.store.set(&record).await {
            tracing::error!(book_id = %ctx.book_id, error = %e, "Failed to save progress locally");
            continue;
        }

        let remote = ctx.remote.clone();
        tokio::spawn(async move {
            let _pushing = pushing;
            push(remote.as_ref(), &record).await
        });
    }
}

async fn push(remote: &dyn RemoteProgressService, record: &ProgressRecord) -> bool {
    match remote.upsert(record).await {
        Ok(()) => {
            tracing::debug!(
                book_id = %record.book_id,
                device_id = %record.device_id,
                position = record.current_position,
                "Pushed progress"
            );
            true
        }
        Err(e) => {
            tracing::warn!(
                book_id = %record.book_id,
                error = %e,
                "Progress push failed, retrying next tick"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    use super::*;
    use crate::storage::MemoryStore;
    use crate::sync::remote::MemoryProgressService;

    const TICK: Duration = Duration::from_secs(30);

    fn make_store() -> ProgressStore {
        ProgressStore::new(Arc::new(MemoryStore::new()))
    }

    fn make_scheduler(store: &ProgressStore, remote: &MemoryProgressService) -> SyncScheduler {
        SyncScheduler::new(store.clone(), Arc::new(remote.clone()), TICK)
    }

    /// Accessor that advances one page per call and counts its invocations
    fn counting_accessor(calls: Arc<AtomicUsize>) -> impl Fn() -> ProgressRecord + Send + Sync {
        let page = AtomicU32::new(0);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            let position = page.fetch_add(1, Ordering::SeqCst) + 1;
            ProgressRecord::new("user-1", "book-1", "device-1", position, 500).unwrap()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_waits_one_interval() {
        let store = make_store();
        let remote = MemoryProgressService::new();
        let scheduler = make_scheduler(&store, &remote);
        let calls = Arc::new(AtomicUsize::new(0));

        scheduler.start("user-1", "book-1", counting_accessor(calls.clone()));

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(remote.upsert_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_tick_writes_locally_and_pushes() {
        let store = make_store();
        let remote = MemoryProgressService::new();
        let scheduler = make_scheduler(&store, &remote);
        let calls = Arc::new(AtomicUsize::new(0));

        scheduler.start("user-1", "book-1", counting_accessor(calls.clone()));
        tokio::time::sleep(Duration::from_secs(95)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(remote.upsert_count(), 3);

        let local = store.get("user-1", "book-1", "device-1").await.unwrap().unwrap();
        assert_eq!(local.current_position, 3);
        let remote_records = remote.fetch_all("user-1", "book-1").await.unwrap();
        assert_eq!(remote_records, vec![local]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_push_skips_overlapping_ticks() {
        let store = make_store();
        let remote = MemoryProgressService::new().with_latency(Duration::from_secs(45));
        let scheduler = make_scheduler(&store, &remote);
        let calls = Arc::new(AtomicUsize::new(0));

        scheduler.start("user-1", "book-1", counting_accessor(calls.clone()));

        // Ticks at 30..=180 (six firings). Pushes start at 30, 90 and 150 and
        // each runs 45s, so the ticks at 60, 120 and 180 find one in flight.
        tokio::time::sleep(Duration::from_secs(185)).await;

        assert_eq!(remote.upsert_count(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let local = store.get("user-1", "book-1", "device-1").await.unwrap().unwrap();
        assert_eq!(local.current_position, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_write_lands_before_slow_push_completes() {
        let store = make_store();
        let remote = MemoryProgressService::new().with_latency(Duration::from_secs(20));
        let scheduler = make_scheduler(&store, &remote);

        scheduler.start("user-1", "book-1", counting_accessor(Arc::new(AtomicUsize::new(0))));
        tokio::time::sleep(Duration::from_secs(31)).await;

        // The push started at 30 and is still sleeping until 50
        assert!(store.get("user-1", "book-1", "device-1").await.unwrap().is_some());
        assert_eq!(remote.upsert_count(), 1);
        assert!(scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_push_is_retried_next_tick() {
        let store = make_store();
        let remote = MemoryProgressService::new();
        remote.set_offline(true);
        let scheduler = make_scheduler(&store, &remote);

        scheduler.start("user-1", "book-1", counting_accessor(Arc::new(AtomicUsize::new(0))));
        tokio::time::sleep(Duration::from_secs(65)).await;

        assert_eq!(remote.upsert_count(), 2);
        assert!(scheduler.is_running());
        let local = store.get("user-1", "book-1", "device-1").await.unwrap().unwrap();
        assert_eq!(local.current_position, 2);

        remote.set_offline(false);
        tokio::time::sleep(Duration::from_secs(30)).await;
        let pushed = remote.fetch_all("user-1", "book-1").await.unwrap();
        assert_eq!(pushed[0].current_position, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_cancels_ticks() {
        let store = make_store();
        let remote = MemoryProgressService::new();
        let scheduler = make_scheduler(&store, &remote);

        // Never started
        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());

        scheduler.start("user-1", "book-1", counting_accessor(Arc::new(AtomicUsize::new(0))));
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(scheduler.is_running());

        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(remote.upsert_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_previous_session() {
        let store = make_store();
        let remote = MemoryProgressService::new();
        let scheduler = make_scheduler(&store, &remote);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        scheduler.start("user-1", "book-1", counting_accessor(first.clone()));
        scheduler.start("user-1", "book-1", counting_accessor(second.clone()));
        tokio::time::sleep(Duration::from_secs(65)).await;

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatched_accessor_record_is_not_written() {
        let store = make_store();
        let remote = MemoryProgressService::new();
        let scheduler = make_scheduler(&store, &remote);

        scheduler.start("user-1", "book-2", || {
            ProgressRecord::new("user-1", "book-1", "device-1", 1, 10).unwrap()
        });
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert!(store.list_for_book("user-1", "book-1").await.unwrap().is_empty());
        assert_eq!(remote.upsert_count(), 0);
    }

    #[tokio::test]
    async fn test_sync_now_reports_push_outcome() {
        let store = make_store();
        let remote = MemoryProgressService::new();
        let scheduler = make_scheduler(&store, &remote);
        let record = ProgressRecord::new("user-1", "book-1", "device-1", 7, 10).unwrap();

        assert!(scheduler.sync_now(record.clone()).await.unwrap());

        remote.set_offline(true);
        let mut later = record.clone();
        later.current_position = 8;
        assert!(!scheduler.sync_now(later).await.unwrap());

        // The local write still happened
        let local = store.get("user-1", "book-1", "device-1").await.unwrap().unwrap();
        assert_eq!(local.current_position, 8);
    }

    fn fixed_accessor(position: u32) -> impl Fn() -> ProgressRecord + Send + Sync {
        move || ProgressRecord::new("user-1", "book-1", "device-1", position, 500).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_waits_for_previous_session_push() {
        let store = make_store();
        let remote = MemoryProgressService::new().with_latency(Duration::from_secs(45));
        let scheduler = make_scheduler(&store, &remote);

        scheduler.start("user-1", "book-1", fixed_accessor(10));
        tokio::time::sleep(Duration::from_secs(31)).await;
        scheduler.stop();

        // The push from 30 runs until 75. The new session ticks at 61 (skipped),
        // 91 (pushes until 136) and 121 (skipped).
        scheduler.start("user-1", "book-1", fixed_accessor(20));
        tokio::time::sleep(Duration::from_secs(109)).await;
        scheduler.stop();

        assert_eq!(remote.upsert_count(), 2);
        assert_eq!(remote.peak_concurrent_upserts(), 1);
        let pushed = remote.fetch_all("user-1", "book-1").await.unwrap();
        assert_eq!(pushed[0].current_position, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_now_queues_behind_push_in_flight() {
        let store = make_store();
        let remote = MemoryProgressService::new().with_latency(Duration::from_secs(45));
        let scheduler = make_scheduler(&store, &remote);

        scheduler.start("user-1", "book-1", fixed_accessor(10));
        tokio::time::sleep(Duration::from_secs(31)).await;
        scheduler.stop();

        let started = Instant::now();
        let record = ProgressRecord::new("user-1", "book-1", "device-1", 30, 500).unwrap();
        assert!(scheduler.sync_now(record).await.unwrap());

        // Waited for the push ending at 75, then ran its own 45s push
        assert!(started.elapsed() >= Duration::from_secs(89));
        assert_eq!(remote.peak_concurrent_upserts(), 1);
        let pushed = remote.fetch_all("user-1", "book-1").await.unwrap();
        assert_eq!(pushed[0].current_position, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_uses_default() {
        let store = make_store();
        let remote = MemoryProgressService::new();
        let scheduler = SyncScheduler::new(store.clone(), Arc::new(remote.clone()), Duration::ZERO);
        assert_eq!(scheduler.interval(), DEFAULT_SYNC_INTERVAL);

        scheduler.start("user-1", "book-1", fixed_accessor(1));
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(remote.upsert_count(), 1);
        assert!(scheduler.is_running());
    }
}
