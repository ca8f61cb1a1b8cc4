//! Remote progress service clients
//!
//! Defines the trait the scheduler pushes through and two implementations:
//! an HTTP client for the hosted progress API and an in-process service used
//! when no API is configured.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tokio::sync::RwLock;

use crate::error::{ReaderError, Result};
use crate::progress::ProgressRecord;

/// Remote authority for cross-device progress
#[async_trait]
pub trait RemoteProgressService: Send + Sync {
    /// Insert or replace the record for its (user, book, device)
    async fn upsert(&self, record: &ProgressRecord) -> Result<()>;

    /// Every device's record for a user and book
    async fn fetch_all(&self, user_id: &str, book_id: &str) -> Result<Vec<ProgressRecord>>;
}

/// Client for the hosted progress API
///
/// - `PUT  {base}/api/v1/progress/{user}/{book}/{device}` upserts one record
/// - `GET  {base}/api/v1/progress/{user}/{book}` lists all device records
pub struct HttpProgressService {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpProgressService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            ReaderError::RemoteSyncFailed(format!("Invalid progress API url {}: {}", base_url, e))
        })?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ReaderError::RemoteSyncFailed(format!(
                    "Progress API url cannot be a base: {}",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(["api", "v1", "progress"])
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl RemoteProgressService for HttpProgressService {
    async fn upsert(&self, record: &ProgressRecord) -> Result<()> {
        let url = self.endpoint(&[
            record.user_id.as_str(),
            record.book_id.as_str(),
            record.device_id.as_str(),
        ])?;

        let response = self.client.put(url).json(record).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ReaderError::RemoteSyncFailed(format!(
                "Progress API returned {}: {}",
                status, body
            )));
        }

        Ok(())
    }

    async fn fetch_all(&self, user_id: &str, book_id: &str) -> Result<Vec<ProgressRecord>> {
        let url = self.endpoint(&[user_id, book_id])?;

        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ReaderError::RemoteSyncFailed(format!(
                "Progress API returned {}: {}",
                status, body
            )));
        }

        Ok(response.json().await?)
    }
}

type DeviceKey = (String, String, String);

/// In-process progress service
///
/// Keeps the latest record per device in memory. Latency and outages can be
/// simulated, which the scheduler tests rely on.
#[derive(Clone, Default)]
pub struct MemoryProgressService {
    records: Arc<RwLock<HashMap<DeviceKey, ProgressRecord>>>,
    upserts: Arc<AtomicUsize>,
    active_upserts: Arc<AtomicUsize>,
    peak_upserts: Arc<AtomicUsize>,
    offline: Arc<AtomicBool>,
    latency: Option<Duration>,
}

impl MemoryProgressService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make subsequent calls fail with `RemoteSyncFailed`
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of upsert calls received, including failed ones
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    /// Most upserts ever running at the same time
    pub fn peak_concurrent_upserts(&self) -> usize {
        self.peak_upserts.load(Ordering::SeqCst)
    }

    async fn simulate(&self) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(ReaderError::RemoteSyncFailed("remote unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteProgressService for MemoryProgressService {
    async fn upsert(&self, record: &ProgressRecord) -> Result<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let active = self.active_upserts.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_upserts.fetch_max(active, Ordering::SeqCst);

        let outcome = self.simulate().await;
        self.active_upserts.fetch_sub(1, Ordering::SeqCst);
        outcome?;

        let key = (
            record.user_id.clone(),
            record.book_id.clone(),
            record.device_id.clone(),
        );
        self.records.write().await.insert(key, record.clone());
        Ok(())
    }

    async fn fetch_all(&self, user_id: &str, book_id: &str) -> Result<Vec<ProgressRecord>> {
        self.simulate().await?;

        let records = self.records.read().await;
        let mut matching: Vec<ProgressRecord> = records
            .values()
            .filter(|r| r.is_for(user_id, book_id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(matching)
    }
}
