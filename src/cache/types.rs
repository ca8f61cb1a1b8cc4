//! Offline content types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default cache budget: 500MB
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 500 * 1024 * 1024;

/// Default fraction of entries removed per eviction pass
pub const DEFAULT_EVICTION_FRACTION: f64 = 0.25;

/// A downloaded book held for offline reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineContentRecord {
    pub book_id: String,
    pub title: String,
    pub author: String,
    /// Opaque book payload
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    pub downloaded_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub size_bytes: u64,
}

impl OfflineContentRecord {
    /// Build a record from a download payload, stamped with the current time
    ///
    /// The size is the length of the payload's JSON form, which is what the
    /// download actually occupies.
    pub fn from_payload(book_id: &str, payload: BookPayload) -> Self {
        let size_bytes = payload.serialized_len();
        let now = Utc::now();

        Self {
            book_id: book_id.to_string(),
            title: payload.title,
            author: payload.author,
            content: payload.content,
            cover_url: payload.cover_url,
            downloaded_at: now,
            last_accessed: now,
            size_bytes,
        }
    }
}

/// Bookkeeping kept beside each record so eviction never reads book content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub book_id: String,
    pub size_bytes: u64,
    pub last_accessed: DateTime<Utc>,
}

impl From<&OfflineContentRecord> for CacheEntry {
    fn from(record: &OfflineContentRecord) -> Self {
        Self {
            book_id: record.book_id.clone(),
            size_bytes: record.size_bytes,
            last_accessed: record.last_accessed,
        }
    }
}

/// Book data handed over by the content acquisition layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookPayload {
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, alias = "cover_url")]
    pub cover_url: Option<String>,
}

impl BookPayload {
    fn serialized_len(&self) -> u64 {
        serde_json::to_vec(self)
            .map(|bytes| bytes.len() as u64)
            .unwrap_or(self.content.len() as u64)
    }
}

/// Cache configuration options
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Total byte budget across all records
    pub max_size_bytes: u64,
    /// Share of entries dropped per eviction pass, in (0, 1]
    pub eviction_fraction: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_CACHE_SIZE,
            eviction_fraction: DEFAULT_EVICTION_FRACTION,
        }
    }
}

impl CacheConfig {
    /// Number of records one eviction pass removes out of `count`
    pub fn eviction_batch(&self, count: usize) -> usize {
        let fraction = if self.eviction_fraction.is_finite() && self.eviction_fraction > 0.0 {
            self.eviction_fraction.min(1.0)
        } else {
            DEFAULT_EVICTION_FRACTION
        };

        ((count as f64 * fraction).ceil() as usize).clamp(1, count.max(1))
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub records: usize,
    pub used_bytes: u64,
    pub budget_bytes: u64,
}

impl CacheStats {
    /// Fraction of the budget in use
    pub fn usage(&self) -> f64 {
        if self.budget_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.budget_bytes as f64
    }
}

/// Human-readable byte count
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
