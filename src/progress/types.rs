//! Reading progress types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ReaderError, Result};

/// Default reading pace used for time estimates
pub const DEFAULT_MINUTES_PER_PAGE: u32 = 2;

/// A reading position recorded by one device
///
/// Exactly one local record exists per (user, book, device). Records from
/// different devices for the same user and book are merged by the conflict
/// resolver, never in storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub book_id: String,
    pub user_id: String,
    pub device_id: String,
    /// Current page, `0..=total_extent`
    pub current_position: u32,
    pub total_extent: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_offset: Option<f64>,
    pub last_synced_at: DateTime<Utc>,
}

impl ProgressRecord {
    /// Create a validated record stamped with the current time
    pub fn new(
        user_id: &str,
        book_id: &str,
        device_id: &str,
        current_position: u32,
        total_extent: u32,
    ) -> Result<Self> {
        let record = Self {
            book_id: book_id.to_string(),
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
            current_position,
            total_extent,
            chapter_id: None,
            scroll_offset: None,
            last_synced_at: Utc::now(),
        };
        record.validate()?;
        Ok(record)
    }

    pub fn with_chapter(mut self, chapter_id: &str, scroll_offset: Option<f64>) -> Self {
        self.chapter_id = Some(chapter_id.to_string());
        self.scroll_offset = scroll_offset;
        self
    }

    /// Check `current_position <= total_extent`
    pub fn validate(&self) -> Result<()> {
        if self.current_position > self.total_extent {
            return Err(ReaderError::InvalidPosition {
                position: self.current_position,
                total: self.total_extent,
            });
        }
        Ok(())
    }

    /// Whether this record belongs to the given user and book
    pub fn is_for(&self, user_id: &str, book_id: &str) -> bool {
        self.user_id == user_id && self.book_id == book_id
    }

    /// Progress as a whole percentage, 0 for an empty book
    pub fn percent_complete(&self) -> u32 {
        if self.total_extent == 0 {
            return 0;
        }
        ((self.current_position as f64 / self.total_extent as f64) * 100.0).round() as u32
    }

    pub fn pages_remaining(&self) -> u32 {
        self.total_extent.saturating_sub(self.current_position)
    }

    pub fn estimate_minutes_remaining(&self, minutes_per_page: u32) -> u32 {
        self.pages_remaining().saturating_mul(minutes_per_page)
    }
}

/// Render a minute count as `"45 min"` or `"2h 5m"`
pub fn format_time_remaining(minutes: u32) -> String {
    if minutes < 60 {
        return format!("{} min", minutes);
    }
    format!("{}h {}m", minutes / 60, minutes % 60)
}
