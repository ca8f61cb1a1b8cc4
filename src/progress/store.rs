//! Local progress persistence
//!
//! One record per (user, book, device), stored under
//! `progress:<user>:<book>:<device>`. Writes overwrite; merging across devices
//! is left to the conflict resolver.

use std::sync::Arc;

use super::types::ProgressRecord;
use crate::error::{ReaderError, Result};
use crate::storage::KeyValueStore;

/// Repository for local progress records
#[derive(Clone)]
pub struct ProgressStore {
    store: Arc<dyn KeyValueStore>,
}

impl ProgressStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Latest local record for one device
    pub async fn get(
        &self,
        user_id: &str,
        book_id: &str,
        device_id: &str,
    ) -> Result<Option<ProgressRecord>> {
        let key = progress_key(user_id, book_id, device_id);
        self.store
            .get(&key)
            .await?
            .map(|value| serde_json::from_str(&value).map_err(ReaderError::from))
            .transpose()
    }

    /// Overwrite the record for its (user, book, device)
    pub async fn set(&self, record: &ProgressRecord) -> Result<()> {
        record.validate()?;

        let key = progress_key(&record.user_id, &record.book_id, &record.device_id);
        self.store.put(&key, &serde_json::to_string(record)?).await?;

        tracing::debug!(
            user_id = %record.user_id,
            book_id = %record.book_id,
            device_id = %record.device_id,
            position = record.current_position,
            "Saved local progress"
        );

        Ok(())
    }

    /// Every locally known device record for a user and book
    pub async fn list_for_book(&self, user_id: &str, book_id: &str) -> Result<Vec<ProgressRecord>> {
        let prefix = format!("progress:{}:{}:", escape(user_id), escape(book_id));

        self.store
            .list_all(&prefix)
            .await?
            .into_iter()
            .map(|(_, value)| serde_json::from_str(&value).map_err(ReaderError::from))
            .collect()
    }
}

fn progress_key(user_id: &str, book_id: &str, device_id: &str) -> String {
    format!(
        "progress:{}:{}:{}",
        escape(user_id),
        escape(book_id),
        escape(device_id)
    )
}

/// Keep ':' inside ids from colliding with the key separator
fn escape(part: &str) -> String {
    part.replace('%', "%25").replace(':', "%3A")
}
