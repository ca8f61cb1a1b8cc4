//! Error types for the offline reader

use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, ReaderError>;

/// Offline reader error type
#[derive(Error, Debug)]
pub enum ReaderError {
    /// A single content payload is bigger than the whole cache budget
    #[error("Record too large: {book_id} is {size} bytes, cache budget is {budget} bytes")]
    RecordTooLarge {
        book_id: String,
        size: u64,
        budget: u64,
    },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Transient; the scheduler retries on its next tick
    #[error("Remote sync failed: {0}")]
    RemoteSyncFailed(String),

    #[error("Cannot resolve progress from an empty candidate set")]
    EmptyCandidateSet,

    #[error("Invalid progress: position {position} exceeds total {total}")]
    InvalidPosition { position: u32, total: u32 },
}

impl From<sqlx::Error> for ReaderError {
    fn from(e: sqlx::Error) -> Self {
        ReaderError::StorageUnavailable(format!("database error: {}", e))
    }
}

impl From<serde_json::Error> for ReaderError {
    fn from(e: serde_json::Error) -> Self {
        ReaderError::StorageUnavailable(format!("corrupt stored record: {}", e))
    }
}

impl From<reqwest::Error> for ReaderError {
    fn from(e: reqwest::Error) -> Self {
        ReaderError::RemoteSyncFailed(e.to_string())
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}
