//! Reading progress
//!
//! Per-device reading positions and their local persistence.

mod store;
mod types;

pub use store::ProgressStore;
pub use types::{format_time_remaining, ProgressRecord, DEFAULT_MINUTES_PER_PAGE};
