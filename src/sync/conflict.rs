//! Conflict resolution between device progress records
//!
//! Last write wins: the candidate with the latest `last_synced_at` is canonical.
//! Equal timestamps go to the further position, then to the greater device id.
//! Copies of one device's record that still tie (the local and the remote copy)
//! are ordered by their remaining fields, so the outcome never depends on
//! candidate order.

use std::cmp::Ordering;

use crate::error::{ReaderError, Result};
use crate::progress::ProgressRecord;

/// Pick the canonical record among candidates for the same user and book
pub fn resolve(candidates: &[ProgressRecord]) -> Result<ProgressRecord> {
    candidates
        .iter()
        .max_by(|a, b| compare(a, b))
        .cloned()
        .ok_or(ReaderError::EmptyCandidateSet)
}

/// Total order used by [`resolve`]; `Greater` means `a` wins
pub fn compare(a: &ProgressRecord, b: &ProgressRecord) -> Ordering {
    a.last_synced_at
        .cmp(&b.last_synced_at)
        .then_with(|| a.current_position.cmp(&b.current_position))
        .then_with(|| a.device_id.cmp(&b.device_id))
        .then_with(|| a.total_extent.cmp(&b.total_extent))
        .then_with(|| a.chapter_id.cmp(&b.chapter_id))
        .then_with(|| match (a.scroll_offset, b.scroll_offset) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (x, y) => x.is_some().cmp(&y.is_some()),
        })
}
