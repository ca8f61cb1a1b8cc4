//! Sync module for multi-device reading progress
//!
//! Provides:
//! - Last-write-wins conflict resolution across device records
//! - Remote progress service clients
//! - Periodic local-first auto sync
//!
//! # Sync Protocol
//!
//! 1. Every tick, the reader's position is saved to the local progress store
//! 2. The same record is pushed to the remote service, at most one push at a time
//! 3. When resuming, local and remote device records are gathered
//! 4. The conflict resolver picks the canonical record among them
//!
//! # Conflict Resolution
//!
//! - Most recent `last_synced_at` wins
//! - Equal timestamps: further position wins, then greater device id

pub mod conflict;
mod remote;
mod scheduler;

pub use conflict::resolve;
pub use remote::{HttpProgressService, MemoryProgressService, RemoteProgressService};
pub use scheduler::{ProgressAccessor, SyncConfig, SyncScheduler, DEFAULT_SYNC_INTERVAL};
