//! Persistence abstractions for watcher state.
//!
//! Three kinds of state live under one root:
//! - Snapshots: one text blob per target, keyed by the target-name hash
//! - Events: immutable alert documents, deleted by the external sink
//! - Index: single mutable document summarizing per-target status
//!
//! ## Directory Structure
//!
//! ```text
//! state/
//! ├── index.json            # Mutable status index
//! ├── snapshots/            # Last observed canonical text per target
//! │   └── {target_hash}.txt
//! └── events/               # Append-only alert events
//!     └── {timestamp}_{target_hash}.json
//! ```

pub mod local;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ChangeEvent, WatchIndex};

// Re-export for convenience
pub use local::LocalStateStore;

/// File count and cumulative size of one state directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirStats {
    pub file_count: usize,
    pub total_size_bytes: u64,
}

/// Snapshot and event store statistics for the operational surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateStats {
    pub snapshots: DirStats,
    pub events: DirStats,
}

/// What a per-target cleanup removed.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupStats {
    pub snapshots: usize,
    pub events: usize,
    pub index_entries: usize,
}

/// Trait for watcher state backends.
///
/// All access happens from the scheduler's single execution context, so
/// implementations may use plain read-modify-write without cross-process
/// locking.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the stored snapshot for a target; `None` means first run.
    async fn load_snapshot(&self, target_hash: &str) -> Result<Option<String>>;

    /// Overwrite the stored snapshot for a target.
    async fn store_snapshot(&self, target_hash: &str, text: &str) -> Result<()>;

    /// Append an alert event. Returns the document filename.
    async fn write_event(&self, event: &ChangeEvent) -> Result<String>;

    /// Load the status index, empty if absent.
    async fn load_index(&self) -> Result<WatchIndex>;

    /// Persist the status index.
    async fn save_index(&self, index: &WatchIndex) -> Result<()>;

    /// Delete all snapshots. Returns how many were removed.
    async fn purge_snapshots(&self) -> Result<usize>;

    /// Delete all pending events. Returns how many were removed.
    async fn purge_events(&self) -> Result<usize>;

    /// Purge snapshots and events and reset the index to empty.
    async fn reset(&self) -> Result<()>;

    /// Counts and sizes for the operational surface.
    async fn stats(&self) -> Result<StateStats>;

    /// Remove all state belonging to the named targets: their snapshots,
    /// any pending events naming them, and their index entries.
    async fn cleanup_targets(&self, names: &[String]) -> Result<CleanupStats>;
}
