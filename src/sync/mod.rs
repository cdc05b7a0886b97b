//! Replica ↔ ledger synchronisation
//!
//! # Protocol
//!
//! ```text
//! edit → RecordStore.put → push ─┬─ Accepted  → baseline := quantities
//!                                │              (tombstones are collected)
//!                                ├─ Conflict  → merge → put → push again
//!                                │              (bounded, else MergeLivelock)
//!                                └─ Transport → nothing changes, retry later
//!
//! pull(scope) → baseline := quantities for every returned record → put
//! ```

mod engine;
pub mod merge;
mod tombstone;

pub use engine::SyncEngine;
pub use merge::merge;
pub use tombstone::TombstoneCollector;

use uuid::Uuid;

use crate::ledger::Scope;
use crate::record::ProductId;

/// Per-call sync parameters, passed explicitly instead of living in
/// process-wide state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncContext {
    /// Identifies this replica in logs.
    pub device_id: Uuid,
    /// Part of the ledger pulls cover.
    pub scope: Scope,
    /// Record the user is currently editing, if any.
    pub active_id: Option<ProductId>,
}

impl SyncContext {
    pub fn new(device_id: Uuid) -> Self {
        Self {
            device_id,
            scope: Scope::All,
            active_id: None,
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_active(mut self, id: ProductId) -> Self {
        self.active_id = Some(id);
        self
    }
}

/// Observable engine state, for sync indicators.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Idle,
    Pushing { attempt: u32 },
    Conflicted,
    Merging,
    Pulling,
    Succeeded,
    Failed(String),
}

/// Summary of one push action (including conflict retries).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Ledger round trips made.
    pub attempts: u32,
    /// Records whose baseline was advanced.
    pub accepted: usize,
    /// Tombstones removed after acknowledgement.
    pub collected: usize,
    /// Merge resolutions applied across all conflict rounds.
    pub merged: usize,
}

/// Summary of one pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Records written from the ledger snapshot.
    pub applied: usize,
    /// Local records removed because the ledger no longer holds them live.
    pub removed: usize,
    /// Local records left alone because they carry unsynchronised work.
    pub skipped: usize,
}
