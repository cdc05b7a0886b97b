//! In-process reference ledger
//!
//! Implements the ledger side of the protocol so several replicas can be
//! reconciled inside one process: the `updated_at` comparison and the write
//! happen under one lock, and tombstones are kept as explicit records.
//! Used for integration testing and as the backing state of test servers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::wire::LedgerRecord;
use super::{LedgerClient, LedgerError, PushResult, Scope};
use crate::record::{ProductId, StockRecord};

/// Shared ledger state with simple fault injection.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    records: Mutex<HashMap<ProductId, LedgerRecord>>,
    offline: AtomicBool,
    failures_remaining: AtomicU32,
    pushes: AtomicU64,
}

impl InMemoryLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// While offline every call fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `n` calls, then recover.
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Number of push requests that reached the ledger.
    pub fn push_count(&self) -> u64 {
        self.pushes.load(Ordering::SeqCst)
    }

    /// Write directly, bypassing the conflict check (an out-of-band edit).
    pub async fn seed(&self, record: LedgerRecord) {
        self.records.lock().await.insert(record.id.clone(), record);
    }

    pub async fn get(&self, id: &ProductId) -> Option<LedgerRecord> {
        self.records.lock().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::Transport("ledger offline".into()));
        }
        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(LedgerError::Transport("injected failure".into()));
        }
        Ok(())
    }

    /// Apply a batch against the stored state. Shared with the HTTP test server.
    pub async fn apply_push(&self, batch: Vec<LedgerRecord>) -> Result<Vec<LedgerRecord>, LedgerError> {
        self.check_available()?;
        self.pushes.fetch_add(1, Ordering::SeqCst);

        let mut records = self.records.lock().await;
        let conflicts: Vec<LedgerRecord> = batch
            .iter()
            .filter_map(|incoming| {
                records
                    .get(&incoming.id)
                    .filter(|stored| stored.updated_at > incoming.updated_at)
                    .cloned()
            })
            .collect();

        if conflicts.is_empty() {
            for incoming in batch {
                records.insert(incoming.id.clone(), incoming);
            }
        }
        Ok(conflicts)
    }

    /// Snapshot for a scope. Records always travel whole; a location scope
    /// only tells the replica which counter to adopt.
    pub async fn snapshot(&self, _scope: Scope) -> Result<Vec<LedgerRecord>, LedgerError> {
        self.check_available()?;
        let records = self.records.lock().await;
        let mut snapshot: Vec<LedgerRecord> = records.values().cloned().collect();
        snapshot.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(snapshot)
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn push(&self, records: &[StockRecord]) -> Result<PushResult, LedgerError> {
        let batch = records.iter().map(LedgerRecord::from).collect();
        let conflicts = self.apply_push(batch).await?;
        if conflicts.is_empty() {
            Ok(PushResult::Accepted)
        } else {
            Ok(PushResult::Conflict(
                conflicts.into_iter().map(LedgerRecord::into_record).collect(),
            ))
        }
    }

    async fn pull(&self, scope: Scope) -> Result<Vec<StockRecord>, LedgerError> {
        let snapshot = self.snapshot(scope).await?;
        Ok(snapshot.into_iter().map(LedgerRecord::into_record).collect())
    }
}
