//! Garbage collection of acknowledged deletions

use std::sync::Arc;

use crate::record::StockRecord;
use crate::store::{RecordStore, StoreError};

/// Hard-deletes tombstones once the ledger has acknowledged them.
#[derive(Clone)]
pub struct TombstoneCollector {
    store: Arc<dyn RecordStore>,
}

impl TombstoneCollector {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Remove the local tombstone for an accepted `pushed` deletion.
    ///
    /// Only the exact version that was pushed is removed: if the record was
    /// edited (and so revived) while the push was in flight it is kept, and
    /// `false` is returned so the caller can acknowledge it normally.
    pub async fn collect(&self, pushed: &StockRecord) -> Result<bool, StoreError> {
        match self.store.get(&pushed.id).await? {
            None => Ok(true),
            Some(current) if current.deleted && current.updated_at == pushed.updated_at => {
                self.store.delete(&pushed.id).await?;
                log::debug!("Collected tombstone for {}", pushed.id);
                Ok(true)
            }
            Some(_) => {
                log::debug!(
                    "Tombstone for {} changed during push, keeping it",
                    pushed.id
                );
                Ok(false)
            }
        }
    }
}
