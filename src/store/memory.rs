use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{RecordStore, StoreError};
use crate::record::{ProductId, StockRecord};

/// Volatile store used by tests, simulations and short-lived tools.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<ProductId, StockRecord>>,
    unavailable: AtomicBool,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backing store going away (every call fails until reset).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store disabled".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(&self, id: &ProductId) -> Result<Option<StockRecord>, StoreError> {
        self.check()?;
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<StockRecord>, StoreError> {
        self.check()?;
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn put(&self, record: StockRecord) -> Result<(), StoreError> {
        self.check()?;
        self.records.write().await.insert(record.id.clone(), record);
        Ok(())
    }

    async fn delete(&self, id: &ProductId) -> Result<(), StoreError> {
        self.check()?;
        self.records.write().await.remove(id);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.check()?;
        self.records.write().await.clear();
        Ok(())
    }
}
