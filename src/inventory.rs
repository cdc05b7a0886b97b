//! Local editing of stock records
//!
//! All user-driven mutations go through [`Inventory`]: it validates input
//! before anything touches the store, stamps `updated_at`, and never writes
//! the synced baseline. Pushing the result is left to the caller.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{StockError, ValidationError};
use crate::record::{Clock, Location, ProductId, Quantities, StockRecord};
use crate::store::views::{self, SortMode};
use crate::store::RecordStore;

/// Form contents for creating or overwriting a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordDraft {
    /// Raw product code as typed or scanned.
    pub id: String,
    pub name: String,
    pub maker_code: String,
    pub quantities: Quantities,
}

impl RecordDraft {
    /// Validate and normalise. Nothing is written.
    pub fn validate(&self) -> Result<(ProductId, String, String), ValidationError> {
        let id = ProductId::parse(&self.id)?;
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        let maker_code = self.maker_code.trim();
        if !maker_code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError::InvalidMakerCode(self.maker_code.clone()));
        }
        Ok((id, name.to_string(), maker_code.to_string()))
    }
}

pub struct Inventory {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
}

impl Inventory {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Look up a live record by a raw code.
    pub async fn lookup(&self, raw_id: &str) -> Result<Option<StockRecord>, StockError> {
        let id = ProductId::parse(raw_id)?;
        Ok(self.store.get(&id).await?.filter(StockRecord::is_live))
    }

    /// Create a record or overwrite an existing one's metadata and counts.
    ///
    /// Saving over a tombstone revives it. The baseline of an existing record
    /// is kept so the edit becomes an ordinary delta.
    pub async fn save(&self, draft: &RecordDraft) -> Result<StockRecord, StockError> {
        let (id, name, maker_code) = draft.validate()?;

        let record = match self.store.get(&id).await? {
            Some(mut existing) => {
                let now = self.stamp_after(&existing);
                existing.name = name;
                existing.maker_code = maker_code;
                existing.quantities = draft.quantities;
                existing.touch(now);
                existing
            }
            None => {
                let mut created = StockRecord::new(id, name, maker_code, self.clock.now());
                created.quantities = draft.quantities;
                created
            }
        };

        self.store.put(record.clone()).await?;
        log::debug!("Saved {}", record.id);
        Ok(record)
    }

    /// Add `delta` to one location, clamping at zero.
    pub async fn adjust(
        &self,
        id: &ProductId,
        location: Location,
        delta: i64,
    ) -> Result<StockRecord, StockError> {
        self.mutate(id, |record| record.quantities.adjust(location, delta))
            .await
    }

    /// Overwrite one location's count, clamping negatives to zero.
    pub async fn set_quantity(
        &self,
        id: &ProductId,
        location: Location,
        value: i64,
    ) -> Result<StockRecord, StockError> {
        self.mutate(id, |record| record.quantities.set_clamped(location, value))
            .await
    }

    /// Soft-delete: the record becomes a tombstone until the ledger
    /// acknowledges the deletion.
    pub async fn delete(&self, id: &ProductId) -> Result<StockRecord, StockError> {
        let mut record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| ValidationError::UnknownProduct(id.clone()))?;
        record.mark_deleted(self.stamp_after(&record));
        self.store.put(record.clone()).await?;
        log::debug!("Marked {} deleted", id);
        Ok(record)
    }

    /// A stamp later than any this record already carries, even if the
    /// clock has stepped back since it was last written.
    fn stamp_after(&self, record: &StockRecord) -> DateTime<Utc> {
        let floor = match record.synced_at {
            Some(synced) => synced.max(record.updated_at),
            None => record.updated_at,
        };
        self.clock.now_after(floor)
    }

    async fn mutate(
        &self,
        id: &ProductId,
        edit: impl FnOnce(&mut StockRecord),
    ) -> Result<StockRecord, StockError> {
        let mut record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| ValidationError::UnknownProduct(id.clone()))?;
        edit(&mut record);
        record.touch(self.stamp_after(&record));
        self.store.put(record.clone()).await?;
        Ok(record)
    }

    /// Live records matching `query`, ordered by `mode`.
    pub async fn list(&self, query: &str, mode: SortMode) -> Result<Vec<StockRecord>, StockError> {
        let mut records = views::search(self.store.get_all().await?, query);
        views::sort(&mut records, mode);
        Ok(records)
    }

    /// Per-location totals over live records.
    pub async fn totals(&self) -> Result<Quantities, StockError> {
        Ok(views::totals(&self.store.get_all().await?))
    }

    /// Records waiting to be pushed.
    pub async fn pending(&self) -> Result<Vec<StockRecord>, StockError> {
        Ok(views::pending(self.store.get_all().await?))
    }
}
