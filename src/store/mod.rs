//! Local replica storage
//!
//! A `RecordStore` is the device's private, durable copy of the inventory.
//! Each call is atomic on its own; there is no transaction spanning calls,
//! and the sync protocol never relies on one.

mod json_file;
mod memory;
pub mod views;

pub use json_file::JsonFileRecordStore;
pub use memory::InMemoryRecordStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::record::{ProductId, StockRecord};

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Keyed, durable map from product id to record.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch a single record, tombstones included.
    async fn get(&self, id: &ProductId) -> Result<Option<StockRecord>, StoreError>;

    /// Every stored record, tombstones included. Order is unspecified.
    async fn get_all(&self) -> Result<Vec<StockRecord>, StoreError>;

    /// Insert or fully overwrite the record with the same id.
    async fn put(&self, record: StockRecord) -> Result<(), StoreError>;

    /// Physically remove a record. Removing an absent id is not an error.
    async fn delete(&self, id: &ProductId) -> Result<(), StoreError>;

    /// Remove every record.
    async fn clear(&self) -> Result<(), StoreError>;
}
