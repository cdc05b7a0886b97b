use thiserror::Error;

use crate::ledger::LedgerError;
use crate::record::ProductId;
use crate::store::StoreError;

/// Input rejected before it reaches the record store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Product id must be exactly 13 digits, got {0:?}")]
    InvalidProductId(String),

    #[error("Product name must not be empty")]
    EmptyName,

    #[error("Maker code must contain digits only, got {0:?}")]
    InvalidMakerCode(String),

    #[error("Unknown product {0}")]
    UnknownProduct(ProductId),
}

/// Errors surfaced to callers of the inventory and sync layers.
///
/// Conflicts are not represented here: the sync engine resolves them
/// internally and only reports [`StockError::MergeLivelock`] when
/// resolution fails to converge.
#[derive(Error, Debug)]
pub enum StockError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Conflict resolution did not converge after {attempts} attempts for {ids:?}")]
    MergeLivelock { ids: Vec<ProductId>, attempts: u32 },

    #[error("Storage failure: {0}")]
    Storage(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<LedgerError> for StockError {
    fn from(err: LedgerError) -> Self {
        StockError::TransportFailure(err.to_string())
    }
}

impl StockError {
    /// Whether the next sync trigger may simply retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StockError::TransportFailure(_))
    }
}
