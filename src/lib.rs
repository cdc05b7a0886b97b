// Stocksync - Offline-first inventory replicas over a shared ledger

pub mod config;
pub mod error;
pub mod inventory;
pub mod ledger;
pub mod record;
pub mod scan;
pub mod store;
pub mod sync;

pub use config::SyncConfig;
pub use error::{StockError, ValidationError};
pub use inventory::{Inventory, RecordDraft};
pub use ledger::{LedgerClient, PushResult, Scope};
pub use record::{Location, ProductId, Quantities, StockRecord};
pub use store::RecordStore;
pub use sync::{SyncContext, SyncEngine, SyncState};
