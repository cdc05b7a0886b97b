//! Scanner intake
//!
//! Any number of scanners (camera decoder, keyboard wedge, stdin) hold a
//! [`ScanSender`] and emit raw code strings. A single [`ScanIntake`]
//! consumes them in arrival order, drops codes that are not product ids,
//! and resolves the rest against the local store.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::StockError;
use crate::inventory::Inventory;
use crate::record::{ProductId, StockRecord};

/// Producer handle given to a scanner.
#[derive(Debug, Clone)]
pub struct ScanSender {
    tx: mpsc::Sender<String>,
}

impl ScanSender {
    /// Emit a decoded code. Returns `false` once the intake has gone away.
    pub async fn emit(&self, code: impl Into<String>) -> bool {
        self.tx.send(code.into()).await.is_ok()
    }
}

/// Result of a scan that carried a valid product id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanLookup {
    pub id: ProductId,
    /// The live record for this id, if one exists.
    pub existing: Option<StockRecord>,
}

/// The single consumption point for scanned codes.
pub struct ScanIntake {
    rx: mpsc::Receiver<String>,
    inventory: Arc<Inventory>,
}

impl ScanIntake {
    pub fn new(inventory: Arc<Inventory>, capacity: usize) -> (Self, ScanSender) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { rx, inventory }, ScanSender { tx })
    }

    /// Wait for the next valid code and look it up.
    ///
    /// Returns `None` when every sender has been dropped.
    pub async fn next_lookup(&mut self) -> Option<Result<ScanLookup, StockError>> {
        while let Some(code) = self.rx.recv().await {
            let id = match ProductId::parse(&code) {
                Ok(id) => id,
                Err(e) => {
                    log::debug!("Ignoring scan: {}", e);
                    continue;
                }
            };
            let lookup = self
                .inventory
                .lookup(id.as_str())
                .await
                .map(|existing| ScanLookup { id, existing });
            return Some(lookup);
        }
        None
    }
}
