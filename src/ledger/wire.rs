//! Payloads exchanged with the ledger
//!
//! The synced baseline is replica-private and never leaves the device;
//! deletions travel explicitly as `deleted: true`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Scope;
use crate::record::{ProductId, Quantities, StockRecord};

/// One record as the ledger stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub maker_code: String,
    #[serde(default)]
    pub quantities: Quantities,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
}

impl From<&StockRecord> for LedgerRecord {
    fn from(record: &StockRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            maker_code: record.maker_code.clone(),
            quantities: record.quantities,
            updated_at: record.updated_at,
            deleted: record.deleted,
        }
    }
}

impl LedgerRecord {
    /// The record as the ledger sees it: it trivially agrees with itself,
    /// so the baseline equals the quantities.
    pub fn into_record(self) -> StockRecord {
        StockRecord {
            id: self.id,
            name: self.name,
            maker_code: self.maker_code,
            quantities: self.quantities,
            synced_baseline: self.quantities,
            updated_at: self.updated_at,
            synced_at: Some(self.updated_at),
            deleted: self.deleted,
        }
    }
}

/// Request body posted to the ledger endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum LedgerRequest {
    Push { data: Vec<LedgerRecord> },
    Pull { scope: Scope },
}

/// Response body for a push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PushResponse {
    Accepted,
    Conflict { records: Vec<LedgerRecord> },
}
