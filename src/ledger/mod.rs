//! Transport to the shared authoritative ledger
//!
//! The ledger is external: any implementation must compare each submitted
//! `updated_at` against its own latest write for that id and apply the
//! batch only when none is older, atomically per id.

mod http;
mod memory;
pub mod wire;

pub use http::HttpLedgerClient;
pub use memory::InMemoryLedger;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::{Location, StockRecord};

/// Errors that leave both sides unchanged. All of them are retryable.
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("Ledger unreachable: {0}")]
    Transport(String),

    #[error("Ledger request timed out")]
    Timeout,

    #[error("Unexpected ledger response: {0}")]
    Protocol(String),
}

/// Outcome of a push that reached the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum PushResult {
    /// Every submitted record is now the ledger's authoritative value.
    Accepted,
    /// The ledger's current value for every conflicting id. Nothing was written.
    Conflict(Vec<StockRecord>),
}

/// Which part of the ledger a pull covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scope {
    #[default]
    All,
    Location(Location),
}

impl Scope {
    /// Whether this scope covers a location.
    pub fn covers(&self, location: Location) -> bool {
        match self {
            Scope::All => true,
            Scope::Location(l) => *l == location,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::All => f.write_str("all"),
            Scope::Location(l) => f.write_str(l.tag()),
        }
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            Ok(Scope::All)
        } else {
            s.parse().map(Scope::Location)
        }
    }
}

impl TryFrom<String> for Scope {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

/// Stateless request/response access to the ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit a batch. The ledger applies all of it or none of it.
    async fn push(&self, records: &[StockRecord]) -> Result<PushResult, LedgerError>;

    /// Fetch the ledger's complete current state for a scope, tombstones included.
    async fn pull(&self, scope: Scope) -> Result<Vec<StockRecord>, LedgerError>;
}
