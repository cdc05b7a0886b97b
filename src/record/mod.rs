//! The replicated unit: a product's stock across three storage locations
//!
//! A `StockRecord` carries both the values the user sees (`quantities`) and
//! the values this replica believes the shared ledger holds
//! (`synced_baseline`). The difference between the two is the unsynchronised
//! work the merge step reapplies after a conflict.

mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Number of digits in a product identifier (EAN-13 / JAN).
pub const PRODUCT_ID_LEN: usize = 13;

/// A validated 13-digit product identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProductId(String);

impl ProductId {
    /// Validate a raw code (typed or scanned). Surrounding whitespace is ignored.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let code = raw.trim();
        if code.len() == PRODUCT_ID_LEN && code.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(code.to_string()))
        } else {
            Err(ValidationError::InvalidProductId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProductId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ProductId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ProductId> for String {
    fn from(id: ProductId) -> Self {
        id.0
    }
}

/// Physical storage zone a count belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Location {
    Shelf,
    BackOrder,
    Offsite,
}

impl Location {
    pub const ALL: [Location; 3] = [Location::Shelf, Location::BackOrder, Location::Offsite];

    /// Tag used on the wire and on the command line.
    pub fn tag(&self) -> &'static str {
        match self {
            Location::Shelf => "shelf",
            Location::BackOrder => "backOrder",
            Location::Offsite => "offsite",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Location {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shelf" => Ok(Location::Shelf),
            "backOrder" | "back-order" | "back_order" => Ok(Location::BackOrder),
            "offsite" => Ok(Location::Offsite),
            other => Err(format!("unknown location '{}'", other)),
        }
    }
}

/// Per-location counts. Counts are never negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Quantities {
    pub shelf: u32,
    pub back_order: u32,
    pub offsite: u32,
}

impl Quantities {
    pub fn new(shelf: u32, back_order: u32, offsite: u32) -> Self {
        Self {
            shelf,
            back_order,
            offsite,
        }
    }

    pub fn get(&self, location: Location) -> u32 {
        match location {
            Location::Shelf => self.shelf,
            Location::BackOrder => self.back_order,
            Location::Offsite => self.offsite,
        }
    }

    pub fn set(&mut self, location: Location, value: u32) {
        match location {
            Location::Shelf => self.shelf = value,
            Location::BackOrder => self.back_order = value,
            Location::Offsite => self.offsite = value,
        }
    }

    /// Set a location from a signed proposal, clamping negatives to zero.
    pub fn set_clamped(&mut self, location: Location, proposed: i64) {
        self.set(location, clamp_count(proposed));
    }

    /// Add a signed delta to a location, clamping at zero.
    pub fn adjust(&mut self, location: Location, delta: i64) {
        let proposed = i64::from(self.get(location)) + delta;
        self.set_clamped(location, proposed);
    }

    pub fn total(&self) -> u64 {
        Location::ALL.iter().map(|l| u64::from(self.get(*l))).sum()
    }
}

/// Clamp a signed count into the valid range `0..=u32::MAX`.
pub fn clamp_count(proposed: i64) -> u32 {
    proposed.clamp(0, i64::from(u32::MAX)) as u32
}

/// A product's stock record as held by one replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockRecord {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub maker_code: String,
    #[serde(default)]
    pub quantities: Quantities,
    /// Counts this replica believes the ledger holds. Written only by the sync engine.
    #[serde(default)]
    pub synced_baseline: Quantities,
    pub updated_at: DateTime<Utc>,
    /// `updated_at` of the last version the ledger acknowledged.
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted: bool,
}

impl StockRecord {
    /// A fresh record: all counts and baselines start at zero.
    pub fn new(
        id: ProductId,
        name: impl Into<String>,
        maker_code: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            maker_code: maker_code.into(),
            quantities: Quantities::default(),
            synced_baseline: Quantities::default(),
            updated_at: now,
            synced_at: None,
            deleted: false,
        }
    }

    /// Unsynchronised change at one location.
    pub fn delta(&self, location: Location) -> i64 {
        i64::from(self.quantities.get(location)) - i64::from(self.synced_baseline.get(location))
    }

    /// Whether this version has local changes the ledger has not acknowledged.
    pub fn is_pending(&self) -> bool {
        match self.synced_at {
            Some(synced) => synced < self.updated_at,
            None => true,
        }
    }

    /// Whether the record is visible in lists, searches and totals.
    pub fn is_live(&self) -> bool {
        !self.deleted
    }

    /// Record a local mutation: stamps the time and revives a tombstone.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.deleted = false;
    }

    /// Turn this record into a tombstone.
    pub fn mark_deleted(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.deleted = true;
    }

    /// Adopt `acknowledged` as the ledger's state for every location.
    pub(crate) fn acknowledge(&mut self, acknowledged: Quantities, version: DateTime<Utc>) {
        self.synced_baseline = acknowledged;
        self.synced_at = Some(version);
    }
}
