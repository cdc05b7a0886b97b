//! Read-only views over a snapshot of the store
//!
//! Every user-facing view goes through here so tombstones never leak into
//! lists, searches or totals. Pending-sync reporting is the one view that
//! includes them.

use std::cmp::Reverse;

use crate::record::{Location, Quantities, StockRecord};

/// Ordering for record listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    /// Most recently modified first.
    #[default]
    UpdatedDesc,
    UpdatedAsc,
    /// Highest total stock first.
    StockDesc,
    StockAsc,
    MakerAsc,
    MakerDesc,
}

impl std::str::FromStr for SortMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "date-desc" | "updated-desc" => Ok(SortMode::UpdatedDesc),
            "date-asc" | "updated-asc" => Ok(SortMode::UpdatedAsc),
            "stock-desc" => Ok(SortMode::StockDesc),
            "stock-asc" => Ok(SortMode::StockAsc),
            "maker-asc" => Ok(SortMode::MakerAsc),
            "maker-desc" => Ok(SortMode::MakerDesc),
            other => Err(format!("unknown sort mode '{}'", other)),
        }
    }
}

/// Records that are not tombstones.
pub fn live(records: Vec<StockRecord>) -> Vec<StockRecord> {
    records.into_iter().filter(StockRecord::is_live).collect()
}

/// Live records whose id contains `query` or whose name contains it
/// case-insensitively. An empty query matches everything live.
pub fn search(records: Vec<StockRecord>, query: &str) -> Vec<StockRecord> {
    let q = query.trim().to_lowercase();
    records
        .into_iter()
        .filter(StockRecord::is_live)
        .filter(|r| q.is_empty() || r.id.as_str().contains(&q) || r.name.to_lowercase().contains(&q))
        .collect()
}

/// Sort in place. Ties keep a stable order by product id.
pub fn sort(records: &mut [StockRecord], mode: SortMode) {
    records.sort_by(|a, b| a.id.cmp(&b.id));
    match mode {
        SortMode::UpdatedDesc => records.sort_by_key(|r| Reverse(r.updated_at)),
        SortMode::UpdatedAsc => records.sort_by_key(|r| r.updated_at),
        SortMode::StockDesc => records.sort_by_key(|r| Reverse(r.quantities.total())),
        SortMode::StockAsc => records.sort_by_key(|r| r.quantities.total()),
        SortMode::MakerAsc => records.sort_by(|a, b| a.maker_code.cmp(&b.maker_code)),
        SortMode::MakerDesc => records.sort_by(|a, b| b.maker_code.cmp(&a.maker_code)),
    }
}

/// Aggregate stock per location over live records.
pub fn totals(records: &[StockRecord]) -> Quantities {
    let mut sum = [0u64; 3];
    for record in records.iter().filter(|r| r.is_live()) {
        for (slot, location) in sum.iter_mut().zip(Location::ALL) {
            *slot += u64::from(record.quantities.get(location));
        }
    }
    let cap = |v: u64| u32::try_from(v).unwrap_or(u32::MAX);
    Quantities::new(cap(sum[0]), cap(sum[1]), cap(sum[2]))
}

/// Records with changes the ledger has not acknowledged, tombstones included.
pub fn pending(records: Vec<StockRecord>) -> Vec<StockRecord> {
    records.into_iter().filter(StockRecord::is_pending).collect()
}
