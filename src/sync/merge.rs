//! Delta merge of a local record against the ledger's snapshot
//!
//! Each location is an independent integer counter. The replica's
//! unsynchronised work at a location is `quantities - synced_baseline`;
//! replaying that delta on top of the ledger's value keeps both the other
//! replicas' edits and ours.

use chrono::{DateTime, Utc};

use crate::record::{Location, Quantities, StockRecord};

/// Reconcile `local` with the ledger's current value for the same id.
///
/// - counts: `max(0, server + (local - local.baseline))` per location
/// - name and maker code: taken from the ledger
/// - `updated_at`: `now`, so the result is eligible for resubmission
/// - deletion: a live side revives the record; it stays deleted only when
///   both sides are tombstones
/// - baseline and `synced_at`: unchanged from `local`
///
/// The result must be pushed again; merging alone never completes a sync.
pub fn merge(local: &StockRecord, server: &StockRecord, now: DateTime<Utc>) -> StockRecord {
    let mut quantities = Quantities::default();
    for location in Location::ALL {
        let remote = i64::from(server.quantities.get(location));
        quantities.set_clamped(location, remote + local.delta(location));
    }

    StockRecord {
        id: local.id.clone(),
        name: server.name.clone(),
        maker_code: server.maker_code.clone(),
        quantities,
        synced_baseline: local.synced_baseline,
        updated_at: now,
        synced_at: local.synced_at,
        deleted: local.deleted && server.deleted,
    }
}
