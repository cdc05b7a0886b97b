//! The sync state machine
//!
//! Pushes: `Idle → Pushing → Succeeded | Conflicted → Merging → Pushing | Failed`.
//! Pulls: `Idle → Pulling → Succeeded | Failed`.
//!
//! Every store write for a round happens after that round's ledger call has
//! returned, so abandoning a push or pull mid-flight never leaves a
//! half-applied result behind.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::merge::merge;
use super::tombstone::TombstoneCollector;
use super::{PullReport, PushReport, SyncContext, SyncState};
use crate::config::SyncConfig;
use crate::error::StockError;
use crate::ledger::{LedgerClient, LedgerError, PushResult, Scope};
use crate::record::{Clock, Location, ProductId, Quantities, StockRecord};
use crate::store::RecordStore;

pub struct SyncEngine {
    store: Arc<dyn RecordStore>,
    ledger: Arc<dyn LedgerClient>,
    clock: Arc<dyn Clock>,
    tombstones: TombstoneCollector,
    max_conflict_retries: u32,
    request_timeout: Duration,
    state: watch::Sender<SyncState>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        ledger: Arc<dyn LedgerClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let defaults = SyncConfig::default();
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            tombstones: TombstoneCollector::new(store.clone()),
            store,
            ledger,
            clock,
            max_conflict_retries: defaults.max_conflict_retries,
            request_timeout: defaults.request_timeout(),
            state,
        }
    }

    /// Take retry bound and timeout from a loaded config.
    pub fn with_config(self, config: &SyncConfig) -> Self {
        self.with_max_conflict_retries(config.max_conflict_retries)
            .with_request_timeout(config.request_timeout())
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries.max(1);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Current state.
    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SyncState) {
        self.state.send_replace(state);
    }

    fn fail<T>(&self, err: StockError) -> Result<T, StockError> {
        self.set_state(SyncState::Failed(err.to_string()));
        Err(err)
    }

    /// Run a ledger call under the request timeout.
    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, LedgerError>>,
    ) -> Result<T, StockError> {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result.map_err(StockError::from),
            Err(_) => Err(LedgerError::Timeout.into()),
        }
    }

    /// Push one record (typically right after a local save).
    pub async fn push_record(
        &self,
        ctx: &SyncContext,
        id: &ProductId,
    ) -> Result<PushReport, StockError> {
        self.push_ids(ctx, vec![id.clone()]).await
    }

    /// Push the record the context marks as active, or everything pending
    /// when there is none.
    pub async fn push_active(&self, ctx: &SyncContext) -> Result<PushReport, StockError> {
        match &ctx.active_id {
            Some(id) => self.push_record(ctx, id).await,
            None => self.push_pending(ctx).await,
        }
    }

    /// Push the whole store.
    pub async fn push_all(&self, ctx: &SyncContext) -> Result<PushReport, StockError> {
        let ids = self
            .store
            .get_all()
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();
        self.push_ids(ctx, ids).await
    }

    /// Push only records with unacknowledged changes.
    pub async fn push_pending(&self, ctx: &SyncContext) -> Result<PushReport, StockError> {
        let ids = self
            .store
            .get_all()
            .await?
            .into_iter()
            .filter(StockRecord::is_pending)
            .map(|r| r.id)
            .collect();
        self.push_ids(ctx, ids).await
    }

    /// Push pending work, then pull the context's scope.
    pub async fn synchronize(
        &self,
        ctx: &SyncContext,
    ) -> Result<(PushReport, PullReport), StockError> {
        let pushed = self.push_pending(ctx).await?;
        let pulled = self.pull(ctx).await?;
        Ok((pushed, pulled))
    }

    async fn push_ids(
        &self,
        ctx: &SyncContext,
        ids: Vec<ProductId>,
    ) -> Result<PushReport, StockError> {
        match self.run_push(ctx, ids).await {
            Ok(report) => {
                self.set_state(SyncState::Succeeded);
                Ok(report)
            }
            Err(err) => self.fail(err),
        }
    }

    async fn run_push(
        &self,
        ctx: &SyncContext,
        mut ids: Vec<ProductId>,
    ) -> Result<PushReport, StockError> {
        ids.sort();
        ids.dedup();

        let mut report = PushReport::default();
        // Consecutive conflicts per id within this action
        let mut conflict_counts: HashMap<ProductId, u32> = HashMap::new();
        // Ledger counts learned from conflicts during this action
        let mut observed: HashMap<ProductId, Quantities> = HashMap::new();

        loop {
            // Always submit the latest stored version; the user may have
            // edited while a previous round was in flight.
            let mut batch = Vec::with_capacity(ids.len());
            for id in &ids {
                if let Some(record) = self.store.get(id).await? {
                    batch.push(record);
                }
            }
            if batch.is_empty() {
                return Ok(report);
            }

            report.attempts += 1;
            self.set_state(SyncState::Pushing {
                attempt: report.attempts,
            });
            log::debug!(
                "[{}] pushing {} record(s), attempt {}",
                ctx.device_id,
                batch.len(),
                report.attempts
            );

            let result = match self.call(self.ledger.push(&batch)).await {
                Ok(result) => result,
                Err(err) => {
                    log::warn!("[{}] push failed: {}", ctx.device_id, err);
                    return Err(err);
                }
            };

            let snapshots = match result {
                PushResult::Accepted => {
                    for pushed in &batch {
                        self.acknowledge(pushed, &mut report).await?;
                    }
                    log::info!(
                        "[{}] push accepted: {} acknowledged, {} tombstone(s) collected",
                        ctx.device_id,
                        report.accepted,
                        report.collected
                    );
                    return Ok(report);
                }
                PushResult::Conflict(snapshots) => snapshots,
            };

            if snapshots.is_empty() {
                return Err(
                    LedgerError::Protocol("conflict reported without snapshots".into()).into(),
                );
            }

            self.set_state(SyncState::Conflicted);
            log::warn!(
                "[{}] push conflicted on {} record(s)",
                ctx.device_id,
                snapshots.len()
            );

            self.set_state(SyncState::Merging);
            let conflicting: HashSet<ProductId> = snapshots.iter().map(|s| s.id.clone()).collect();
            conflict_counts.retain(|id, _| conflicting.contains(id));

            let mut livelocked = Vec::new();
            for server in snapshots {
                let count = conflict_counts.entry(server.id.clone()).or_insert(0);
                *count += 1;
                let exhausted = *count >= self.max_conflict_retries;

                if let Some(merged) = self.resolve(&server, observed.get(&server.id)).await? {
                    log::debug!(
                        "[{}] merged {}: shelf={} backOrder={} offsite={}",
                        ctx.device_id,
                        merged.id,
                        merged.quantities.shelf,
                        merged.quantities.back_order,
                        merged.quantities.offsite
                    );
                    self.store.put(merged).await?;
                    report.merged += 1;
                }
                observed.insert(server.id.clone(), server.quantities);

                if !ids.contains(&server.id) {
                    ids.push(server.id.clone());
                }
                if exhausted {
                    livelocked.push(server.id);
                }
            }

            if !livelocked.is_empty() {
                livelocked.sort();
                log::warn!(
                    "[{}] giving up after {} conflicting rounds: {:?}",
                    ctx.device_id,
                    self.max_conflict_retries,
                    livelocked
                );
                return Err(StockError::MergeLivelock {
                    ids: livelocked,
                    attempts: self.max_conflict_retries,
                });
            }
        }
    }

    /// Merge the stored record with a conflicting ledger snapshot.
    ///
    /// On a repeat conflict within the same action the stored record already
    /// contains the previous snapshot plus our delta, so the delta is taken
    /// against that snapshot instead of the stored baseline. The stored
    /// baseline itself is never changed by a conflict.
    async fn resolve(
        &self,
        server: &StockRecord,
        previously_observed: Option<&Quantities>,
    ) -> Result<Option<StockRecord>, StockError> {
        let current = match self.store.get(&server.id).await? {
            Some(current) => current,
            None => return Ok(None),
        };

        let mut input = current.clone();
        if let Some(observed) = previously_observed {
            input.synced_baseline = *observed;
        }

        let mut merged = merge(&input, server, self.clock.now_after(server.updated_at));
        merged.synced_baseline = current.synced_baseline;
        Ok(Some(merged))
    }

    /// Record that the ledger accepted `pushed`.
    async fn acknowledge(
        &self,
        pushed: &StockRecord,
        report: &mut PushReport,
    ) -> Result<(), StockError> {
        if pushed.deleted && self.tombstones.collect(pushed).await? {
            report.collected += 1;
            return Ok(());
        }

        // Re-read: edits made during the round trip keep their own counts
        // and stay pending, but the baseline reflects what the ledger now holds.
        if let Some(mut current) = self.store.get(&pushed.id).await? {
            current.acknowledge(pushed.quantities, pushed.updated_at);
            self.store.put(current).await?;
            report.accepted += 1;
        }
        Ok(())
    }

    /// Fetch the ledger's state for the context's scope and adopt it.
    pub async fn pull(&self, ctx: &SyncContext) -> Result<PullReport, StockError> {
        self.set_state(SyncState::Pulling);

        let snapshot = match self.call(self.ledger.pull(ctx.scope)).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                log::warn!("[{}] pull failed: {}", ctx.device_id, err);
                return self.fail(err);
            }
        };

        let result = match ctx.scope {
            Scope::All => self.apply_full(snapshot).await,
            Scope::Location(location) => self.apply_location(location, snapshot).await,
        };

        match result {
            Ok(report) => {
                log::info!(
                    "[{}] pull ({}) applied {}, removed {}, skipped {}",
                    ctx.device_id,
                    ctx.scope,
                    report.applied,
                    report.removed,
                    report.skipped
                );
                self.set_state(SyncState::Succeeded);
                Ok(report)
            }
            Err(err) => self.fail(err),
        }
    }

    /// Full pull: the ledger's records overwrite local ones. Local records
    /// the ledger no longer holds live are removed unless they carry
    /// unsynchronised work.
    async fn apply_full(&self, snapshot: Vec<StockRecord>) -> Result<PullReport, StockError> {
        let mut report = PullReport::default();
        let mut live_remote = HashSet::new();

        for mut remote in snapshot {
            if remote.deleted {
                continue;
            }
            live_remote.insert(remote.id.clone());
            remote.acknowledge(remote.quantities, remote.updated_at);
            self.store.put(remote).await?;
            report.applied += 1;
        }

        for local in self.store.get_all().await? {
            if live_remote.contains(&local.id) {
                continue;
            }
            if local.is_pending() {
                report.skipped += 1;
            } else {
                self.store.delete(&local.id).await?;
                report.removed += 1;
            }
        }

        Ok(report)
    }

    /// Single-location pull: only that counter (and its baseline) changes on
    /// existing records. Unknown live records are adopted whole.
    async fn apply_location(
        &self,
        location: Location,
        snapshot: Vec<StockRecord>,
    ) -> Result<PullReport, StockError> {
        let mut report = PullReport::default();

        for mut remote in snapshot {
            if remote.deleted {
                continue;
            }
            match self.store.get(&remote.id).await? {
                Some(mut local) => {
                    let value = remote.quantities.get(location);
                    local.quantities.set(location, value);
                    local.synced_baseline.set(location, value);
                    self.store.put(local).await?;
                }
                None => {
                    remote.acknowledge(remote.quantities, remote.updated_at);
                    self.store.put(remote).await?;
                }
            }
            report.applied += 1;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::wire::LedgerRecord;
    use crate::ledger::InMemoryLedger;
    use crate::record::ManualClock;
    use crate::store::InMemoryRecordStore;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use uuid::Uuid;

    const TEA: &str = "4901234567894";

    fn tea() -> ProductId {
        ProductId::parse(TEA).unwrap()
    }

    struct Harness {
        store: Arc<InMemoryRecordStore>,
        ledger: Arc<InMemoryLedger>,
        clock: Arc<ManualClock>,
        engine: SyncEngine,
        ctx: SyncContext,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryRecordStore::new());
        let ledger = InMemoryLedger::new();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = SyncEngine::new(store.clone(), ledger.clone(), clock.clone());
        Harness {
            store,
            ledger,
            clock,
            engine,
            ctx: SyncContext::new(Uuid::new_v4()),
        }
    }

    async fn put_local(h: &Harness, current: Quantities, baseline: Quantities) -> StockRecord {
        let mut r = StockRecord::new(tea(), "Green tea", "4901234", h.clock.now());
        r.quantities = current;
        r.synced_baseline = baseline;
        h.store.put(r.clone()).await.unwrap();
        r
    }

    fn ledger_record(quantities: Quantities, updated_at: chrono::DateTime<Utc>) -> LedgerRecord {
        LedgerRecord {
            id: tea(),
            name: "Green tea (ledger)".into(),
            maker_code: "4901234".into(),
            quantities,
            updated_at,
            deleted: false,
        }
    }

    #[tokio::test]
    async fn test_accepted_push_advances_baseline() {
        let h = harness();
        put_local(&h, Quantities::new(5, 2, 1), Quantities::default()).await;

        let report = h.engine.push_record(&h.ctx, &tea()).await.unwrap();
        assert_eq!(report.accepted, 1);
        assert_eq!(report.attempts, 1);
        assert_eq!(h.engine.state(), SyncState::Succeeded);

        let stored = h.store.get(&tea()).await.unwrap().unwrap();
        assert_eq!(stored.synced_baseline, stored.quantities);
        assert!(!stored.is_pending());
        assert_eq!(h.ledger.get(&tea()).await.unwrap().quantities.shelf, 5);
    }

    #[tokio::test]
    async fn test_conflict_merges_and_resubmits() {
        let h = harness();
        let local = put_local(&h, Quantities::new(5, 0, 0), Quantities::new(3, 0, 0)).await;
        h.ledger
            .seed(ledger_record(
                Quantities::new(10, 0, 0),
                local.updated_at + ChronoDuration::seconds(5),
            ))
            .await;

        let report = h.engine.push_record(&h.ctx, &tea()).await.unwrap();
        assert_eq!(report.merged, 1);
        assert_eq!(report.attempts, 2);

        let stored = h.store.get(&tea()).await.unwrap().unwrap();
        assert_eq!(stored.quantities.shelf, 12);
        assert_eq!(stored.synced_baseline.shelf, 12);
        assert_eq!(stored.name, "Green tea (ledger)");

        let remote = h.ledger.get(&tea()).await.unwrap();
        assert_eq!(remote.quantities.shelf, 12);
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_record_untouched() {
        let h = harness();
        let local = put_local(&h, Quantities::new(4, 0, 0), Quantities::new(1, 0, 0)).await;
        h.ledger.set_offline(true);

        let err = h.engine.push_record(&h.ctx, &tea()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(h.engine.state(), SyncState::Failed(_)));

        let stored = h.store.get(&tea()).await.unwrap().unwrap();
        assert_eq!(stored, local);
        assert!(stored.is_pending());

        // Same trigger later succeeds without further local changes
        h.ledger.set_offline(false);
        h.engine.push_record(&h.ctx, &tea()).await.unwrap();
        let stored = h.store.get(&tea()).await.unwrap().unwrap();
        assert_eq!(stored.synced_baseline.shelf, 4);
    }

    #[tokio::test]
    async fn test_accepted_tombstone_is_collected() {
        let h = harness();
        let mut r = put_local(&h, Quantities::new(1, 0, 0), Quantities::new(1, 0, 0)).await;
        r.mark_deleted(h.clock.now());
        h.store.put(r).await.unwrap();

        let report = h.engine.push_all(&h.ctx).await.unwrap();
        assert_eq!(report.collected, 1);
        assert!(h.store.get(&tea()).await.unwrap().is_none());
        assert!(h.ledger.get(&tea()).await.unwrap().deleted);
    }

    #[tokio::test]
    async fn test_conflicting_tombstone_is_resurrected() {
        let h = harness();
        let mut r = put_local(&h, Quantities::new(2, 0, 0), Quantities::new(2, 0, 0)).await;
        r.mark_deleted(h.clock.now());
        h.store.put(r.clone()).await.unwrap();
        h.ledger
            .seed(ledger_record(
                Quantities::new(7, 0, 0),
                r.updated_at + ChronoDuration::seconds(1),
            ))
            .await;

        let report = h.engine.push_record(&h.ctx, &tea()).await.unwrap();
        assert_eq!(report.collected, 0);
        let stored = h.store.get(&tea()).await.unwrap().unwrap();
        assert!(!stored.deleted);
        assert_eq!(stored.quantities.shelf, 7);
        assert!(!h.ledger.get(&tea()).await.unwrap().deleted);
    }

    /// Ledger that always reports a newer snapshot with a moving count.
    struct AlwaysNewer {
        rounds: AtomicU32,
    }

    #[async_trait]
    impl LedgerClient for AlwaysNewer {
        async fn push(&self, records: &[StockRecord]) -> Result<PushResult, LedgerError> {
            let round = self.rounds.fetch_add(1, Ordering::SeqCst) + 1;
            let snapshots = records
                .iter()
                .map(|r| {
                    ledger_record(
                        Quantities::new(10 * round, 0, 0),
                        r.updated_at + ChronoDuration::hours(1),
                    )
                    .into_record()
                })
                .collect();
            Ok(PushResult::Conflict(snapshots))
        }

        async fn pull(&self, _scope: Scope) -> Result<Vec<StockRecord>, LedgerError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_livelock_after_retry_bound() {
        let store = Arc::new(InMemoryRecordStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ledger = Arc::new(AlwaysNewer {
            rounds: AtomicU32::new(0),
        });
        let engine = SyncEngine::new(store.clone(), ledger.clone(), clock.clone())
            .with_max_conflict_retries(3);

        let mut r = StockRecord::new(tea(), "Green tea", "", clock.now());
        r.quantities = Quantities::new(5, 0, 0);
        r.synced_baseline = Quantities::new(3, 0, 0);
        store.put(r.clone()).await.unwrap();

        let err = engine
            .push_record(&SyncContext::new(Uuid::new_v4()), &tea())
            .await
            .unwrap_err();
        match err {
            StockError::MergeLivelock { ids, attempts } => {
                assert_eq!(ids, vec![tea()]);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected livelock, got {:?}", other),
        }
        assert_eq!(ledger.rounds.load(Ordering::SeqCst), 3);

        // Last merged value kept: third snapshot (30) plus the original +2
        let stored = store.get(&tea()).await.unwrap().unwrap();
        assert_eq!(stored.quantities.shelf, 32);
        assert_eq!(stored.synced_baseline, r.synced_baseline);
    }

    #[tokio::test]
    async fn test_conflict_never_touches_baseline() {
        let store = Arc::new(InMemoryRecordStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ledger = Arc::new(AlwaysNewer {
            rounds: AtomicU32::new(0),
        });
        let engine =
            SyncEngine::new(store.clone(), ledger, clock.clone()).with_max_conflict_retries(1);

        let mut r = StockRecord::new(tea(), "Green tea", "", clock.now());
        r.quantities = Quantities::new(1, 4, 0);
        r.synced_baseline = Quantities::new(4, 1, 2);
        store.put(r.clone()).await.unwrap();

        assert!(engine
            .push_record(&SyncContext::new(Uuid::new_v4()), &tea())
            .await
            .is_err());
        let stored = store.get(&tea()).await.unwrap().unwrap();
        assert_eq!(stored.synced_baseline, r.synced_baseline);
        // 10 - 3, then 0 + 3, then 0 - 2 clamped to 0
        assert_eq!(stored.quantities, Quantities::new(7, 3, 0));
    }

    #[tokio::test]
    async fn test_full_pull_overwrites_and_sets_baseline() {
        let h = harness();
        h.ledger
            .seed(ledger_record(Quantities::new(3, 4, 5), h.clock.now()))
            .await;

        let report = h.engine.pull(&h.ctx).await.unwrap();
        assert_eq!(report.applied, 1);

        let stored = h.store.get(&tea()).await.unwrap().unwrap();
        assert_eq!(stored.quantities, Quantities::new(3, 4, 5));
        assert_eq!(stored.synced_baseline, stored.quantities);
        assert!(!stored.is_pending());
    }

    #[tokio::test]
    async fn test_scoped_pull_leaves_other_locations() {
        let h = harness();
        put_local(&h, Quantities::new(1, 2, 3), Quantities::new(1, 2, 3)).await;
        h.ledger
            .seed(ledger_record(Quantities::new(9, 9, 9), h.clock.now()))
            .await;

        let ctx = h.ctx.clone().with_scope(Scope::Location(Location::BackOrder));
        h.engine.pull(&ctx).await.unwrap();

        let stored = h.store.get(&tea()).await.unwrap().unwrap();
        assert_eq!(stored.quantities, Quantities::new(1, 9, 3));
        assert_eq!(stored.synced_baseline, Quantities::new(1, 9, 3));
    }

    #[tokio::test]
    async fn test_full_pull_removes_only_clean_absent_records() {
        let h = harness();
        let clean_id = ProductId::parse("4909876543210").unwrap();
        let mut clean = StockRecord::new(clean_id.clone(), "Oolong", "", h.clock.now());
        clean.acknowledge(clean.quantities, clean.updated_at);
        h.store.put(clean).await.unwrap();
        // Pending and never pushed
        put_local(&h, Quantities::new(1, 0, 0), Quantities::default()).await;

        let report = h.engine.pull(&h.ctx).await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.skipped, 1);
        assert!(h.store.get(&clean_id).await.unwrap().is_none());
        assert!(h.store.get(&tea()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pull_failure_changes_nothing() {
        let h = harness();
        let local = put_local(&h, Quantities::new(1, 0, 0), Quantities::default()).await;
        h.ledger.fail_next(1);

        let err = h.engine.pull(&h.ctx).await.unwrap_err();
        assert!(matches!(err, StockError::TransportFailure(_)));
        assert_eq!(h.store.get(&tea()).await.unwrap().unwrap(), local);
    }

    /// Ledger that takes the local store down once, right after its next
    /// successful call returns.
    struct StoreOutageAfterCall {
        inner: Arc<InMemoryLedger>,
        store: Arc<InMemoryRecordStore>,
        armed: AtomicBool,
    }

    impl StoreOutageAfterCall {
        fn new(inner: Arc<InMemoryLedger>, store: Arc<InMemoryRecordStore>) -> Self {
            Self {
                inner,
                store,
                armed: AtomicBool::new(true),
            }
        }

        fn trip(&self) {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.store.set_unavailable(true);
            }
        }
    }

    #[async_trait]
    impl LedgerClient for StoreOutageAfterCall {
        async fn push(&self, records: &[StockRecord]) -> Result<PushResult, LedgerError> {
            let result = self.inner.push(records).await;
            self.trip();
            result
        }

        async fn pull(&self, scope: Scope) -> Result<Vec<StockRecord>, LedgerError> {
            let result = self.inner.pull(scope).await;
            self.trip();
            result
        }
    }

    #[tokio::test]
    async fn test_storage_failure_while_acknowledging_push() {
        let store = Arc::new(InMemoryRecordStore::new());
        let ledger = InMemoryLedger::new();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let outage = Arc::new(StoreOutageAfterCall::new(ledger.clone(), store.clone()));
        let engine = SyncEngine::new(store.clone(), outage, clock.clone());
        let ctx = SyncContext::new(Uuid::new_v4());

        let mut r = StockRecord::new(tea(), "Green tea", "", clock.now());
        r.quantities = Quantities::new(4, 1, 0);
        store.put(r).await.unwrap();

        let err = engine.push_record(&ctx, &tea()).await.unwrap_err();
        assert!(matches!(err, StockError::Storage(_)));
        assert!(!err.is_retryable());
        assert!(matches!(engine.state(), SyncState::Failed(_)));

        // Ledger took the write, the replica did not record it
        store.set_unavailable(false);
        assert!(store.get(&tea()).await.unwrap().unwrap().is_pending());
        assert_eq!(ledger.get(&tea()).await.unwrap().quantities.shelf, 4);

        // Resubmitting the same version is accepted (equal stamps never conflict)
        let report = engine.push_pending(&ctx).await.unwrap();
        assert_eq!(report.accepted, 1);
        assert_eq!(engine.state(), SyncState::Succeeded);
        let stored = store.get(&tea()).await.unwrap().unwrap();
        assert_eq!(stored.synced_baseline, stored.quantities);
        assert!(!stored.is_pending());
    }

    #[tokio::test]
    async fn test_storage_failure_while_applying_pull() {
        let store = Arc::new(InMemoryRecordStore::new());
        let ledger = InMemoryLedger::new();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        ledger
            .seed(ledger_record(Quantities::new(3, 4, 5), clock.now()))
            .await;
        let outage = Arc::new(StoreOutageAfterCall::new(ledger.clone(), store.clone()));
        let engine = SyncEngine::new(store.clone(), outage, clock);
        let ctx = SyncContext::new(Uuid::new_v4());

        let err = engine.pull(&ctx).await.unwrap_err();
        assert!(matches!(err, StockError::Storage(_)));
        assert!(matches!(engine.state(), SyncState::Failed(_)));

        store.set_unavailable(false);
        assert!(store.get(&tea()).await.unwrap().is_none());

        let report = engine.pull(&ctx).await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(engine.state(), SyncState::Succeeded);
        let stored = store.get(&tea()).await.unwrap().unwrap();
        assert_eq!(stored.quantities, Quantities::new(3, 4, 5));
        assert_eq!(stored.synced_baseline, stored.quantities);
    }

    /// Ledger that never answers.
    struct Silent;

    #[async_trait]
    impl LedgerClient for Silent {
        async fn push(&self, _records: &[StockRecord]) -> Result<PushResult, LedgerError> {
            std::future::pending().await
        }

        async fn pull(&self, _scope: Scope) -> Result<Vec<StockRecord>, LedgerError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_transport_failure() {
        let store = Arc::new(InMemoryRecordStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = SyncEngine::new(store.clone(), Arc::new(Silent), clock.clone())
            .with_request_timeout(Duration::from_secs(2));
        store
            .put(StockRecord::new(tea(), "Green tea", "", clock.now()))
            .await
            .unwrap();

        let err = engine
            .push_record(&SyncContext::new(Uuid::new_v4()), &tea())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_push_active_uses_context() {
        let h = harness();
        put_local(&h, Quantities::new(2, 0, 0), Quantities::default()).await;
        let other = ProductId::parse("4909876543210").unwrap();
        h.store
            .put(StockRecord::new(other.clone(), "Oolong", "", h.clock.now()))
            .await
            .unwrap();

        let ctx = h.ctx.clone().with_active(tea());
        h.engine.push_active(&ctx).await.unwrap();
        assert!(h.ledger.get(&tea()).await.is_some());
        assert!(h.ledger.get(&other).await.is_none());

        // No active id: everything pending goes
        h.engine.push_active(&h.ctx).await.unwrap();
        assert!(h.ledger.get(&other).await.is_some());
    }

    #[tokio::test]
    async fn test_state_transitions_are_observable() {
        let h = harness();
        let rx = h.engine.subscribe();
        assert_eq!(*rx.borrow(), SyncState::Idle);

        put_local(&h, Quantities::new(1, 0, 0), Quantities::default()).await;
        h.engine.push_pending(&h.ctx).await.unwrap();
        assert_eq!(*rx.borrow(), SyncState::Succeeded);
    }
}
