//! Background prefetch scheduler.
//!
//! A pass filters the requested window indices against the cache, orders
//! them nearest-first, and runs them in chunks of at most `concurrency`
//! lookups. Chunks are separated by `pacing` so background work leaves
//! upstream capacity for foreground lookups. Chunk `k + 1` never starts
//! before chunk `k` has fully resolved.

use std::sync::Arc;
use std::time::Duration;

use common::config::PrefetchConfig;
use common::{CacheEntry, CacheKey, EntryStatus, FetchError, SearchContext};
use fare_client::FetchGateway;
use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{PassId, PendingWork, PriceCacheStore};
use crate::validity::ValidityPolicy;
use crate::window::{display_label, DateWindow};

/// A cache write accepted from a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceUpdate {
    pub key: CacheKey,
    pub entry: CacheEntry,
}

/// Summary of one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Indices handed to the pass, duplicates included.
    pub requested: usize,
    /// Resolved-null by the validity rule, never fetched.
    pub rejected: usize,
    /// Already resolved, in flight, out of range, or duplicated.
    pub skipped: usize,
    pub fetched: usize,
    pub failed: usize,
    /// Results dropped because the pass was cancelled or lost ownership.
    pub discarded: usize,
    pub cancelled: bool,
}

/// The live session a pass works for.
#[derive(Debug, Clone)]
pub struct PassScope {
    pub pass: PassId,
    /// Cache epoch the window was seeded in.
    pub epoch: u64,
    pub window: Arc<DateWindow>,
    pub context: Arc<SearchContext>,
    pub cancel: CancellationToken,
}

impl PassScope {
    pub fn new(
        store: &PriceCacheStore,
        window: Arc<DateWindow>,
        context: Arc<SearchContext>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pass: PassId::next(),
            epoch: store.epoch(),
            window,
            context,
            cancel,
        }
    }
}

enum KeyOutcome {
    Fetched,
    Failed,
    Discarded,
}

pub struct PrefetchScheduler {
    gateway: Arc<dyn FetchGateway>,
    store: PriceCacheStore,
    pending: PendingWork,
    policy: ValidityPolicy,
    concurrency: usize,
    pacing: Duration,
    fetch_timeout: Duration,
    updates: Option<broadcast::Sender<PriceUpdate>>,
}

impl PrefetchScheduler {
    pub fn new(
        gateway: Arc<dyn FetchGateway>,
        store: PriceCacheStore,
        pending: PendingWork,
        config: &PrefetchConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            pending,
            policy: ValidityPolicy,
            concurrency: config.concurrency.max(1),
            pacing: config.pacing(),
            fetch_timeout: config.fetch_timeout(),
            updates: None,
        }
    }

    /// Publish every accepted cache write on `sender`.
    pub fn with_updates(mut self, sender: broadcast::Sender<PriceUpdate>) -> Self {
        self.updates = Some(sender);
        self
    }

    pub fn store(&self) -> &PriceCacheStore {
        &self.store
    }

    pub fn pending(&self) -> &PendingWork {
        &self.pending
    }

    /// Filter and order `indices` for fetching.
    ///
    /// Drops indices that are out of range, loading or resolved.
    /// Candidates failing the validity rule are recorded as resolved-null.
    /// The rest are sorted by distance from the center, then by index.
    pub fn plan(&self, scope: &PassScope, indices: &[usize], report: &mut PassReport) -> Vec<usize> {
        let window = &scope.window;

        let mut unique = indices.to_vec();
        unique.sort_unstable();
        unique.dedup();
        report.skipped += indices.len() - unique.len();

        let mut planned = Vec::with_capacity(unique.len());
        for index in unique {
            let Some(key) = window.key(index) else {
                report.skipped += 1;
                continue;
            };

            // In-flight markers are checked at claim time only. A marker seen
            // here may belong to a superseded pass that is about to let go.
            if !matches!(self.store.status(&key), None | Some(EntryStatus::Empty)) {
                report.skipped += 1;
                continue;
            }

            if !self.policy.is_fetchable(key.axis, key.date, &scope.context) {
                let label = display_label(key.date);
                if self.store.resolve_null(key, &label, scope.epoch) {
                    debug!("{}: outside valid range, resolved without fetching", key);
                    self.publish(CacheEntry::loaded(key, label, None));
                }
                report.rejected += 1;
                continue;
            }

            planned.push(index);
        }

        planned.sort_by_key(|&index| (window.distance(index), index));
        planned
    }

    /// Run one paced background pass over `indices`.
    pub async fn run(&self, scope: &PassScope, indices: &[usize]) -> PassReport {
        let mut report = PassReport {
            requested: indices.len(),
            ..PassReport::default()
        };

        let planned = self.plan(scope, indices, &mut report);
        let chunks: Vec<&[usize]> = planned.chunks(self.concurrency).collect();

        for (n, chunk) in chunks.iter().enumerate() {
            if scope.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            self.execute_chunk(scope, chunk, &mut report).await;

            if scope.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if n + 1 == chunks.len() {
                break;
            }

            tokio::select! {
                _ = scope.cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                _ = tokio::time::sleep(self.pacing) => {}
            }
        }

        info!(
            "{} {} pass: requested={} fetched={} failed={} rejected={} skipped={} discarded={}{}",
            scope.pass,
            scope.window.axis(),
            report.requested,
            report.fetched,
            report.failed,
            report.rejected,
            report.skipped,
            report.discarded,
            if report.cancelled { " (cancelled)" } else { "" }
        );

        report
    }

    /// Fetch a single index right away, outside chunking and pacing.
    pub async fn fetch_now(&self, scope: &PassScope, index: usize) -> PassReport {
        let mut report = PassReport {
            requested: 1,
            ..PassReport::default()
        };
        if scope.cancel.is_cancelled() {
            report.cancelled = true;
            return report;
        }

        let planned = self.plan(scope, &[index], &mut report);
        if !planned.is_empty() {
            self.execute_chunk(scope, &planned, &mut report).await;
        }
        report.cancelled = scope.cancel.is_cancelled();
        report
    }

    async fn execute_chunk(&self, scope: &PassScope, chunk: &[usize], report: &mut PassReport) {
        // Every key is Loading and pending before the first network call.
        let claimed: Vec<(usize, CacheKey, String)> =
            chunk.iter().filter_map(|&index| self.claim(scope, index)).collect();
        report.skipped += chunk.len() - claimed.len();

        let outcomes = join_all(
            claimed
                .into_iter()
                .map(|(index, key, label)| self.fetch_and_store(scope, index, key, label)),
        )
        .await;

        for outcome in outcomes {
            match outcome {
                KeyOutcome::Fetched => report.fetched += 1,
                KeyOutcome::Failed => report.failed += 1,
                KeyOutcome::Discarded => report.discarded += 1,
            }
        }
    }

    fn claim(&self, scope: &PassScope, index: usize) -> Option<(usize, CacheKey, String)> {
        let key = scope.window.key(index)?;
        if !self.pending.try_claim(key.axis, index, scope.pass) {
            return None;
        }

        let label = display_label(key.date);
        if !self.store.begin_loading(key, &label, scope.pass, scope.epoch) {
            self.pending.release(key.axis, index, scope.pass);
            return None;
        }
        Some((index, key, label))
    }

    async fn fetch_and_store(
        &self,
        scope: &PassScope,
        index: usize,
        key: CacheKey,
        label: String,
    ) -> KeyOutcome {
        let lookup = self
            .gateway
            .fetch_min_price(key.axis, key.date, &scope.context, &scope.cancel);
        let result = match tokio::time::timeout(self.fetch_timeout, lookup).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                after_ms: self.fetch_timeout.as_millis() as u64,
            }),
        };

        self.pending.release(key.axis, index, scope.pass);

        // Leave the key Loading; the next window regeneration discards it.
        if scope.cancel.is_cancelled() {
            debug!("{}: result arrived after cancellation, dropped", key);
            return KeyOutcome::Discarded;
        }

        let (entry, outcome) = match result {
            Ok(price) => {
                debug!("{}: {}", key, price);
                (CacheEntry::loaded(key, label, Some(price)), KeyOutcome::Fetched)
            }
            Err(e) => {
                let kind = if e.is_data_anomaly() { "no usable price" } else { "lookup failed" };
                warn!("{}: {} ({}), keeping fallback estimate", key, kind, e);
                (CacheEntry::errored(key, label), KeyOutcome::Failed)
            }
        };

        if !self.store.resolve(scope.pass, entry.clone()) {
            debug!("{}: no longer owned by {}, dropped", key, scope.pass);
            return KeyOutcome::Discarded;
        }
        self.publish(entry);
        outcome
    }

    fn publish(&self, entry: CacheEntry) {
        if let Some(tx) = &self.updates {
            // No subscribers is fine.
            let _ = tx.send(PriceUpdate {
                key: entry.key,
                entry,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{date, one_way, round_trip, FakeGateway};
    use common::DateAxis;

    fn config() -> PrefetchConfig {
        PrefetchConfig {
            window_size: 7,
            concurrency: 2,
            pacing_ms: 500,
            fetch_timeout_ms: 1_000,
        }
    }

    fn setup(gateway: FakeGateway) -> (Arc<FakeGateway>, PrefetchScheduler) {
        let gateway = Arc::new(gateway);
        let dyn_gateway: Arc<dyn FetchGateway> = gateway.clone();
        let scheduler = PrefetchScheduler::new(
            dyn_gateway,
            PriceCacheStore::new(),
            PendingWork::new(),
            &config(),
        );
        (gateway, scheduler)
    }

    fn scope(
        scheduler: &PrefetchScheduler,
        axis: DateAxis,
        base: u32,
        context: common::SearchContext,
    ) -> PassScope {
        PassScope::new(
            scheduler.store(),
            Arc::new(DateWindow::generate(axis, date(base), 7)),
            Arc::new(context),
            CancellationToken::new(),
        )
    }

    fn fast() -> FakeGateway {
        FakeGateway::new(Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_nearest_first_with_index_tie_break() {
        let (gateway, scheduler) = setup(fast());
        let scope = scope(&scheduler, DateAxis::Outbound, 10, one_way(10));

        let report = scheduler.run(&scope, &[6, 0, 5, 1, 4, 2]).await;

        assert_eq!(report.fetched, 6);
        // Window dates are 7..=13; indices 2,4,1,5,0,6.
        assert_eq!(
            gateway.call_dates(),
            vec![date(9), date(11), date(8), date(12), date(7), date(13)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_are_bounded_and_paced() {
        let (gateway, scheduler) = setup(fast());
        let scope = scope(&scheduler, DateAxis::Outbound, 10, one_way(10));

        scheduler.run(&scope, &[1, 2, 4, 5, 6]).await;

        let calls = gateway.calls();
        assert_eq!(calls.len(), 5);
        assert_eq!(gateway.max_in_flight(), 2);

        let chunk_end = |range: std::ops::Range<usize>| {
            calls[range]
                .iter()
                .map(|c| c.finished.expect("finished"))
                .max()
                .expect("non-empty chunk")
        };
        let pacing = Duration::from_millis(500);
        assert!(calls[2].started >= chunk_end(0..2) + pacing);
        assert!(calls[4].started >= chunk_end(2..4) + pacing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_passes_fetch_each_key_once() {
        let (gateway, scheduler) = setup(fast());
        let base = scope(&scheduler, DateAxis::Outbound, 10, one_way(10));
        let scopes: Vec<PassScope> = (0..4)
            .map(|_| PassScope {
                pass: PassId::next(),
                ..base.clone()
            })
            .collect();

        let requests: [&[usize]; 4] = [&[5, 4], &[5], &[4, 5, 6], &[6, 5, 5]];
        join_all(
            scopes
                .iter()
                .zip(requests)
                .map(|(scope, indices)| scheduler.run(scope, indices)),
        )
        .await;

        let dates = gateway.call_dates();
        assert_eq!(dates.iter().filter(|d| **d == date(12)).count(), 1);
        assert_eq!(dates.len(), 3);
        assert!(scheduler.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_key_is_terminal_for_the_window() {
        let (gateway, scheduler) = setup(fast().failing(date(11)));
        let first = scope(&scheduler, DateAxis::Outbound, 10, one_way(10));

        let report = scheduler.run(&first, &[4]).await;
        assert_eq!(report.failed, 1);

        let key = first.window.key(4).expect("in range");
        assert_eq!(scheduler.store().status(&key), Some(EntryStatus::Errored));

        let again = PassScope {
            pass: PassId::next(),
            ..first.clone()
        };
        let report = scheduler.run(&again, &[4]).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(gateway.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_abort_siblings_or_later_chunks() {
        let (gateway, scheduler) = setup(fast().failing(date(9)));
        let scope = scope(&scheduler, DateAxis::Outbound, 10, one_way(10));

        let report = scheduler.run(&scope, &[1, 2, 4]).await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.fetched, 2);
        assert_eq!(gateway.calls().len(), 3);
        let eleventh = scheduler.store().get(&scope.window.key(4).expect("in range"));
        assert_eq!(eleventh.and_then(|e| e.price).map(|m| m.amount_cents), Some(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_lookup_times_out_alone() {
        let (_gateway, scheduler) = setup(fast().hanging(date(9)));
        let scope = scope(&scheduler, DateAxis::Outbound, 10, one_way(10));

        let report = scheduler.run(&scope, &[2, 4]).await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.fetched, 1);
        assert_eq!(
            scheduler.store().status(&scope.window.key(2).expect("in range")),
            Some(EntryStatus::Errored)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_fetches_across_committed_dates() {
        let (gateway, scheduler) = setup(fast());
        let ctx = round_trip(10, 12);
        let all: Vec<usize> = (0..7).collect();

        // Return window 9..=15: only 11..=15 are after departure.
        let ret = scope(&scheduler, DateAxis::Return, 12, ctx.clone());
        let report = scheduler.run(&ret, &all).await;
        assert_eq!(report.rejected, 2);

        // Outbound window 7..=13: only 7..=11 are before return.
        let out = scope(&scheduler, DateAxis::Outbound, 10, ctx);
        let report = scheduler.run(&out, &all).await;
        assert_eq!(report.rejected, 2);

        for call in gateway.calls() {
            match call.axis {
                DateAxis::Return => assert!(call.date > date(10)),
                DateAxis::Outbound => assert!(call.date < date(12)),
            }
        }
        let rejected = ret.window.key(0).expect("in range");
        assert!(scheduler.store().get(&rejected).expect("resolved").is_resolved_null());
    }

    #[tokio::test(start_paused = true)]
    async fn test_return_on_departure_day_is_resolved_null() {
        let (gateway, scheduler) = setup(fast());
        let scope = scope(&scheduler, DateAxis::Return, 10, round_trip(10, 10));

        let report = scheduler.run(&scope, &[3]).await;

        assert_eq!(report.rejected, 1);
        assert!(gateway.calls().is_empty());
        let entry = scheduler
            .store()
            .get(&scope.window.key(3).expect("center"))
            .expect("resolved");
        assert_eq!(entry.status, EntryStatus::Loaded);
        assert_eq!(entry.price, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_batch_stops_and_drops_late_results() {
        let (gateway, scheduler) = setup(fast());
        let scope = scope(&scheduler, DateAxis::Outbound, 10, one_way(10));
        let cancel = scope.cancel.clone();

        let canceller = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        };
        let (report, _) = tokio::join!(scheduler.run(&scope, &[0, 1, 2, 4, 5, 6]), canceller);

        assert!(report.cancelled);
        assert_eq!(gateway.calls().len(), 2);
        assert_eq!(report.discarded, 2);
        assert_eq!(report.fetched, 0);

        let first_chunk = [2, 4].map(|i| scope.window.key(i).expect("in range"));
        for key in first_chunk {
            assert_eq!(scheduler.store().status(&key), Some(EntryStatus::Loading));
        }
        assert!(!scheduler.store().has(&scope.window.key(1).expect("in range")));
        assert!(scheduler.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_writes_are_published() {
        let (tx, mut rx) = broadcast::channel(16);
        let (_gateway, scheduler) = setup(fast());
        let scheduler = scheduler.with_updates(tx);
        let scope = scope(&scheduler, DateAxis::Return, 10, round_trip(10, 13));

        scheduler.run(&scope, &[2, 4]).await;

        let mut updates = Vec::new();
        while let Ok(update) = rx.try_recv() {
            updates.push(update);
        }
        // Index 2 (Dec 9) is resolved-null, index 4 (Dec 11) is priced.
        assert_eq!(updates.len(), 2);
        assert!(updates[0].entry.is_resolved_null());
        assert_eq!(updates[1].entry.price.as_ref().map(|m| m.amount_cents), Some(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_foreign_marker_does_not_drop_index() {
        let (gateway, scheduler) = setup(fast());
        let scope = scope(&scheduler, DateAxis::Outbound, 10, one_way(10));

        // A superseded pass still holds index 0 when this pass plans.
        let stale = PassId::next();
        assert!(scheduler.pending().try_claim(DateAxis::Outbound, 0, stale));
        let pending = scheduler.pending().clone();
        let stale_lets_go = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            pending.release(DateAxis::Outbound, 0, stale);
        };

        let all: Vec<usize> = (0..7).collect();
        let (report, _) = tokio::join!(scheduler.run(&scope, &all), stale_lets_go);

        assert_eq!(report.fetched, 7);
        assert_eq!(report.skipped, 0);
        assert!(gateway.call_dates().contains(&date(7)));
        assert!(scheduler.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_now_skips_resolved_keys() {
        let (gateway, scheduler) = setup(fast());
        let scope = scope(&scheduler, DateAxis::Outbound, 10, one_way(10));

        let first = scheduler.fetch_now(&scope, 5).await;
        let second = scheduler.fetch_now(&scope, 5).await;

        assert_eq!(first.fetched, 1);
        assert_eq!(second.skipped, 1);
        assert_eq!(gateway.call_dates(), vec![date(12)]);
    }
}
