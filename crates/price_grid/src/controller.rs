//! Date strip orchestration.
//!
//! One controller per search session. `start` regenerates both axis windows,
//! seeds their centers with the fare the caller already knows, and kicks off
//! a paced background pass for everything else. Dates the user can see are
//! fetched immediately via `on_visible`. The UI reads `snapshot()` and may
//! `subscribe()` to be told when to read it again.

use std::sync::Arc;
use std::time::Duration;

use common::config::PrefetchConfig;
use common::{
    CacheEntry, CacheKey, CalendarDate, DateAxis, EntryStatus, Error, Money, Result,
    SearchContext, SeedFares,
};
use fare_client::FetchGateway;
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::cache::{PendingWork, PriceCacheStore};
use crate::scheduler::{PassScope, PrefetchScheduler, PriceUpdate};
use crate::validity::ValidityPolicy;
use crate::window::{display_label, DateWindow};

const UPDATE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GridPhase {
    Uninitialized,
    WindowReady,
    /// Background or visible-date lookups are still running.
    Refreshing,
}

/// One rendered date of the strip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateSlot {
    pub index: usize,
    pub date: CalendarDate,
    pub label: String,
    /// Fetched price, or the last known base fare when `estimated`.
    pub price: Option<Money>,
    pub estimated: bool,
    pub loading: bool,
    /// The committed date of this axis.
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridSnapshot {
    pub phase: GridPhase,
    pub outbound: Vec<DateSlot>,
    /// Present for round trips only.
    pub inbound: Option<Vec<DateSlot>>,
}

struct Session {
    context: Arc<SearchContext>,
    /// Base fares shown for dates without a fetched price.
    fallback: SeedFares,
    windows: Vec<Arc<DateWindow>>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl Session {
    fn window(&self, axis: DateAxis) -> Result<&Arc<DateWindow>> {
        self.windows
            .iter()
            .find(|w| w.axis() == axis)
            .ok_or_else(|| Error::InvalidContext(format!("no {} dates for this trip", axis)))
    }
}

pub struct PriceGridController {
    scheduler: Arc<PrefetchScheduler>,
    store: PriceCacheStore,
    policy: ValidityPolicy,
    window_size: usize,
    pacing: Duration,
    updates: broadcast::Sender<PriceUpdate>,
    session: RwLock<Option<Session>>,
}

impl PriceGridController {
    pub fn new(gateway: Arc<dyn FetchGateway>, config: &PrefetchConfig) -> Self {
        let store = PriceCacheStore::new();
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let scheduler = PrefetchScheduler::new(gateway, store.clone(), PendingWork::new(), config)
            .with_updates(updates.clone());

        Self {
            scheduler: Arc::new(scheduler),
            store,
            policy: ValidityPolicy,
            window_size: config.window_size,
            pacing: config.pacing(),
            updates,
            session: RwLock::new(None),
        }
    }

    /// Receive every accepted cache write of the current and later sessions.
    pub fn subscribe(&self) -> broadcast::Receiver<PriceUpdate> {
        self.updates.subscribe()
    }

    /// Begin a session for `context`, superseding any previous one.
    ///
    /// Each window center is seeded from `seeds` when known and searchable.
    /// Every other date is prefetched in the background, nearest first.
    pub async fn start(&self, context: SearchContext, seeds: SeedFares) -> Result<()> {
        let fallback = seeds.clone();
        self.start_with_fallback(context, seeds, fallback).await
    }

    async fn start_with_fallback(
        &self,
        context: SearchContext,
        seeds: SeedFares,
        fallback: SeedFares,
    ) -> Result<()> {
        context.validate()?;
        if self.window_size == 0 {
            return Err(Error::InvalidContext("window size must be > 0".into()));
        }

        let mut guard = self.session.write().await;
        if let Some(previous) = guard.take() {
            previous.cancel.cancel();
            debug!("Superseded session {}->{}", previous.context.origin, previous.context.destination);
        }

        self.store.invalidate();
        self.scheduler.pending().clear();

        let context = Arc::new(context);
        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();
        tasks.close();

        let mut windows = Vec::new();
        let mut passes = Vec::new();
        for axis in context.axes() {
            let Some(base) = context.committed(axis) else {
                continue;
            };
            let window = Arc::new(DateWindow::generate(axis, base, self.window_size));
            let center = window.center_index();

            let mut indices = Vec::with_capacity(window.len());
            for (index, &date) in window.dates().iter().enumerate() {
                let key = CacheKey::new(axis, date);
                let label = display_label(date);
                let seed = seeds
                    .get(axis)
                    .filter(|_| index == center && self.policy.is_fetchable(axis, date, &context));
                match seed {
                    Some(fare) => self.store.put(key, CacheEntry::loaded(key, label, Some(fare.clone()))),
                    None => {
                        self.store.put(key, CacheEntry::empty(key, label));
                        indices.push(index);
                    }
                }
            }

            let scope = PassScope::new(&self.store, Arc::clone(&window), Arc::clone(&context), cancel.clone());
            passes.push((scope, indices));
            windows.push(window);
        }

        let scheduler = Arc::clone(&self.scheduler);
        let pacing = self.pacing;
        tasks.spawn(async move {
            for (n, (scope, indices)) in passes.iter().enumerate() {
                if n > 0 {
                    tokio::select! {
                        _ = scope.cancel.cancelled() => break,
                        _ = tokio::time::sleep(pacing) => {}
                    }
                }
                scheduler.run(scope, indices).await;
            }
        });

        info!(
            "Date strip started: {}->{} dep={} ret={:?} ({} window(s) of {})",
            context.origin,
            context.destination,
            context.departure,
            context.committed(DateAxis::Return),
            windows.len(),
            self.window_size
        );

        *guard = Some(Session {
            context,
            fallback,
            windows,
            cancel,
            tasks,
        });
        Ok(())
    }

    /// Commit the date at `index` of `axis` and restart the session.
    ///
    /// If the choice breaks departure-before-return, the other axis' date is
    /// moved the minimum amount to restore it.
    pub async fn select_date(&self, axis: DateAxis, index: usize) -> Result<()> {
        let (next, seeds, fallback) = {
            let guard = self.session.read().await;
            let session = guard.as_ref().ok_or(Error::NoSession)?;
            let window = session.window(axis)?;
            let date = window.date(index).ok_or(Error::IndexOutOfRange {
                index,
                size: window.len(),
            })?;

            let next = self.policy.restore_validity(axis, date, &session.context);
            if next == *session.context {
                return Ok(());
            }

            let companion = axis.other();
            let adjusted = next.committed(companion) != session.context.committed(companion);
            if adjusted {
                info!(
                    "{} {} moved {} date to {:?}",
                    axis,
                    date,
                    companion,
                    next.committed(companion)
                );
            }

            // The selected slot was priced against the old companion date. It
            // is the fare of the new committed pair only if that date stayed.
            let selected = self.loaded_price(&CacheKey::new(axis, date));
            let known = if adjusted { None } else { selected.clone() };

            let mut seeds = SeedFares::default();
            let mut fallback = SeedFares::default();
            for a in next.axes() {
                seeds.set(a, known.clone());
                let previous = session
                    .fallback
                    .get(a)
                    .cloned()
                    .or_else(|| self.center_price(session, a));
                fallback.set(a, selected.clone().or(previous));
            }
            (next, seeds, fallback)
        };

        self.start_with_fallback(next, seeds, fallback).await
    }

    /// The UI can now see `index` of `axis`. Fetches it right away if it is
    /// still empty. Returns whether a lookup was started.
    pub async fn on_visible(&self, axis: DateAxis, index: usize) -> Result<bool> {
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(Error::NoSession)?;
        let window = session.window(axis)?;
        let key = window.key(index).ok_or(Error::IndexOutOfRange {
            index,
            size: window.len(),
        })?;

        if !matches!(self.store.status(&key), None | Some(EntryStatus::Empty)) {
            return Ok(false);
        }

        let scope = PassScope::new(
            &self.store,
            Arc::clone(window),
            Arc::clone(&session.context),
            session.cancel.clone(),
        );
        let scheduler = Arc::clone(&self.scheduler);
        session.tasks.spawn(async move {
            scheduler.fetch_now(&scope, index).await;
        });
        debug!("{}: visible, fetching now", key);
        Ok(true)
    }

    /// End the session. Lookups still in flight are dropped on arrival.
    pub async fn cancel(&self) {
        if let Some(session) = self.session.write().await.take() {
            session.cancel.cancel();
            info!(
                "Date strip cancelled: {}->{}",
                session.context.origin, session.context.destination
            );
        }
    }

    pub async fn snapshot(&self) -> GridSnapshot {
        let guard = self.session.read().await;
        let Some(session) = guard.as_ref() else {
            return GridSnapshot {
                phase: GridPhase::Uninitialized,
                outbound: Vec::new(),
                inbound: None,
            };
        };

        let phase = if session.tasks.is_empty() {
            GridPhase::WindowReady
        } else {
            GridPhase::Refreshing
        };
        let slots = |axis: DateAxis| {
            session.window(axis).ok().map(|w| {
                let fallback = session
                    .fallback
                    .get(axis)
                    .cloned()
                    .or_else(|| self.center_price(session, axis));
                self.slots(w, fallback.as_ref())
            })
        };

        GridSnapshot {
            phase,
            outbound: slots(DateAxis::Outbound).unwrap_or_default(),
            inbound: slots(DateAxis::Return),
        }
    }

    fn loaded_price(&self, key: &CacheKey) -> Option<Money> {
        self.store
            .get(key)
            .filter(|e| e.status == EntryStatus::Loaded)
            .and_then(|e| e.price)
    }

    /// Fetched price of the committed date of `axis`, if any.
    fn center_price(&self, session: &Session, axis: DateAxis) -> Option<Money> {
        let window = session.window(axis).ok()?;
        let key = window.key(window.center_index())?;
        self.loaded_price(&key)
    }

    fn slots(&self, window: &DateWindow, fallback: Option<&Money>) -> Vec<DateSlot> {
        window
            .dates()
            .iter()
            .enumerate()
            .map(|(index, &date)| {
                let entry = self.store.get(&CacheKey::new(window.axis(), date));
                let status = entry.as_ref().map_or(EntryStatus::Empty, |e| e.status);

                // Anything not loaded shows the last known base fare instead.
                let (price, estimated) = match entry {
                    Some(e) if status == EntryStatus::Loaded => (e.price, false),
                    _ => (fallback.cloned(), fallback.is_some()),
                };

                DateSlot {
                    index,
                    date,
                    label: display_label(date),
                    price,
                    estimated,
                    loading: status == EntryStatus::Loading,
                    selected: index == window.center_index(),
                }
            })
            .collect()
    }

    /// True when no lookup of the current session is running.
    pub async fn is_idle(&self) -> bool {
        self.session
            .read()
            .await
            .as_ref()
            .map_or(true, |s| s.tasks.is_empty())
    }

    /// Wait for every lookup of the current session to finish.
    pub async fn wait_idle(&self) {
        let tasks = match self.session.read().await.as_ref() {
            Some(session) => session.tasks.clone(),
            None => return,
        };
        tasks.wait().await;
    }

    pub async fn context(&self) -> Option<SearchContext> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| SearchContext::clone(&s.context))
    }

    pub async fn window(&self, axis: DateAxis) -> Option<DateWindow> {
        let guard = self.session.read().await;
        let session = guard.as_ref()?;
        session.window(axis).ok().map(|w| DateWindow::clone(w))
    }
}

impl Drop for PriceGridController {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
        }
    }
}
