//! Price cache and in-flight markers.
//!
//! Both live in `DashMap`s so snapshot reads never block the scheduler.
//! Writes that resolve a fetch are only accepted from the pass that moved
//! the key to `Loading`, and only within the epoch that pass started in.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use common::{CacheEntry, CacheKey, DateAxis, EntryStatus};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Identity of one scheduling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(u64);

impl PassId {
    /// A process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        PassId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pass-{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Slot {
    entry: CacheEntry,
    owner: Option<PassId>,
}

/// Keyed store of per-(axis, date) price entries.
///
/// Cloning shares the same storage.
#[derive(Debug, Clone, Default)]
pub struct PriceCacheStore {
    slots: Arc<DashMap<CacheKey, Slot>>,
    epoch: Arc<AtomicU64>,
}

impl PriceCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.slots.get(key).map(|slot| slot.entry.clone())
    }

    pub fn has(&self, key: &CacheKey) -> bool {
        self.slots.contains_key(key)
    }

    pub fn status(&self, key: &CacheKey) -> Option<EntryStatus> {
        self.slots.get(key).map(|slot| slot.entry.status)
    }

    /// Unconditional write. Drops any fetch ownership on the key.
    pub fn put(&self, key: CacheKey, entry: CacheEntry) {
        self.slots.insert(key, Slot { entry, owner: None });
    }

    /// Current window epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Discard every entry and start a new epoch. Returns the new epoch.
    ///
    /// The epoch is bumped before clearing, so a pass from the old epoch can
    /// never claim a key of the new window.
    pub fn invalidate(&self) -> u64 {
        let next = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.slots.clear();
        next
    }

    /// Move `key` from absent/`Empty` to `Loading`, owned by `pass`.
    ///
    /// Fails if the key is already loading or resolved, or if `epoch` is no
    /// longer current.
    pub fn begin_loading(&self, key: CacheKey, label: &str, pass: PassId, epoch: u64) -> bool {
        match self.slots.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().entry.status != EntryStatus::Empty || self.epoch() != epoch {
                    return false;
                }
                let slot = occupied.get_mut();
                slot.entry.status = EntryStatus::Loading;
                slot.owner = Some(pass);
                true
            }
            Entry::Vacant(vacant) => {
                if self.epoch() != epoch {
                    return false;
                }
                vacant.insert(Slot {
                    entry: CacheEntry::loading(key, label),
                    owner: Some(pass),
                });
                true
            }
        }
    }

    /// Write the outcome of a fetch. Accepted only if `key` is still
    /// `Loading` and owned by `pass`.
    pub fn resolve(&self, pass: PassId, entry: CacheEntry) -> bool {
        let Some(mut slot) = self.slots.get_mut(&entry.key) else {
            return false;
        };
        if slot.entry.status != EntryStatus::Loading || slot.owner != Some(pass) {
            return false;
        }
        *slot = Slot { entry, owner: None };
        true
    }

    /// Record a candidate that must not be fetched as `Loaded` with no price.
    /// Leaves loading or resolved keys untouched.
    pub fn resolve_null(&self, key: CacheKey, label: &str, epoch: u64) -> bool {
        let resolved = Slot {
            entry: CacheEntry::loaded(key, label, None),
            owner: None,
        };
        match self.slots.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().entry.status != EntryStatus::Empty || self.epoch() != epoch {
                    return false;
                }
                occupied.insert(resolved);
                true
            }
            Entry::Vacant(vacant) => {
                if self.epoch() != epoch {
                    return false;
                }
                vacant.insert(resolved);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// In-flight markers keyed by (axis, window index).
#[derive(Debug, Clone, Default)]
pub struct PendingWork {
    inner: Arc<DashMap<(DateAxis, usize), PassId>>,
}

impl PendingWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark (axis, index) as in flight for `pass`. False if already marked.
    pub fn try_claim(&self, axis: DateAxis, index: usize, pass: PassId) -> bool {
        match self.inner.entry((axis, index)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(pass);
                true
            }
        }
    }

    /// Clear the marker, but only if `pass` still owns it.
    pub fn release(&self, axis: DateAxis, index: usize, pass: PassId) -> bool {
        self.inner
            .remove_if(&(axis, index), |_, owner| *owner == pass)
            .is_some()
    }

    pub fn contains(&self, axis: DateAxis, index: usize) -> bool {
        self.inner.contains_key(&(axis, index))
    }

    pub fn clear(&self) {
        self.inner.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
