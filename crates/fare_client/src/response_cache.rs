//! Whole-response cache keyed by the full search parameter set.
//!
//! Uses `DashMap` so the main search and the date strip can share it
//! without a global lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::rest::{FareSearchResponse, SearchQuery};

/// A cached response with staleness tracking.
#[derive(Debug, Clone)]
pub struct CachedSearch {
    pub response: Arc<FareSearchResponse>,
    pub fetched_at: Instant,
}

impl CachedSearch {
    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() > ttl
    }
}

/// Thread-safe response cache. Cloning shares the same storage.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    entries: Arc<DashMap<SearchQuery, CachedSearch>>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// The cached response for `query`, unless missing or stale.
    pub fn get_fresh(&self, query: &SearchQuery) -> Option<Arc<FareSearchResponse>> {
        let entry = self.entries.get(query)?;
        if entry.is_stale(self.ttl) {
            return None;
        }
        Some(Arc::clone(&entry.response))
    }

    pub fn insert(&self, query: SearchQuery, response: Arc<FareSearchResponse>) {
        self.entries.insert(
            query,
            CachedSearch {
                response,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Drop every stale entry. Returns how many were removed.
    pub fn purge_stale(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, cached| !cached.is_stale(ttl));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
