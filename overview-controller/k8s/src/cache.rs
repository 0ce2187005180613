//! In-memory snapshot cache for the cluster overview.
//!
//! The only process-wide mutable state in the core. All access goes through
//! one read-write lock; `set` replaces the entry wholesale so readers observe
//! either the old snapshot or the new one, never a torn mix. The `refreshing`
//! flag is the single-flight guard for refreshes.

use crate::aggregate::ClusterOverviewResponse;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct CacheEntry {
    data: Option<Arc<ClusterOverviewResponse>>,
    last_updated: Option<Instant>,
    refreshing: bool,
}

pub struct ClusterCache {
    entry: RwLock<Option<CacheEntry>>,
}

impl Default for ClusterCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterCache {
    pub fn new() -> Self {
        Self {
            entry: RwLock::new(None),
        }
    }

    /// Non-blocking read; `None` when the cache has never been populated or
    /// was invalidated.
    pub fn get(&self) -> Option<Arc<ClusterOverviewResponse>> {
        self.entry.read().as_ref().and_then(|e| e.data.clone())
    }

    /// Atomically replaces the snapshot and stamps its age. Preserves an
    /// in-progress `refreshing` flag so set-during-refresh cannot clear the
    /// single-flight guard.
    pub fn set(&self, data: Arc<ClusterOverviewResponse>) {
        let mut entry = self.entry.write();
        let refreshing = entry.as_ref().map(|e| e.refreshing).unwrap_or(false);
        *entry = Some(CacheEntry {
            data: Some(data),
            last_updated: Some(Instant::now()),
            refreshing,
        });
    }

    /// Snapshot age; zero when the cache is empty.
    pub fn age(&self) -> Duration {
        self.entry
            .read()
            .as_ref()
            .and_then(|e| e.last_updated)
            .map(|at| at.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    pub fn invalidate(&self) {
        let mut entry = self.entry.write();
        if let Some(e) = entry.as_mut() {
            e.data = None;
            e.last_updated = None;
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.entry
            .read()
            .as_ref()
            .map(|e| e.refreshing)
            .unwrap_or(false)
    }

    /// Flips the single-flight flag, creating an empty entry when marking an
    /// empty cache as refreshing.
    pub fn mark_refreshing(&self, refreshing: bool) {
        let mut entry = self.entry.write();
        match entry.as_mut() {
            Some(e) => e.refreshing = refreshing,
            None if refreshing => {
                *entry = Some(CacheEntry {
                    data: None,
                    last_updated: None,
                    refreshing: true,
                });
            }
            None => {}
        }
    }
}
