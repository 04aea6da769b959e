use std::sync::{Arc, RwLock};

/// Counters for how the cache reconciled incoming changes
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    /// Remote events applied to a cached view
    pub merged: u64,
    /// Inserts for ids that were already cached
    pub duplicates: u64,
    /// Events tagged with another identity (or none)
    pub foreign: u64,
    /// Events dropped because a local mutation on the same id was in flight
    pub deferred: u64,
    /// Notifications that could not be decoded
    pub malformed: u64,
    /// Optimistic mutations reverted after a failed remote call
    pub rollbacks: u64,
    /// List responses thrown away because the query had moved on
    pub discarded_fetches: u64,
}

/// Thread-safe wrapper for sync stats
#[derive(Debug, Clone, Default)]
pub struct SharedSyncStats {
    inner: Arc<RwLock<SyncStats>>,
}

impl SharedSyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, update: impl FnOnce(&mut SyncStats)) {
        if let Ok(mut stats) = self.inner.write() {
            update(&mut stats);
        }
    }

    pub fn snapshot(&self) -> SyncStats {
        self.inner.read().map(|s| s.clone()).unwrap_or_default()
    }
}
