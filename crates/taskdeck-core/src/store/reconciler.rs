use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::keyed_lock::KeyedLocks;
use super::task_cache::{MergeOutcome, TaskCache};
use crate::api::TaskApi;
use crate::constants::FEED_CHANNEL_CAPACITY;
use crate::error::TaskResult;
use crate::models::{ChangeRecord, NewTask, QueryDescriptor, RemoteEvent, Task, TaskCounts, TaskPatch};
use crate::realtime::ChangeSink;
use crate::stats::SharedSyncStats;

/// A remote change and what the cache made of it.
#[derive(Debug, Clone)]
pub struct MergedChange {
    pub event: RemoteEvent,
    pub outcome: MergeOutcome,
}

/// Drives the cache: fetches, optimistic mutations and remote merges.
///
/// Views are returned as snapshots. A fetch answers `Ok(None)` when the
/// query moved on (or a mutation landed) before the response arrived.
pub struct Reconciler {
    api: Arc<dyn TaskApi>,
    cache: Mutex<TaskCache>,
    locks: KeyedLocks,
    stats: SharedSyncStats,
    merges: broadcast::Sender<MergedChange>,
}

impl Reconciler {
    pub fn new(api: Arc<dyn TaskApi>, cache: TaskCache, stats: SharedSyncStats) -> Self {
        let (merges, _) = broadcast::channel(FEED_CHANNEL_CAPACITY);
        Self {
            api,
            cache: Mutex::new(cache),
            locks: KeyedLocks::new(),
            stats,
            merges,
        }
    }

    /// Every remote change merged from now on, with its outcome.
    pub fn subscribe_merges(&self) -> broadcast::Receiver<MergedChange> {
        self.merges.subscribe()
    }

    /// Ask the backend who the configured credentials belong to.
    pub async fn identity(&self) -> TaskResult<String> {
        self.api.identity().await
    }

    pub fn stats(&self) -> &SharedSyncStats {
        &self.stats
    }

    pub fn user_id(&self) -> Option<String> {
        self.cache.lock().user_id().map(str::to_string)
    }

    /// Returns whether the identity changed (and the cache was cleared).
    pub fn set_user(&self, user_id: Option<&str>) -> bool {
        let changed = self.cache.lock().set_user(user_id);
        if changed {
            info!(user = ?user_id, "task cache reset for new identity");
        }
        changed
    }

    pub fn query(&self) -> QueryDescriptor {
        self.cache.lock().active().clone()
    }

    // ===== Reads =====

    /// Switch the active query and load it, from cache when fresh.
    pub async fn set_query(&self, query: QueryDescriptor) -> TaskResult<Option<Vec<Task>>> {
        self.cache.lock().set_active(query.clone());
        self.load(query, false).await
    }

    /// The active view, fetched if missing or stale.
    pub async fn tasks(&self) -> TaskResult<Option<Vec<Task>>> {
        let query = self.query();
        self.load(query, false).await
    }

    /// Re-fetch the active view regardless of freshness.
    pub async fn refresh(&self) -> TaskResult<Option<Vec<Task>>> {
        let query = self.query();
        self.load(query, true).await
    }

    /// The active view as cached, without touching the network.
    pub fn cached_tasks(&self) -> Vec<Task> {
        self.cache.lock().active_tasks()
    }

    async fn load(&self, query: QueryDescriptor, force: bool) -> TaskResult<Option<Vec<Task>>> {
        let ticket = {
            let mut cache = self.cache.lock();
            if !force && !cache.needs_fetch(&query) {
                return Ok(cache.read(&query));
            }
            cache.begin_fetch(&query)
        };

        let tasks = self.api.list(&query).await?;

        let mut cache = self.cache.lock();
        if cache.complete_fetch(ticket, tasks) {
            Ok(cache.read(&query))
        } else {
            debug!(?query, "discarding superseded list response");
            self.stats.record(|s| s.discarded_fetches += 1);
            Ok(None)
        }
    }

    // ===== Mutations =====

    /// Create a task. Not optimistic: it appears once the store returns it.
    pub async fn create(&self, title: &str, description: Option<&str>) -> TaskResult<Task> {
        let new_task = NewTask::new(title, description)?;
        let created = self.api.create(&new_task).await?;
        let views = self.cache.lock().insert_created(&created);
        debug!(id = %created.id, views, "created task");
        Ok(created)
    }

    /// Apply `patch` to the cached view immediately, then confirm remotely.
    /// On failure the view is restored exactly and the error returned.
    pub async fn update(&self, id: &str, patch: TaskPatch) -> TaskResult<Task> {
        let patch = patch.validate()?;
        let _guard = self.locks.lock(id).await;

        let token = self.cache.lock().begin_update(id, &patch)?;
        match self.api.update(id, &patch).await {
            Ok(task) => {
                self.cache.lock().commit(token);
                Ok(task)
            }
            Err(e) => {
                self.rolled_back(self.cache.lock().rollback(token));
                warn!(id, error = %e, "task update failed, reverted");
                Err(e)
            }
        }
    }

    pub async fn set_complete(&self, id: &str, is_complete: bool) -> TaskResult<Task> {
        self.update(id, TaskPatch::completion(is_complete)).await
    }

    /// Remove the task from the cached view immediately, then confirm remotely.
    pub async fn delete(&self, id: &str) -> TaskResult<()> {
        let _guard = self.locks.lock(id).await;

        let token = self.cache.lock().begin_delete(id)?;
        match self.api.delete(id).await {
            Ok(()) => {
                self.cache.lock().commit(token);
                Ok(())
            }
            Err(e) => {
                self.rolled_back(self.cache.lock().rollback(token));
                warn!(id, error = %e, "task delete failed, reverted");
                Err(e)
            }
        }
    }

    fn rolled_back(&self, restored: bool) {
        if restored {
            self.stats.record(|s| s.rollbacks += 1);
        }
    }

    // ===== Remote events =====

    pub fn merge_remote_event(&self, event: &RemoteEvent) -> MergeOutcome {
        let outcome = self.cache.lock().merge(event);
        self.stats.record(|s| match outcome {
            MergeOutcome::Applied => s.merged += 1,
            MergeOutcome::Duplicate => s.duplicates += 1,
            MergeOutcome::Foreign => s.foreign += 1,
            MergeOutcome::Deferred => s.deferred += 1,
            _ => {}
        });
        debug!(id = event.task_id(), ?outcome, "merged remote change");
        // Nobody listening is fine
        let _ = self.merges.send(MergedChange {
            event: event.clone(),
            outcome,
        });
        outcome
    }

    // ===== Aggregates and housekeeping =====

    pub fn counts(&self) -> TaskCounts {
        self.cache.lock().counts()
    }

    pub fn evict_idle(&self) -> usize {
        let evicted = self.cache.lock().evict_idle();
        if evicted > 0 {
            debug!(evicted, "evicted idle views");
        }
        evicted
    }
}

impl ChangeSink for Reconciler {
    fn deliver(&self, record: ChangeRecord) {
        match RemoteEvent::from_record(&record) {
            Ok(event) => {
                self.merge_remote_event(&event);
            }
            Err(e) => {
                self.stats.record(|s| s.malformed += 1);
                warn!(error = %e, "ignoring undecodable change notification");
            }
        }
    }
}
