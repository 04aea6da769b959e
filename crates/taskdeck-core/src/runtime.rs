use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::api::{HttpTaskApi, TaskApi};
use crate::config::CoreConfig;
use crate::error::TaskResult;
use crate::models::{QueryDescriptor, Task, TaskCounts, TaskPatch};
use crate::realtime::{ChangeFeed, ChangeSink, ChangeSubscription, SseFeed, SubscriptionState};
use crate::stats::{SharedSyncStats, SyncStats};
use crate::store::{MergedChange, Reconciler, TaskCache};

/// How often idle views are swept
const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// Cheap, cloneable access to the task cache for callers that do not own the
/// runtime.
#[derive(Clone)]
pub struct TaskHandle {
    reconciler: Arc<Reconciler>,
}

impl TaskHandle {
    pub async fn tasks(&self) -> TaskResult<Vec<Task>> {
        let fetched = self.reconciler.tasks().await?;
        Ok(fetched.unwrap_or_else(|| self.reconciler.cached_tasks()))
    }

    pub async fn set_query(&self, query: QueryDescriptor) -> TaskResult<Vec<Task>> {
        let fetched = self.reconciler.set_query(query).await?;
        Ok(fetched.unwrap_or_else(|| self.reconciler.cached_tasks()))
    }

    pub async fn refresh(&self) -> TaskResult<Vec<Task>> {
        let fetched = self.reconciler.refresh().await?;
        Ok(fetched.unwrap_or_else(|| self.reconciler.cached_tasks()))
    }

    pub fn cached_tasks(&self) -> Vec<Task> {
        self.reconciler.cached_tasks()
    }

    pub async fn create(&self, title: &str, description: Option<&str>) -> TaskResult<Task> {
        self.reconciler.create(title, description).await
    }

    pub async fn update(&self, id: &str, patch: TaskPatch) -> TaskResult<Task> {
        self.reconciler.update(id, patch).await
    }

    pub async fn set_complete(&self, id: &str, is_complete: bool) -> TaskResult<Task> {
        self.reconciler.set_complete(id, is_complete).await
    }

    pub async fn delete(&self, id: &str) -> TaskResult<()> {
        self.reconciler.delete(id).await
    }

    pub fn counts(&self) -> TaskCounts {
        self.reconciler.counts()
    }

    pub fn subscribe_merges(&self) -> broadcast::Receiver<MergedChange> {
        self.reconciler.subscribe_merges()
    }
}

/// Owns the cache, its change subscription and the background sweeper.
///
/// Must be created inside a Tokio runtime.
pub struct TaskRuntime {
    reconciler: Arc<Reconciler>,
    handle: TaskHandle,
    subscription: Option<ChangeSubscription>,
    stats: SharedSyncStats,
    cancel_tx: watch::Sender<bool>,
    sweeper: Option<JoinHandle<()>>,
}

impl TaskRuntime {
    /// `feed` is optional: without one the cache only changes through this
    /// client's own calls and explicit refreshes.
    pub fn new(config: &CoreConfig, api: Arc<dyn TaskApi>, feed: Option<Arc<dyn ChangeFeed>>) -> Self {
        let stats = SharedSyncStats::new();
        let cache = TaskCache::new(config.stale_time, config.idle_eviction);
        let reconciler = Arc::new(Reconciler::new(api, cache, stats.clone()));

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let sweeper = tokio::spawn(sweep_idle_views(reconciler.clone(), cancel_rx));

        Self {
            handle: TaskHandle {
                reconciler: reconciler.clone(),
            },
            reconciler,
            subscription: feed.map(ChangeSubscription::new),
            stats,
            cancel_tx,
            sweeper: Some(sweeper),
        }
    }

    /// Runtime talking to the REST backend at `config.api_url`. Its change
    /// stream is only opened on sign-in.
    pub fn connect(config: &CoreConfig) -> TaskResult<Self> {
        let api = match config.request_timeout {
            Some(timeout) => HttpTaskApi::with_timeout(&config.api_url, config.token.clone(), timeout)?,
            None => HttpTaskApi::new(&config.api_url, config.token.clone()),
        };
        let feed = SseFeed::new(&config.api_url, config.token.clone());
        Ok(Self::new(config, Arc::new(api), Some(Arc::new(feed))))
    }

    pub fn handle(&self) -> TaskHandle {
        self.handle.clone()
    }

    pub fn stats(&self) -> SyncStats {
        self.stats.snapshot()
    }

    pub fn user_id(&self) -> Option<String> {
        self.reconciler.user_id()
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        self.subscription
            .as_ref()
            .map(ChangeSubscription::state)
            .unwrap_or(SubscriptionState::Closed)
    }

    /// Switch the cache to `user_id` and subscribe to their changes. Signing
    /// in as someone else first tears down the previous identity entirely.
    pub async fn sign_in(&mut self, user_id: &str) -> TaskResult<()> {
        if self.reconciler.user_id().as_deref() != Some(user_id) {
            if let Some(subscription) = self.subscription.as_mut() {
                subscription.close().await;
            }
            self.reconciler.set_user(Some(user_id));
        }

        if let Some(subscription) = self.subscription.as_mut() {
            let sink: Arc<dyn ChangeSink> = self.reconciler.clone();
            subscription.open(user_id, sink).await?;
        }
        info!(user_id, "signed in");
        Ok(())
    }

    /// Sign in as whoever the configured credentials belong to.
    pub async fn sign_in_from_session(&mut self) -> TaskResult<String> {
        let user_id = self.reconciler.identity().await?;
        self.sign_in(&user_id).await?;
        Ok(user_id)
    }

    pub async fn sign_out(&mut self) {
        if let Some(subscription) = self.subscription.as_mut() {
            subscription.close().await;
        }
        self.reconciler.set_user(None);
        info!("signed out");
    }

    pub async fn shutdown(mut self) {
        self.sign_out().await;
        let _ = self.cancel_tx.send(true);
        if let Some(sweeper) = self.sweeper.take() {
            let _ = sweeper.await;
        }
        debug!(stats = ?self.stats.snapshot(), "task runtime stopped");
    }
}

impl Drop for TaskRuntime {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

async fn sweep_idle_views(reconciler: Arc<Reconciler>, mut cancel_rx: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(EVICTION_INTERVAL);
    loop {
        tokio::select! {
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                reconciler.evict_idle();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::StoreApi;
    use crate::models::SortKey;
    use crate::remote::{MemoryStore, TaskStore};
    use crate::store::MergeOutcome;
    use crate::NewTask;

    async fn runtime_for(store: &Arc<MemoryStore>, user: &str) -> TaskRuntime {
        let api = Arc::new(StoreApi::new(store.clone(), Some(user)));
        let feed: Arc<dyn ChangeFeed> = store.clone();
        let mut runtime = TaskRuntime::new(&CoreConfig::default(), api, Some(feed));
        runtime.sign_in(user).await.unwrap();
        runtime
    }

    /// Let forwarder and pump tasks run.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_changes_from_another_client_arrive_once() {
        let store = Arc::new(MemoryStore::new());
        let runtime = runtime_for(&store, "alice").await;
        assert_eq!(runtime.subscription_state(), SubscriptionState::Active);

        let handle = runtime.handle();
        assert!(handle.tasks().await.unwrap().is_empty());

        // A second device for the same account
        let other_device = StoreApi::new(store.clone(), Some("alice"));
        let created = other_device
            .create(&NewTask::new("From phone", None).unwrap())
            .await
            .unwrap();
        settle().await;

        let tasks = handle.cached_tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, created.id);

        other_device.delete(&created.id).await.unwrap();
        settle().await;
        assert!(handle.cached_tasks().is_empty());

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_own_create_is_not_duplicated_by_its_echo() {
        let store = Arc::new(MemoryStore::new());
        let runtime = runtime_for(&store, "alice").await;
        let handle = runtime.handle();
        handle.tasks().await.unwrap();

        handle.create("Buy milk", None).await.unwrap();
        settle().await;

        assert_eq!(handle.cached_tasks().len(), 1);
        assert_eq!(runtime.stats().duplicates, 1);
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_other_users_changes_are_invisible() {
        let store = Arc::new(MemoryStore::new());
        let runtime = runtime_for(&store, "alice").await;
        let handle = runtime.handle();
        handle.tasks().await.unwrap();

        let bob = StoreApi::new(store.clone(), Some("bob"));
        let theirs = bob.create(&NewTask::new("Bob's task", None).unwrap()).await.unwrap();
        bob.update(&theirs.id, &TaskPatch::completion(true)).await.unwrap();
        bob.delete(&theirs.id).await.unwrap();
        settle().await;

        assert!(handle.cached_tasks().is_empty());
        // Insert and update are filtered at the feed, the delete reaches the
        // cache and is rejected there
        assert_eq!(runtime.stats().foreign, 1);
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_switching_identity_resets_cache_and_subscription() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert(Some("Bearer alice"), &NewTask::new("alice's", None).unwrap())
            .await
            .unwrap();

        let mut runtime = runtime_for(&store, "alice").await;
        let handle = runtime.handle();
        assert_eq!(handle.tasks().await.unwrap().len(), 1);

        runtime.sign_in("bob").await.unwrap();
        assert_eq!(runtime.user_id().as_deref(), Some("bob"));
        assert!(handle.cached_tasks().is_empty());
        assert_eq!(runtime.subscription_state(), SubscriptionState::Active);

        runtime.sign_out().await;
        assert_eq!(runtime.subscription_state(), SubscriptionState::Closed);
        assert_eq!(runtime.user_id(), None);
    }

    #[tokio::test]
    async fn test_sign_in_from_session_follows_the_token() {
        let store = Arc::new(MemoryStore::new());
        let api = Arc::new(StoreApi::new(store.clone(), Some("carol")));
        let feed: Arc<dyn ChangeFeed> = store.clone();
        let mut runtime = TaskRuntime::new(&CoreConfig::default(), api, Some(feed));

        assert_eq!(runtime.sign_in_from_session().await.unwrap(), "carol");
        assert_eq!(runtime.user_id().as_deref(), Some("carol"));

        let handle = runtime.handle();
        handle.tasks().await.unwrap();
        let mut merges = handle.subscribe_merges();

        let other_device = StoreApi::new(store.clone(), Some("carol"));
        other_device
            .create(&NewTask::new("From laptop", None).unwrap())
            .await
            .unwrap();
        let merged = tokio::time::timeout(Duration::from_secs(1), merges.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merged.outcome, MergeOutcome::Applied);
        assert_eq!(handle.cached_tasks().len(), 1);

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_query_switch_through_handle() {
        let store = Arc::new(MemoryStore::new());
        let runtime = runtime_for(&store, "alice").await;
        let handle = runtime.handle();

        handle.create("b", None).await.unwrap();
        handle.create("a", None).await.unwrap();

        let newest_first = handle.tasks().await.unwrap();
        assert_eq!(newest_first[0].title, "a");

        let by_name = handle
            .set_query(QueryDescriptor::sorted_by(SortKey::Name))
            .await
            .unwrap();
        let titles: Vec<_> = by_name.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "b"]);
        assert_eq!(handle.counts().total, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_idle_views() {
        let store = Arc::new(MemoryStore::new());
        let runtime = runtime_for(&store, "alice").await;
        let handle = runtime.handle();
        handle.tasks().await.unwrap();
        handle
            .set_query(QueryDescriptor::sorted_by(SortKey::Name))
            .await
            .unwrap();

        tokio::time::sleep(crate::constants::IDLE_EVICTION + EVICTION_INTERVAL * 2).await;
        // Only the active view survives
        assert_eq!(runtime.reconciler.evict_idle(), 0);
        runtime.shutdown().await;
    }
}
