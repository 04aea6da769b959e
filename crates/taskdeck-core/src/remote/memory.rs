use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use super::{bearer_token, TaskStore};
use crate::constants::FEED_CHANNEL_CAPACITY;
use crate::error::{TaskError, TaskResult};
use crate::models::{ChangeRecord, ChangeType, NewTask, QueryDescriptor, RemoteEvent, Task, TaskPatch};
use crate::realtime::{ChangeFeed, FeedChannel};

struct MemoryInner {
    /// Insertion order
    tasks: Vec<Task>,
    last_created_at: Option<DateTime<Utc>>,
}

/// In-process task table for local runs and tests.
///
/// The bearer token *is* the user identity, and every query is scoped to it
/// the way row-level security would. Each mutation is also published as a
/// change notification. Like the hosted feed, delete notifications cannot
/// be filtered by owner and reach every subscriber.
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    changes: broadcast::Sender<ChangeRecord>,
    unavailable: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(FEED_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(MemoryInner {
                tasks: Vec::new(),
                last_created_at: None,
            }),
            changes,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate an outage: every call fails with a transport error until
    /// switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn caller(&self, auth: Option<&str>) -> TaskResult<String> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TaskError::transport("store unavailable"));
        }
        auth.and_then(bearer_token)
            .map(str::to_string)
            .ok_or_else(|| TaskError::Auth("Missing Authorization header".to_string()))
    }

    fn publish(&self, record: ChangeRecord) {
        // No subscribers is fine
        let _ = self.changes.send(record);
    }
}

impl MemoryInner {
    /// Strictly increasing so creation order is total even within one tick.
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_created_at {
            if now <= last {
                now = last + ChronoDuration::microseconds(1);
            }
        }
        self.last_created_at = Some(now);
        now
    }

    fn find_mut(&mut self, user: &str, id: &str) -> Option<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id && t.user_id.as_deref() == Some(user))
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn identity(&self, auth: Option<&str>) -> TaskResult<String> {
        self.caller(auth)
    }

    async fn list(&self, auth: Option<&str>, query: &QueryDescriptor) -> TaskResult<Vec<Task>> {
        let user = self.caller(auth)?;
        let inner = self.inner.lock();
        let mut tasks: Vec<Task> = inner
            .tasks
            .iter()
            .filter(|t| t.user_id.as_deref() == Some(user.as_str()) && query.matches(t))
            .cloned()
            .collect();
        query.sort_tasks(&mut tasks);
        Ok(tasks)
    }

    async fn insert(&self, auth: Option<&str>, task: &NewTask) -> TaskResult<Task> {
        let user = self.caller(auth)?;
        let created = {
            let mut inner = self.inner.lock();
            let created = Task {
                id: uuid::Uuid::new_v4().to_string(),
                title: task.title.clone(),
                description: task.description.clone(),
                is_complete: false,
                created_at: inner.next_created_at(),
                user_id: Some(user),
            };
            inner.tasks.push(created.clone());
            created
        };
        debug!(id = %created.id, "memory store inserted task");
        self.publish(ChangeRecord::inserted(&created));
        Ok(created)
    }

    async fn update(&self, auth: Option<&str>, id: &str, patch: &TaskPatch) -> TaskResult<Task> {
        let user = self.caller(auth)?;
        let updated = {
            let mut inner = self.inner.lock();
            let task = inner
                .find_mut(&user, id)
                .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
            task.apply_patch(patch);
            task.clone()
        };
        self.publish(ChangeRecord::updated(&updated));
        Ok(updated)
    }

    async fn delete(&self, auth: Option<&str>, id: &str) -> TaskResult<()> {
        let user = self.caller(auth)?;
        let removed = {
            let mut inner = self.inner.lock();
            let position = inner
                .tasks
                .iter()
                .position(|t| t.id == id && t.user_id.as_deref() == Some(user.as_str()));
            position.map(|index| inner.tasks.remove(index))
        };
        // Deleting nothing succeeds, as it does against Postgres
        if let Some(task) = removed {
            self.publish(ChangeRecord::deleted(&task));
        }
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for MemoryStore {
    async fn open(&self, user_id: &str) -> TaskResult<FeedChannel> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TaskError::transport("realtime unavailable"));
        }

        let mut changes = self.changes.subscribe();
        let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        let user_id = user_id.to_string();

        let forwarder = tokio::spawn(async move {
            loop {
                let record = match changes.recv().await {
                    Ok(record) => record,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "change feed lagged, notifications lost");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if !passes_feed_filter(&record, &user_id) {
                    continue;
                }
                if tx.send(record).await.is_err() {
                    break;
                }
            }
        });

        Ok(FeedChannel::new(rx, Some(forwarder)))
    }
}

/// Inserts and updates are filtered on `user_id`; deletes are not.
fn passes_feed_filter(record: &ChangeRecord, user_id: &str) -> bool {
    if record.event_type == ChangeType::Delete {
        return true;
    }
    RemoteEvent::from_record(record)
        .map(|event| event.is_owned_by(user_id))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SortKey, StatusFilter};

    const ALICE: Option<&str> = Some("Bearer alice");
    const BOB: Option<&str> = Some("Bearer bob");

    fn new_task(title: &str) -> NewTask {
        NewTask::new(title, None).unwrap()
    }

    #[tokio::test]
    async fn test_rows_scoped_to_identity() {
        let store = MemoryStore::new();
        store.insert(ALICE, &new_task("alice task")).await.unwrap();
        store.insert(BOB, &new_task("bob task")).await.unwrap();

        let tasks = store.list(ALICE, &QueryDescriptor::default()).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "alice task");
        assert_eq!(tasks[0].user_id.as_deref(), Some("alice"));
        assert_eq!(store.identity(ALICE).await.unwrap(), "alice");
    }

    #[tokio::test]
    async fn test_missing_token_is_auth_error() {
        let store = MemoryStore::new();
        let result = store.list(None, &QueryDescriptor::default()).await;
        assert!(matches!(result, Err(TaskError::Auth(_))));
    }

    #[tokio::test]
    async fn test_list_sorts_and_filters() {
        let store = MemoryStore::new();
        let first = store.insert(ALICE, &new_task("b")).await.unwrap();
        let second = store.insert(ALICE, &new_task("a")).await.unwrap();
        assert!(second.created_at > first.created_at);

        let by_name = store
            .list(ALICE, &QueryDescriptor::sorted_by(SortKey::Name))
            .await
            .unwrap();
        assert_eq!(by_name[0].id, second.id);

        let newest_first = store.list(ALICE, &QueryDescriptor::default()).await.unwrap();
        assert_eq!(newest_first[0].id, second.id);

        store
            .update(ALICE, &first.id, &TaskPatch::completion(true))
            .await
            .unwrap();
        let done = store
            .list(
                ALICE,
                &QueryDescriptor::new("", SortKey::CreatedAt, StatusFilter::Complete),
            )
            .await
            .unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, first.id);
    }

    #[tokio::test]
    async fn test_update_of_foreign_row_is_not_found() {
        let store = MemoryStore::new();
        let task = store.insert(ALICE, &new_task("mine")).await.unwrap();

        let result = store.update(BOB, &task.id, &TaskPatch::completion(true)).await;
        assert!(matches!(result, Err(TaskError::NotFound(_))));

        // Deleting someone else's row touches nothing
        store.delete(BOB, &task.id).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_outage_is_transport_error() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let result = store.insert(ALICE, &new_task("x")).await;
        assert!(matches!(result, Err(TaskError::Transport(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_feed_filters_by_owner_except_deletes() {
        let store = MemoryStore::new();
        let mut feed = store.open("alice").await.unwrap();

        let bobs = store.insert(BOB, &new_task("bob task")).await.unwrap();
        store.insert(ALICE, &new_task("alice task")).await.unwrap();
        store.delete(BOB, &bobs.id).await.unwrap();

        let first = feed.recv().await.unwrap();
        assert_eq!(first.event_type, ChangeType::Insert);
        let event = RemoteEvent::from_record(&first).unwrap();
        assert!(event.is_owned_by("alice"));

        // Bob's delete still reaches alice's stream
        let second = feed.recv().await.unwrap();
        assert_eq!(second.event_type, ChangeType::Delete);
        let event = RemoteEvent::from_record(&second).unwrap();
        assert!(event.is_owned_by("bob"));
    }
}
