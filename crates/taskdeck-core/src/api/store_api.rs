use std::sync::Arc;

use async_trait::async_trait;

use super::TaskApi;
use crate::error::TaskResult;
use crate::models::{NewTask, QueryDescriptor, Task, TaskPatch};
use crate::remote::TaskStore;

/// Talks to a [`TaskStore`] directly, skipping the REST hop.
///
/// Used when the client and the store live in one process (local mode and
/// tests). The token is sent as a bearer Authorization value.
pub struct StoreApi {
    store: Arc<dyn TaskStore>,
    authorization: Option<String>,
}

impl StoreApi {
    pub fn new(store: Arc<dyn TaskStore>, token: Option<&str>) -> Self {
        Self {
            store,
            authorization: token.map(|t| format!("Bearer {}", t)),
        }
    }

    fn auth(&self) -> Option<&str> {
        self.authorization.as_deref()
    }
}

#[async_trait]
impl TaskApi for StoreApi {
    async fn identity(&self) -> TaskResult<String> {
        self.store.identity(self.auth()).await
    }

    async fn list(&self, query: &QueryDescriptor) -> TaskResult<Vec<Task>> {
        self.store.list(self.auth(), query).await
    }

    async fn create(&self, task: &NewTask) -> TaskResult<Task> {
        self.store.insert(self.auth(), task).await
    }

    async fn update(&self, id: &str, patch: &TaskPatch) -> TaskResult<Task> {
        self.store.update(self.auth(), id, patch).await
    }

    async fn delete(&self, id: &str) -> TaskResult<()> {
        self.store.delete(self.auth(), id).await
    }
}
