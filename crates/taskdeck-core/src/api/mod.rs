//! Fetch layer: plain request/response mapping, no caching and no retries.

pub mod http;
pub mod store_api;

use async_trait::async_trait;

use crate::error::TaskResult;
use crate::models::{NewTask, QueryDescriptor, Task, TaskPatch};

pub use http::HttpTaskApi;
pub use store_api::StoreApi;

/// The calls the client makes against the task backend.
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// User id behind the configured credentials.
    async fn identity(&self) -> TaskResult<String>;

    async fn list(&self, query: &QueryDescriptor) -> TaskResult<Vec<Task>>;

    async fn create(&self, task: &NewTask) -> TaskResult<Task>;

    async fn update(&self, id: &str, patch: &TaskPatch) -> TaskResult<Task>;

    async fn delete(&self, id: &str) -> TaskResult<()>;
}
