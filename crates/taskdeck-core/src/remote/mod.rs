//! The remote store: the table of task records that everything proxies to.
//!
//! Callers pass the request's `Authorization` value through unmodified. The
//! store is trusted to scope every query to the identity behind it.

pub mod memory;
pub mod supabase;

use async_trait::async_trait;

use crate::error::TaskResult;
use crate::models::{NewTask, QueryDescriptor, Task, TaskPatch};

pub use memory::MemoryStore;
pub use supabase::{SupabaseConfig, SupabaseStore};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// User id behind `auth`, as the store's row ownership sees it.
    async fn identity(&self, auth: Option<&str>) -> TaskResult<String>;

    async fn list(&self, auth: Option<&str>, query: &QueryDescriptor) -> TaskResult<Vec<Task>>;

    async fn insert(&self, auth: Option<&str>, task: &NewTask) -> TaskResult<Task>;

    /// Fails with `NotFound` when no visible row has this id.
    async fn update(&self, auth: Option<&str>, id: &str, patch: &TaskPatch) -> TaskResult<Task>;

    async fn delete(&self, auth: Option<&str>, id: &str) -> TaskResult<()>;
}

/// Token part of a `Bearer <token>` header value. A bare token is accepted too.
pub fn bearer_token(auth: &str) -> Option<&str> {
    let token = auth
        .strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .unwrap_or(auth)
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("abc"), Some("abc"));
        assert_eq!(bearer_token("Bearer "), None);
    }
}
