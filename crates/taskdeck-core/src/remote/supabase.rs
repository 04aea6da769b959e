use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::TaskStore;
use crate::constants::TASKS_TABLE;
use crate::error::{TaskError, TaskResult};
use crate::models::{NewTask, QueryDescriptor, SortKey, StatusFilter, Task, TaskPatch};

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`
    pub url: String,
    /// Anon (or service) key, sent as `apikey` on every request.
    pub key: String,
    pub timeout: Option<Duration>,
}

/// PostgREST error body.
#[derive(Debug, Deserialize)]
struct PostgrestError {
    message: String,
}

/// The part of the GoTrue user object we need.
#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
}

/// Task table behind Supabase's PostgREST endpoint.
///
/// Row-level security does the per-user scoping: the caller's Authorization
/// header is forwarded as-is, and without one the request runs with the
/// project key alone.
pub struct SupabaseStore {
    rest_url: String,
    user_url: String,
    key: String,
    client: reqwest::Client,
}

impl SupabaseStore {
    pub fn new(config: SupabaseConfig) -> TaskResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let base = config.url.trim_end_matches('/');
        Ok(Self {
            rest_url: format!("{}/rest/v1/{}", base, TASKS_TABLE),
            user_url: format!("{}/auth/v1/user", base),
            key: config.key,
            client: builder.build()?,
        })
    }

    fn request(&self, method: Method, auth: Option<&str>) -> RequestBuilder {
        let authorization = auth
            .map(str::to_string)
            .unwrap_or_else(|| format!("Bearer {}", self.key));
        self.client
            .request(method, &self.rest_url)
            .header("apikey", &self.key)
            .header("Authorization", authorization)
    }

    async fn send(&self, builder: RequestBuilder) -> TaskResult<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<PostgrestError>(&text)
            .map(|e| e.message)
            .unwrap_or(text);
        warn!(%status, %message, "supabase request failed");

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TaskError::Auth(message),
            _ => TaskError::Transport(message),
        })
    }

    /// Returns the first row of a `return=representation` response.
    async fn single_row(&self, builder: RequestBuilder, id: Option<&str>) -> TaskResult<Task> {
        let rows: Vec<Task> = self
            .send(builder.header("Prefer", "return=representation"))
            .await?
            .json()
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| TaskError::NotFound(id.unwrap_or("inserted row").to_string()))
    }
}

/// PostgREST filter and order parameters for a list query.
pub(crate) fn list_params(query: &QueryDescriptor) -> Vec<(&'static str, String)> {
    let mut params = vec![("select", "*".to_string())];

    match query.status {
        StatusFilter::All => {}
        StatusFilter::Complete => params.push(("is_complete", "eq.true".to_string())),
        StatusFilter::Incomplete => params.push(("is_complete", "eq.false".to_string())),
    }

    if !query.search.is_empty() {
        params.push(("title", format!("ilike.*{}*", query.search)));
    }

    let order = match query.sort {
        SortKey::Name => "title.asc",
        SortKey::Status => "is_complete.asc",
        SortKey::CreatedAt => "created_at.desc",
    };
    params.push(("order", order.to_string()));
    params
}

#[async_trait]
impl TaskStore for SupabaseStore {
    /// Resolved by the auth service, so an expired or forged token fails here.
    async fn identity(&self, auth: Option<&str>) -> TaskResult<String> {
        let auth = auth.ok_or_else(|| TaskError::Auth("Missing Authorization header".to_string()))?;
        let builder = self
            .client
            .get(&self.user_url)
            .header("apikey", &self.key)
            .header("Authorization", auth);
        let user: AuthUser = self.send(builder).await?.json().await?;
        Ok(user.id)
    }

    async fn list(&self, auth: Option<&str>, query: &QueryDescriptor) -> TaskResult<Vec<Task>> {
        let builder = self.request(Method::GET, auth).query(&list_params(query));
        let tasks: Vec<Task> = self.send(builder).await?.json().await?;
        debug!(count = tasks.len(), "listed tasks");
        Ok(tasks)
    }

    async fn insert(&self, auth: Option<&str>, task: &NewTask) -> TaskResult<Task> {
        let builder = self
            .request(Method::POST, auth)
            .json(&[task]);
        self.single_row(builder, None).await
    }

    async fn update(&self, auth: Option<&str>, id: &str, patch: &TaskPatch) -> TaskResult<Task> {
        let builder = self
            .request(Method::PATCH, auth)
            .query(&[("id", format!("eq.{}", id))])
            .json(patch);
        self.single_row(builder, Some(id)).await
    }

    async fn delete(&self, auth: Option<&str>, id: &str) -> TaskResult<()> {
        let builder = self
            .request(Method::DELETE, auth)
            .query(&[("id", format!("eq.{}", id))]);
        self.send(builder).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_list_params() {
        let params = list_params(&QueryDescriptor::default());
        assert_eq!(
            params,
            vec![
                ("select", "*".to_string()),
                ("order", "created_at.desc".to_string())
            ]
        );
    }

    #[test]
    fn test_filtered_list_params() {
        let query = QueryDescriptor::new("milk", SortKey::Name, StatusFilter::Incomplete);
        let params = list_params(&query);
        assert!(params.contains(&("is_complete", "eq.false".to_string())));
        assert!(params.contains(&("title", "ilike.*milk*".to_string())));
        assert!(params.contains(&("order", "title.asc".to_string())));
    }

    #[test]
    fn test_rest_url() {
        let store = SupabaseStore::new(SupabaseConfig {
            url: "https://example.supabase.co/".to_string(),
            key: "anon".to_string(),
            timeout: None,
        })
        .unwrap();
        assert_eq!(store.rest_url, "https://example.supabase.co/rest/v1/tasks");
        assert_eq!(store.user_url, "https://example.supabase.co/auth/v1/user");
    }
}
