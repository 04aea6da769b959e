use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

use super::TaskApi;
use crate::error::{TaskError, TaskResult};
use crate::models::{NewTask, QueryDescriptor, Task, TaskPatch};

/// `{ "error": "..." }` body returned by the REST backend.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// `GET /session` body.
#[derive(Debug, Deserialize)]
struct SessionBody {
    user_id: String,
}

/// Client for the `/tasks` REST backend.
pub struct HttpTaskApi {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpTaskApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> TaskResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    fn request(&self, method: Method, segments: &[&str]) -> TaskResult<RequestBuilder> {
        let url = endpoint(&self.base_url, segments)?;
        let builder = self.client.request(method, url);
        Ok(match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn send(&self, builder: RequestBuilder) -> TaskResult<Response> {
        let response = builder.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(rejection(response).await)
    }
}

/// `base_url` with `segments` appended, each one percent-encoded.
pub(crate) fn endpoint(base_url: &str, segments: &[&str]) -> TaskResult<Url> {
    let mut url = Url::parse(base_url)
        .map_err(|e| TaskError::transport(format!("invalid API URL {}: {}", base_url, e)))?;
    url.path_segments_mut()
        .map_err(|()| TaskError::transport(format!("API URL {} cannot take a path", base_url)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Turn a non-success response into an error, using the `{ "error" }` body
/// when there is one.
pub(crate) async fn rejection(response: Response) -> TaskError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    debug!(%status, %message, "task backend rejected request");
    error_from_status(status, message)
}

/// Map a non-success status onto the error taxonomy.
pub fn error_from_status(status: StatusCode, message: String) -> TaskError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => TaskError::Validation(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TaskError::Auth(message),
        StatusCode::NOT_FOUND => TaskError::NotFound(message),
        _ => TaskError::Transport(format!("{}: {}", status, message)),
    }
}

#[async_trait]
impl TaskApi for HttpTaskApi {
    async fn identity(&self) -> TaskResult<String> {
        let builder = self.request(Method::GET, &["session"])?;
        let session: SessionBody = self.send(builder).await?.json().await?;
        Ok(session.user_id)
    }

    async fn list(&self, query: &QueryDescriptor) -> TaskResult<Vec<Task>> {
        let builder = self
            .request(Method::GET, &["tasks"])?
            .query(&query.to_query_pairs());
        Ok(self.send(builder).await?.json().await?)
    }

    async fn create(&self, task: &NewTask) -> TaskResult<Task> {
        let builder = self.request(Method::POST, &["tasks"])?.json(task);
        Ok(self.send(builder).await?.json().await?)
    }

    async fn update(&self, id: &str, patch: &TaskPatch) -> TaskResult<Task> {
        let builder = self.request(Method::PUT, &["tasks", id])?.json(patch);
        Ok(self.send(builder).await?.json().await?)
    }

    async fn delete(&self, id: &str) -> TaskResult<()> {
        let builder = self.request(Method::DELETE, &["tasks", id])?;
        self.send(builder).await?;
        Ok(())
    }
}
