use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Sse,
    },
    routing::{get, put},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use taskdeck_core::models::{ListParams, NewTask, QueryDescriptor, RemoteEvent, Task, TaskPatch};
use taskdeck_core::realtime::sse::{CHANGE_EVENT, READY_EVENT};
use taskdeck_core::realtime::{ChangeFeed, FeedChannel};
use taskdeck_core::remote::TaskStore;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, info, warn};

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TaskStore>,
    /// Source for `/tasks/changes`. `None` when the backend has no feed.
    pub feed: Option<Arc<dyn ChangeFeed>>,
}

impl AppState {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store, feed: None }
    }

    pub fn with_feed(mut self, feed: Arc<dyn ChangeFeed>) -> Self {
        self.feed = Some(feed);
        self
    }
}

/// Insert body. Every field is optional here so a missing title gets the
/// same 400 as a blank one.
#[derive(Debug, Deserialize)]
struct CreateTaskBody {
    title: Option<String>,
    description: Option<String>,
}

pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/session", get(session).fallback(method_not_allowed))
        .route("/tasks/changes", get(task_changes).fallback(method_not_allowed))
        .route(
            "/tasks",
            get(list_tasks)
                .post(create_task)
                .fallback(method_not_allowed),
        )
        .route(
            "/tasks/:id",
            put(update_task)
                .delete(delete_task)
                .fallback(method_not_allowed),
        )
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// Passed through to the store untouched.
fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
}

async fn health() -> &'static str {
    "ok"
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

/// GET /session
async fn session(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>, ApiError> {
    let user_id = state.store.identity(authorization(&headers)).await?;
    Ok(Json(json!({ "user_id": user_id })))
}

/// GET /tasks/changes
///
/// Server-sent events: one `ready` event naming the caller, then a `change`
/// event per record the caller owns.
async fn task_changes(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let user_id = state.store.identity(authorization(&headers)).await?;
    let feed = state.feed.as_ref().ok_or(ApiError::FeedUnavailable)?;
    let channel = feed.open(&user_id).await?;
    info!(user_id = %user_id, "change stream opened");
    Ok(Sse::new(change_stream(channel, user_id)).keep_alive(KeepAlive::default()))
}

fn change_stream(mut channel: FeedChannel, user_id: String) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let ready = json!({ "user_id": &user_id });
        yield Ok(Event::default().event(READY_EVENT).data(ready.to_string()));

        while let Some(record) = channel.recv().await {
            // Upstream deletes are not filtered by owner; this stream is
            let owned = RemoteEvent::from_record(&record)
                .map(|event| event.is_owned_by(&user_id))
                .unwrap_or(false);
            if !owned {
                continue;
            }
            match serde_json::to_string(&record) {
                Ok(data) => {
                    yield Ok(Event::default().event(CHANGE_EVENT).data(data));
                }
                Err(e) => warn!(error = %e, "failed to encode change record"),
            }
        }
        debug!(user_id = %user_id, "change stream ended");
    }
}

/// GET /tasks?search=&sort=&status=
async fn list_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let query = QueryDescriptor::from(params);
    let tasks = state.store.list(authorization(&headers), &query).await?;
    debug!(count = tasks.len(), ?query, "listed tasks");
    Ok(Json(tasks))
}

/// POST /tasks
async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CreateTaskBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let new_task = NewTask::new(body.title.as_deref().unwrap_or_default(), body.description.as_deref())?;
    let task = state.store.insert(authorization(&headers), &new_task).await?;
    debug!(id = %task.id, "created task");
    Ok((StatusCode::CREATED, Json(task)))
}

/// PUT /tasks/:id
async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<TaskPatch>, JsonRejection>,
) -> Result<Json<Task>, ApiError> {
    let Json(patch) = body?;
    let patch = patch.validate()?;
    let task = state.store.update(authorization(&headers), &id, &patch).await?;
    debug!(id = %task.id, "updated task");
    Ok(Json(task))
}

/// DELETE /tasks/:id
async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    state.store.delete(authorization(&headers), &id).await?;
    debug!(id, "deleted task");
    Ok(StatusCode::NO_CONTENT)
}
