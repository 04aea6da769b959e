use std::sync::Arc;
use std::time::Duration;

use taskdeck_core::api::{HttpTaskApi, TaskApi};
use taskdeck_core::config::CoreConfig;
use taskdeck_core::realtime::{ChangeFeed, SseFeed, SubscriptionState};
use taskdeck_core::remote::MemoryStore;
use taskdeck_core::store::MergeOutcome;
use taskdeck_core::{NewTask, TaskError, TaskPatch, TaskRuntime};
use taskdeck_server::{build_router, AppState};
use tokio::net::TcpListener;

/// Serve a fresh in-memory backend on a random local port.
async fn spawn_server() -> String {
    let store = Arc::new(MemoryStore::new());
    let app = build_router(AppState::new(store.clone()).with_feed(store), &[]);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_runtime_follows_changes_from_another_client() {
    let url = spawn_server().await;
    let config = CoreConfig::new(&url, Some("alice".to_string()));
    let mut runtime = TaskRuntime::connect(&config).unwrap();

    assert_eq!(runtime.sign_in_from_session().await.unwrap(), "alice");
    assert_eq!(runtime.subscription_state(), SubscriptionState::Active);

    let handle = runtime.handle();
    assert!(handle.tasks().await.unwrap().is_empty());
    let mut merges = handle.subscribe_merges();

    let phone = HttpTaskApi::new(&url, Some("alice".to_string()));
    let created = phone
        .create(&NewTask::new("From phone", None).unwrap())
        .await
        .unwrap();

    let merged = tokio::time::timeout(Duration::from_secs(5), merges.recv())
        .await
        .expect("change not delivered")
        .unwrap();
    assert_eq!(merged.event.task_id(), created.id);
    assert_eq!(merged.outcome, MergeOutcome::Applied);
    assert_eq!(handle.cached_tasks()[0].id, created.id);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_stream_for_another_identity_is_refused() {
    let url = spawn_server().await;
    let feed = SseFeed::new(&url, Some("alice".to_string()));

    match feed.open("bob").await {
        Ok(_) => panic!("opened a stream for the wrong identity"),
        Err(e) => assert!(e.is_auth()),
    }
}

#[tokio::test]
async fn test_task_ids_are_escaped_in_paths() {
    let url = spawn_server().await;
    let api = HttpTaskApi::new(&url, Some("alice".to_string()));

    // The id reaches the handler whole instead of splitting into segments
    let err = api
        .update("a/b c", &TaskPatch::completion(true))
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::NotFound(m) if m.contains("a/b c")));
}
