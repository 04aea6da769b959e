use std::future::Future;

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use serde_json::{json, Value};
use taskdeck_core::models::{QueryDescriptor, RemoteChange, SortKey, StatusFilter, TaskPatch};
use taskdeck_core::runtime::{TaskHandle, TaskRuntime};
use taskdeck_core::store::MergedChange;
use taskdeck_core::TaskResult;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// CLI command parsed from arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// List tasks for a query
    List {
        search: Option<String>,
        sort: Option<String>,
        status: Option<String>,
    },
    /// Create a task
    Add {
        title: String,
        description: Option<String>,
    },
    /// Change title and/or description
    Edit {
        id: String,
        title: Option<String>,
        description: Option<String>,
    },
    /// Mark tasks complete
    Done { ids: Vec<String> },
    /// Mark tasks incomplete
    Undo { ids: Vec<String> },
    /// Delete tasks
    Rm { ids: Vec<String> },
    /// Total / complete / incomplete
    Count,
}

/// Run one command and return its JSON result.
pub async fn execute(handle: &TaskHandle, command: CliCommand) -> Result<Value> {
    debug!(?command, "executing");
    match command {
        CliCommand::List { search, sort, status } => {
            let query = QueryDescriptor::new(
                search.as_deref().unwrap_or_default(),
                sort.as_deref().map(SortKey::from_param).unwrap_or_default(),
                status.as_deref().map(StatusFilter::from_param).unwrap_or_default(),
            );
            let tasks = handle.set_query(query).await.context("Failed to list tasks")?;
            Ok(serde_json::to_value(tasks)?)
        }
        CliCommand::Add { title, description } => {
            let task = handle
                .create(&title, description.as_deref())
                .await
                .context("Failed to create task")?;
            Ok(serde_json::to_value(task)?)
        }
        CliCommand::Edit { id, title, description } => {
            let patch = TaskPatch {
                title,
                description,
                is_complete: None,
            };
            if patch.is_empty() {
                bail!("Nothing to change: pass --title and/or --description");
            }
            // Load the view first so a failed edit has something to roll back to
            handle.tasks().await.context("Failed to load tasks")?;
            let task = handle
                .update(&id, patch)
                .await
                .with_context(|| format!("Failed to update task {}", id))?;
            Ok(serde_json::to_value(task)?)
        }
        CliCommand::Done { ids } => set_complete(handle, ids, true).await,
        CliCommand::Undo { ids } => set_complete(handle, ids, false).await,
        CliCommand::Rm { ids } => {
            handle.tasks().await.context("Failed to load tasks")?;
            let results = join_all(ids.iter().map(|id| handle.delete(id))).await;
            Ok(summarize(&ids, results.into_iter().map(|r| r.map(|()| Value::Null))))
        }
        CliCommand::Count => {
            handle.tasks().await.context("Failed to load tasks")?;
            Ok(serde_json::to_value(handle.counts())?)
        }
    }
}

async fn set_complete(handle: &TaskHandle, ids: Vec<String>, is_complete: bool) -> Result<Value> {
    handle.tasks().await.context("Failed to load tasks")?;
    let results = join_all(ids.iter().map(|id| handle.set_complete(id, is_complete))).await;
    Ok(summarize(
        &ids,
        results
            .into_iter()
            .map(|r| r.and_then(|task| serde_json::to_value(task).map_err(Into::into))),
    ))
}

/// Sign in as the token's owner and emit one JSON line per change merged
/// into the cache, until `stop` resolves.
pub async fn watch(
    runtime: &mut TaskRuntime,
    stop: impl Future<Output = ()>,
    mut emit: impl FnMut(Value),
) -> Result<()> {
    let handle = runtime.handle();
    let mut merges = handle.subscribe_merges();
    let user_id = runtime
        .sign_in_from_session()
        .await
        .context("Failed to open change stream")?;
    let tasks = handle.tasks().await.context("Failed to load tasks")?;
    emit(json!({ "watching": user_id, "tasks": tasks.len() }));

    tokio::pin!(stop);
    loop {
        tokio::select! {
            _ = &mut stop => break,
            merged = merges.recv() => match merged {
                Ok(merged) => emit(merged_change(&merged)),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "missed merged changes"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

fn merged_change(merged: &MergedChange) -> Value {
    let (event, task) = match &merged.event.change {
        RemoteChange::Inserted(task) => ("insert", Some(task)),
        RemoteChange::Updated(task) => ("update", Some(task)),
        RemoteChange::Deleted { .. } => ("delete", None),
    };
    json!({
        "event": event,
        "id": merged.event.task_id(),
        "outcome": merged.outcome.as_str(),
        "task": task,
    })
}

/// One entry per id, in argument order. Failures are reported, not fatal.
fn summarize(ids: &[String], results: impl Iterator<Item = TaskResult<Value>>) -> Value {
    let entries: Vec<Value> = ids
        .iter()
        .zip(results)
        .map(|(id, result)| match result {
            Ok(Value::Null) => json!({ "id": id, "ok": true }),
            Ok(task) => json!({ "id": id, "ok": true, "task": task }),
            Err(e) => json!({ "id": id, "ok": false, "error": e.to_string() }),
        })
        .collect();
    Value::Array(entries)
}
