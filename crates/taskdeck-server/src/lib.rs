//! REST backend for the task list: the task endpoints over a [`TaskStore`],
//! either the in-process table or a Supabase project, plus a change stream
//! when the backend publishes one.

pub mod config;
pub mod error;
pub mod http;

use std::sync::Arc;

use anyhow::{Context, Result};
use taskdeck_core::remote::{MemoryStore, SupabaseStore, TaskStore};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

pub use config::{Backend, ServerConfig};
pub use http::{build_router, AppState};

/// Store plus change feed for `backend`. Only the in-process table
/// publishes changes; a Supabase project serves its own realtime channel.
pub fn build_state(backend: &Backend) -> Result<AppState> {
    Ok(match backend {
        Backend::Memory => {
            let store = Arc::new(MemoryStore::new());
            AppState::new(store.clone()).with_feed(store)
        }
        Backend::Supabase(config) => {
            let store: Arc<dyn TaskStore> =
                Arc::new(SupabaseStore::new(config.clone()).context("Failed to build Supabase client")?);
            AppState::new(store)
        }
    })
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let state = build_state(&config.backend)?;
    let app = build_router(state, &config.allowed_origins);

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!(
        addr = %bind_addr,
        backend = match config.backend {
            Backend::Memory => "memory",
            Backend::Supabase(_) => "supabase",
        },
        "task server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("task server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
