//! HTTP surface: job submission and status polling.
//!
//! The API is stateless; every request reads or writes through the queue
//! handles in `AppState`. Submission returns as soon as the job is
//! durably enqueued; callers poll `GET /jobs/:id` for progress.

pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tracing::info;

use crate::scheduler::{StatusDirectory, TaskQueue};

/// Shared state for all handlers.
pub struct AppState {
    pub generate: TaskQueue,
    pub context: TaskQueue,
    pub directory: StatusDirectory,
}

impl AppState {
    /// Wires the state from the two queue handles. The status directory
    /// probes "generate" before "context"; that order is part of the
    /// polling contract.
    pub fn new(generate: TaskQueue, context: TaskQueue) -> Self {
        let directory = StatusDirectory::new(vec![generate.clone(), context.clone()]);
        Self {
            generate,
            context,
            directory,
        }
    }
}

/// Builds the router with all routes attached.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/generate", post(handlers::submit_sentences))
        .route("/generate-context", post(handlers::submit_context))
        .route("/jobs/:id", get(handlers::job_status))
        .route("/health", get(handlers::health))
        .with_state(state)
}

/// Serves the API until ctrl-c.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> std::io::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "http api listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
