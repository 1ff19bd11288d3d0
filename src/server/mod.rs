//! Server module - HTTP and WebSocket surface
//!
//! - `POST /api/execute`: accept a run
//! - `GET /ws/run/{run_id}`: per-run streaming channel
//! - `GET /api/languages`, `GET /api/runs/{run_id}`, `GET /health`: diagnostics

mod execute;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tracing::info;

use crate::channel::ChannelHub;
use crate::engine::ExecutionService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ExecutionService>,
    pub hub: Arc<ChannelHub>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/execute", post(execute::accept))
        .route("/api/languages", get(execute::languages))
        .route("/api/runs/{run_id}", get(execute::run_status))
        .route("/health", get(execute::health))
        .route("/ws/run/{run_id}", get(ws::upgrade))
        .with_state(state)
}

/// Serve until Ctrl-C, then stop admitting runs
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    let service = state.service.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            service.shutdown();
        })
        .await
        .context("HTTP server failed")
}
