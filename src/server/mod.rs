//! HTTP and WebSocket front end over a [`Foundry`].
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST {prefix}/generate` | create a project and start a run |
//! | `GET {prefix}/projects/{id}/status` | current record |
//! | `GET {prefix}/projects/{id}/files` | generated tree |
//! | `GET {prefix}/projects/{id}/preview` | preview locator |
//! | `GET {prefix}/projects/{id}/preview/{*path}` | generated file contents |
//! | `POST {prefix}/projects/{id}/regenerate` | run again |
//! | `GET /ws/{project_id}` | snapshot, history, then live events |
//! | `GET /health` | liveness |

pub mod api;
pub mod ws;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Json, Router, routing::get};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::foundry::Foundry;
use api::{AppState, SharedState};

/// Assemble the full router. The API routes live under
/// `server.api_prefix`; a prefix of `/` mounts them at the root.
pub fn build_router(state: SharedState) -> Router {
    let prefix = state
        .foundry
        .config()
        .server
        .api_prefix
        .trim_end_matches('/')
        .to_string();

    let router = Router::new()
        .route("/health", get(health))
        .route("/ws/{project_id}", get(ws::ws_handler));

    let router = if prefix.is_empty() {
        router.merge(api::api_router())
    } else {
        router.nest(&prefix, api::api_router())
    };

    router.with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Start the foundry, serve until Ctrl+C, then stop every run.
pub async fn start_server(foundry: Arc<Foundry>) -> Result<()> {
    foundry.start().await?;

    let server = foundry.config().server.clone();
    let state = Arc::new(AppState {
        foundry: foundry.clone(),
    });

    let mut app = build_router(state);
    if server.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", server.host, server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, api_prefix = %server.api_prefix, "App foundry listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    foundry.shutdown().await;
    served?;
    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}
