pub mod monitoring;

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use monitoring::{SyncMetrics, SYNC_METRICS};
use prometheus_client::encoding::text::encode;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// Reports healthy once a pooled database connection can be checked out.
async fn health_handler(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    match state.pool.get().await {
        Ok(_) => (StatusCode::OK, "Healthy"),
        Err(err) => {
            error!(event = "health_check_failed", error = %err, "database unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, "Database unavailable")
        }
    }
}

async fn expose_metrics(State(state): State<Arc<AppState>>) -> Result<String, StatusCode> {
    let mut buffer = String::new();
    let registry = state.registry.read().await;
    encode(&mut buffer, &registry).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(buffer)
}

/// Registers the sync metrics once per process.
pub async fn register_metrics(state: &AppState) {
    let mut registry = state.registry.write().await;
    SYNC_METRICS
        .get_or_init(|| async { SyncMetrics::register(&mut registry, "adjustment_sync") })
        .await;
    monitoring::register_build_info_metric(&mut registry, "worker");
}

/// Starts the health/metrics HTTP server; it stops when the shutdown token is cancelled.
pub async fn setup_server_with_addr(
    state: Arc<AppState>,
    addr: SocketAddr,
) -> Result<tokio::task::JoinHandle<()>, std::io::Error> {
    register_metrics(&state).await;

    let shutdown_token = state.shutdown_token.clone();
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(expose_metrics))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(event = "metrics_server_listening", bind = %addr, "serving /health and /metrics");
    let server_handle = tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_token.cancelled().await;
            })
            .await;
        if let Err(err) = served {
            error!(event = "metrics_server_failed", error = %err, "metrics server stopped");
        }
    });

    Ok(server_handle)
}
