//! HTTP + WebSocket front for [`RelayHub`]: issues sessions for stations
//! and relays pairing events between a station and its remote.

use std::{future::Future, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use booth_channel::RelayHub;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

pub mod config;
pub mod telemetry;

mod handlers;
mod websocket;

pub use config::{Cli, RelayConfig};

pub struct AppState {
    pub hub: RelayHub,
    pub metrics: Option<PrometheusHandle>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/api/generate-session", post(handlers::generate_session))
        .route("/api/sessions/:id", get(handlers::session_status))
        .route("/ws", get(websocket::ws_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    hub: RelayHub,
    metrics: Option<PrometheusHandle>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let recycler = hub.spawn_recycler();
    let state = Arc::new(AppState { hub, metrics });
    let local_addr = listener.local_addr().context("listener has no address")?;
    info!(%local_addr, "booth relay listening");

    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("server shutdown with error");
    recycler.abort();
    result
}

pub async fn run(config: RelayConfig, metrics: Option<PrometheusHandle>) -> Result<()> {
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    let hub = RelayHub::new(config.hub.clone());

    serve(listener, hub, metrics, shutdown_signal()).await?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        "shutdown signal received; draining"
    );
    tokio::time::sleep(config.shutdown_grace).await;
    info!("graceful shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
