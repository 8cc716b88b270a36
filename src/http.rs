//! HTTP liveness/readiness/metrics surface, mirroring
//! `original_source/main.go`'s `/`, `/isAlive`, `/isReady`, `/metrics`
//! handlers, rebuilt on `axum` (pack precedent: `other_examples`
//! reconcile.rs, `Cthede11-Guardian-Server-Manager/hostd`).
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::metrics::Metrics;

#[derive(Clone)]
struct AppState {
    metrics: Arc<Metrics>,
}

pub fn router(metrics: Arc<Metrics>) -> Router {
    let state = AppState { metrics };
    Router::new()
        .route("/", get(|| async { "babylon" }))
        .route("/isAlive", get(|| async { "ok" }))
        .route("/isReady", get(|| async { "ok" }))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.encode()
}

pub async fn serve(port: &str, metrics: Arc<Metrics>, cancel: CancellationToken) -> std::io::Result<()> {
    let app = router(metrics);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!("http server listening on :{port}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
