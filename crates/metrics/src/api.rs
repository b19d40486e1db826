//! Minimal HTTP surface for Prometheus scraping, started alongside the
//! other background components: `/metrics` renders the global recorder,
//! `/health` is a trivial liveness probe for the orchestrator.

use crate::error::MetricsError;
use crate::recorder::render_metrics;
use axum::{routing::get, Router};

pub async fn start_metrics_server(address: &str, port: u16) -> Result<(), MetricsError> {
    let app = Router::new()
        .route("/metrics", get(get_metrics))
        .route("/health", get(|| async { "ok" }));

    let listener = tokio::net::TcpListener::bind(format!("{address}:{port}")).await?;
    tracing::info!(%address, %port, "metrics server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn get_metrics() -> String {
    render_metrics()
}
