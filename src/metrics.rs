//! Prometheus exposition endpoint

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{Registry, TextEncoder};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Serve `GET /metrics` for the shared registry until cancellation.
pub async fn serve(
    port: u16,
    registry: Registry,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(registry);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;

    info!(port, "metrics server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("metrics server stopped");

    Ok(())
}

async fn render_metrics(State(registry): State<Registry>) -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();

    encoder.encode_to_string(&registry.gather()).map_err(|err| {
        error!(error = %err, "failed to encode metrics");

        StatusCode::INTERNAL_SERVER_ERROR
    })
}
