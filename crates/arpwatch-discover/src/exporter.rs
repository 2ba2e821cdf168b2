//! Prometheus scrape endpoint.
//!
//! The listener is supervised: bind or serve failures are logged and retried
//! with capped exponential backoff, and never take the sweeper down with them.

use std::net::SocketAddr;
use std::sync::Arc;

use arpwatch_ledger::metrics::TEXT_FORMAT;
use arpwatch_ledger::PromRegistry;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

pub const METRICS_PATH: &str = "/metrics";

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

pub fn router(registry: Arc<PromRegistry>) -> Router {
    Router::new()
        .route(METRICS_PATH, get(metrics_handler))
        .with_state(registry)
}

async fn metrics_handler(State(registry): State<Arc<PromRegistry>>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, TEXT_FORMAT)], registry.render())
}

/// Serve `registry` on `addr` until `cancel` fires, rebinding after failures.
pub async fn serve_metrics(
    addr: SocketAddr,
    registry: Arc<PromRegistry>,
    cancel: CancellationToken,
) {
    let mut backoff = INITIAL_BACKOFF;

    while !cancel.is_cancelled() {
        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                backoff = INITIAL_BACKOFF;
                tracing::info!(bind_address = %addr, path = METRICS_PATH, "Serving metrics");

                let shutdown = cancel.clone();
                let served = axum::serve(listener, router(registry.clone()))
                    .with_graceful_shutdown(async move { shutdown.cancelled().await })
                    .await;

                match served {
                    Ok(()) if cancel.is_cancelled() => break,
                    Ok(()) => tracing::warn!(
                        bind_address = %addr,
                        retry_in_secs = backoff.as_secs(),
                        "Metrics endpoint exited"
                    ),
                    Err(e) => tracing::warn!(
                        bind_address = %addr,
                        error = %e,
                        retry_in_secs = backoff.as_secs(),
                        "Metrics endpoint failed"
                    ),
                }
            }
            Err(e) => tracing::warn!(
                bind_address = %addr,
                error = %e,
                retry_in_secs = backoff.as_secs(),
                "Failed to bind metrics endpoint"
            ),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = next_backoff(backoff);
    }

    tracing::debug!("Metrics endpoint stopped");
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}
