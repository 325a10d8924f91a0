pub mod routes;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::errors::ChronodError;
use crate::store::{JobStore, RunStore};

/// Shared state for all HTTP handlers. The REST layer is a pure
/// reader/writer on the two stores; it holds no scheduling state.
pub struct AppState {
    pub job_store: Arc<dyn JobStore>,
    pub run_store: Arc<dyn RunStore>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(routes::health))
        .route(
            "/api/v1/jobs",
            get(routes::list_jobs).post(routes::create_job),
        )
        .route(
            "/api/v1/jobs/{id}",
            get(routes::get_job)
                .put(routes::update_job)
                .delete(routes::delete_job),
        )
        .route("/api/v1/jobs/{id}/runs", get(routes::list_job_runs))
        .route("/api/v1/runs", get(routes::list_runs))
        .route("/api/v1/runs/{id}", get(routes::get_run))
        .with_state(state)
}

/// Bind and serve until the cancellation signal fires.
pub async fn serve(
    state: Arc<AppState>,
    port: u16,
    cancel: CancellationToken,
) -> Result<(), ChronodError> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| ChronodError::Storage(format!("failed to bind port {}: {}", port, e)))?;
    tracing::info!(port, "API server listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| ChronodError::Storage(format!("server error: {}", e)))?;
    Ok(())
}
