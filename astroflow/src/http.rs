//! HTTP query surface.

use std::future::Future;
use std::net::SocketAddr;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tracing::info;

use crate::core::ResultSnapshot;
use crate::errors::AstroflowError;
use crate::query::QueryService;

/// Shared state accessible from handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Read access to the latest result.
    pub query: QueryService,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `ok` while the server answers.
    pub status: &'static str,
}

/// Builds the router.
pub fn router(query: QueryService) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/results", get(results_handler))
        .with_state(AppState { query })
}

/// Serves the router on `addr` until `shutdown` completes.
pub async fn serve<F>(addr: SocketAddr, query: QueryService, shutdown: F) -> Result<(), AstroflowError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");
    axum::serve(listener, router(query))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// GET /health
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// GET /api/results
async fn results_handler(State(state): State<AppState>) -> Json<ResultSnapshot> {
    Json(state.query.latest().as_ref().clone())
}
