//! Health check endpoints.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Liveness: the process is serving requests.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    status: &'static str,
    store: bool,
    llm_enabled: bool,
    prefetch_tasks: usize,
}

/// Readiness: the auxiliary store answers.
async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let store = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("❌ Store not reachable: {e:#}");
            false
        }
    };

    let status = if store { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(ReadinessResponse {
            status: if store { "ready" } else { "degraded" },
            store,
            llm_enabled: state.llm.is_some(),
            prefetch_tasks: state.scheduler.list().await.iter().filter(|t| t.active).count(),
        }),
    )
}
