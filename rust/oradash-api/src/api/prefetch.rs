//! Prefetch scheduler control.

use axum::{
    body::Bytes,
    extract::State,
    routing::{get, patch, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ok, ApiError, ApiJson, ApiPath, ApiResult, Envelope};
use crate::scheduler::PrefetchStatus;
use crate::AppState;

/// `/api/prefetch` routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/prefetch", get(list_tasks))
        .route("/api/prefetch/{connection_id}", patch(update_task))
        .route("/api/prefetch/{connection_id}/start", post(start_task))
        .route("/api/prefetch/{connection_id}/stop", post(stop_task))
        .route("/api/prefetch/{connection_id}/trigger", post(trigger_task))
}

#[derive(Debug, Deserialize)]
struct IntervalBody {
    interval_secs: Option<u64>,
}

async fn list_tasks(State(state): State<AppState>) -> Envelope<Vec<PrefetchStatus>> {
    let tasks = state.scheduler.list().await;
    let count = tasks.len();
    ok(tasks).with("count", count)
}

async fn start_task(
    State(state): State<AppState>,
    ApiPath(connection_id): ApiPath<String>,
    body: Bytes,
) -> ApiResult<Envelope<PrefetchStatus>> {
    // The body is optional here.
    let interval_secs = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<IntervalBody>(&body)
            .map_err(|e| ApiError::invalid(format!("Invalid JSON body: {e}")))?
            .interval_secs
    };
    // Unknown or inactive connections never get a task entry.
    state.resolver.resolve(&connection_id).await?;
    let status = state.scheduler.start(&connection_id, interval_secs).await?;
    Ok(ok(status))
}

async fn stop_task(
    State(state): State<AppState>,
    ApiPath(connection_id): ApiPath<String>,
) -> Envelope<Value> {
    let stopped = state.scheduler.stop(&connection_id).await;
    ok(json!({ "connection_id": connection_id, "stopped": stopped }))
}

async fn trigger_task(
    State(state): State<AppState>,
    ApiPath(connection_id): ApiPath<String>,
) -> ApiResult<Envelope<PrefetchStatus>> {
    state.resolver.resolve(&connection_id).await?;
    tracing::info!("🔄 Prefetch trigger - connection_id={}", connection_id);
    Ok(ok(state.scheduler.trigger(&connection_id).await))
}

async fn update_task(
    State(state): State<AppState>,
    ApiPath(connection_id): ApiPath<String>,
    ApiJson(body): ApiJson<IntervalBody>,
) -> ApiResult<Envelope<Option<PrefetchStatus>>> {
    let interval_secs = body
        .interval_secs
        .ok_or_else(|| ApiError::invalid("Missing required parameter: interval_secs"))?;
    state.resolver.resolve(&connection_id).await?;
    let restarted = state
        .scheduler
        .update_config(&connection_id, interval_secs)
        .await?;
    let status = state.scheduler.status(&connection_id).await;
    Ok(ok(status).with("restarted", restarted))
}
