//! Optimizer statistics collection.

use axum::{extract::State, routing::post, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use super::default_options;
use crate::database::{HistoryKind, HistoryRepository};
use crate::error::{ok, require, ApiError, ApiJson, ApiResult, Envelope};
use crate::oracle::BindValue;
use crate::AppState;

const GATHER_TABLE_STATS: &str = "BEGIN
  DBMS_STATS.GATHER_TABLE_STATS(
    ownname          => :1,
    tabname          => :2,
    estimate_percent => NVL(:3, DBMS_STATS.AUTO_SAMPLE_SIZE),
    cascade          => TRUE);
END;";

const GATHER_SCHEMA_STATS: &str = "BEGIN
  DBMS_STATS.GATHER_SCHEMA_STATS(
    ownname          => :1,
    estimate_percent => NVL(:2, DBMS_STATS.AUTO_SAMPLE_SIZE),
    cascade          => TRUE);
END;";

/// `/api/stats/*` routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/stats/gather", post(gather_stats))
}

#[derive(Debug, Deserialize)]
struct GatherRequest {
    connection_id: Option<String>,
    owner: Option<String>,
    table_name: Option<String>,
    estimate_percent: Option<f64>,
}

/// Oracle identifiers as accepted here: letters, digits, `_`, `$`, `#`.
fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '#'))
}

async fn gather_stats(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<GatherRequest>,
) -> ApiResult<Envelope<Value>> {
    let connection_id = require(body.connection_id.as_deref(), "connection_id")?;
    let owner = require(body.owner.as_deref(), "owner")?.to_uppercase();
    let table_name = body
        .table_name
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_uppercase);

    if !is_identifier(&owner) || table_name.as_deref().is_some_and(|t| !is_identifier(t)) {
        return Err(ApiError::invalid("owner and table_name must be plain Oracle identifiers"));
    }
    if let Some(pct) = body.estimate_percent {
        if !(pct > 0.0 && pct <= 100.0) {
            return Err(ApiError::invalid("estimate_percent must be greater than 0 and at most 100"));
        }
    }

    let config = state.resolver.resolve(connection_id).await?;
    let estimate = body.estimate_percent.map_or(BindValue::Null, BindValue::Float);
    let (sql, binds) = match &table_name {
        Some(table) => (
            GATHER_TABLE_STATS,
            vec![BindValue::from(owner.as_str()), BindValue::from(table.as_str()), estimate],
        ),
        None => (GATHER_SCHEMA_STATS, vec![BindValue::from(owner.as_str()), estimate]),
    };

    tracing::info!(
        "📊 Gathering statistics - connection_id={}, owner={}, table={:?}",
        connection_id,
        owner,
        table_name
    );
    let result = state
        .executor
        .execute(&config, sql, binds, default_options(&state))
        .await;

    // The attempt is recorded whatever the outcome.
    let mut payload = json!({
        "owner": owner,
        "table_name": table_name,
        "estimate_percent": body.estimate_percent,
        "scope": if table_name.is_some() { "table" } else { "schema" },
    });
    match &result {
        Ok(output) => {
            payload["status"] = json!("success");
            payload["elapsed_ms"] = json!(output.elapsed_ms);
        }
        Err(e) => {
            payload["status"] = json!("failed");
            payload["error"] = json!(e.to_string());
        }
    }
    let history_id = state
        .store
        .append_history(connection_id, HistoryKind::StatsCollection, 1, &payload)
        .await?;

    result?;
    tracing::info!("✅ Statistics gathered - connection_id={}, owner={}", connection_id, owner);
    payload["history_id"] = json!(history_id);
    Ok(ok(payload))
}
