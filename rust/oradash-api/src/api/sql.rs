//! Ad hoc SQL console.

use std::time::Duration;

use axum::{extract::State, routing::post, Router};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{bounded, default_options};
use crate::error::{ok, require, ApiJson, ApiResult, Envelope};
use crate::oracle::{lowercase_keys, BindValue};
use crate::AppState;

/// Upper bounds for console overrides.
const MAX_CONSOLE_ROWS: usize = 10_000;
const MAX_CONSOLE_TIMEOUT_MS: u64 = 300_000;

/// `/api/sql/*` routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/sql/execute", post(execute_sql))
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    connection_id: Option<String>,
    sql: Option<String>,
    #[serde(default)]
    binds: Vec<BindValue>,
    max_rows: Option<usize>,
    timeout_ms: Option<u64>,
    auto_commit: Option<bool>,
}

/// Drop a trailing `;` from plain SQL. PL/SQL blocks keep theirs.
fn strip_terminator(sql: &str) -> &str {
    let trimmed = sql.trim();
    if trimmed.to_ascii_uppercase().ends_with("END;") {
        return trimmed;
    }
    trimmed.trim_end_matches(';').trim_end()
}

async fn execute_sql(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ExecuteRequest>,
) -> ApiResult<Envelope<Vec<Map<String, Value>>>> {
    let connection_id = require(body.connection_id.as_deref(), "connection_id")?;
    let sql = strip_terminator(require(body.sql.as_deref(), "sql")?);
    let defaults = default_options(&state);
    let max_rows = bounded(body.max_rows, defaults.max_rows, 1..=MAX_CONSOLE_ROWS, "max_rows")?;
    let timeout_ms = bounded(
        body.timeout_ms,
        state.config.oracle.default_timeout_ms,
        1..=MAX_CONSOLE_TIMEOUT_MS,
        "timeout_ms",
    )?;

    let config = state.resolver.resolve(connection_id).await?;
    let options = defaults
        .with_max_rows(max_rows)
        .with_timeout(Duration::from_millis(timeout_ms))
        .with_auto_commit(body.auto_commit.unwrap_or(true));

    tracing::info!(
        "🔍 Console statement - connection_id={}, binds={}, max_rows={}",
        connection_id,
        body.binds.len(),
        max_rows
    );
    let output = state.executor.execute(&config, sql, body.binds, options).await?;

    let rows: Vec<_> = output.rows.iter().map(lowercase_keys).collect();
    let row_count = rows.len();
    let meta_data = serde_json::to_value(&output.meta_data).map_err(anyhow::Error::from)?;
    let statement_kind = serde_json::to_value(output.statement_kind).map_err(anyhow::Error::from)?;

    Ok(ok(rows)
        .with("meta_data", meta_data)
        .with("rows_affected", output.rows_affected)
        .with("statement_kind", statement_kind)
        .with("row_count", row_count)
        .with("truncated", row_count >= max_rows)
        .with("elapsed_ms", output.elapsed_ms))
}
