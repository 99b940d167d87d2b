//! Monitoring endpoints over the dynamic performance views.

use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{bounded, run_query, ConnectionParams};
use crate::database::{HistoryKind, HistoryRecord, HistoryRepository};
use crate::error::{ok, require, ApiError, ApiJson, ApiQuery, ApiResult, Envelope};
use crate::oracle::views::{
    filter_wait_events, top_sql_sql, wait_events_sql, TOP_SQL_FIELDS, WAIT_EVENT_FIELDS,
};
use crate::oracle::{BindValue, FieldMap, FieldSpec};
use crate::scheduler::{CollectedSnapshot, HistoryCollector};
use crate::AppState;

const SESSIONS_SQL: &str = "SELECT sid, serial# AS serial_num, username, status, osuser, machine,
       program, module, sql_id, event, wait_class, seconds_in_wait,
       TO_CHAR(logon_time, 'YYYY-MM-DD\"T\"HH24:MI:SS') AS logon_time,
       last_call_et, blocking_session
  FROM v$session
 WHERE type = 'USER'";

const SESSION_FIELDS: FieldMap = FieldMap::new(&[
    FieldSpec::int("SID", "sid"),
    FieldSpec::int("SERIAL_NUM", "serial_num"),
    FieldSpec::text("USERNAME", "username"),
    FieldSpec::text("STATUS", "status"),
    FieldSpec::text("OSUSER", "osuser"),
    FieldSpec::text("MACHINE", "machine"),
    FieldSpec::text("PROGRAM", "program"),
    FieldSpec::text("MODULE", "module"),
    FieldSpec::text("SQL_ID", "sql_id"),
    FieldSpec::text("EVENT", "event"),
    FieldSpec::text("WAIT_CLASS", "wait_class"),
    FieldSpec::int("SECONDS_IN_WAIT", "seconds_in_wait"),
    FieldSpec::text("LOGON_TIME", "logon_time"),
    FieldSpec::int("LAST_CALL_ET", "last_call_et"),
    FieldSpec::int("BLOCKING_SESSION", "blocking_session"),
]);

/// Columns `top-sql` may be ordered by.
const TOP_SQL_ORDER: &[&str] = &[
    "elapsed_time",
    "cpu_time",
    "buffer_gets",
    "disk_reads",
    "executions",
    "rows_processed",
];

const TABLESPACES_SQL: &str = "SELECT m.tablespace_name, t.contents, t.status,
       ROUND(m.used_space * t.block_size / 1048576, 2) AS used_mb,
       ROUND(m.tablespace_size * t.block_size / 1048576, 2) AS total_mb,
       ROUND(m.used_percent, 2) AS used_percent
  FROM dba_tablespace_usage_metrics m
  JOIN dba_tablespaces t ON t.tablespace_name = m.tablespace_name
 ORDER BY m.used_percent DESC";

const TABLESPACE_FIELDS: FieldMap = FieldMap::new(&[
    FieldSpec::text("TABLESPACE_NAME", "tablespace_name"),
    FieldSpec::text("CONTENTS", "contents"),
    FieldSpec::text("STATUS", "status"),
    FieldSpec::float("USED_MB", "used_mb"),
    FieldSpec::float("TOTAL_MB", "total_mb"),
    FieldSpec::float("USED_PERCENT", "used_percent"),
]);

const AWR_SNAPSHOTS_SQL: &str = "SELECT snap_id, dbid, instance_number,
       TO_CHAR(begin_interval_time, 'YYYY-MM-DD\"T\"HH24:MI:SS') AS begin_time,
       TO_CHAR(end_interval_time, 'YYYY-MM-DD\"T\"HH24:MI:SS') AS end_time,
       snap_level
  FROM dba_hist_snapshot
 WHERE begin_interval_time >= SYSTIMESTAMP - NUMTODSINTERVAL(:1, 'DAY')
 ORDER BY snap_id DESC";

const AWR_SNAPSHOT_FIELDS: FieldMap = FieldMap::new(&[
    FieldSpec::int("SNAP_ID", "snap_id"),
    FieldSpec::int("DBID", "dbid"),
    FieldSpec::int("INSTANCE_NUMBER", "instance_number"),
    FieldSpec::text("BEGIN_TIME", "begin_time"),
    FieldSpec::text("END_TIME", "end_time"),
    FieldSpec::int("SNAP_LEVEL", "snap_level"),
]);

/// `/api/monitoring/*` and `/api/history` routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/monitoring/wait-events", get(wait_events))
        .route("/api/monitoring/sessions", get(sessions))
        .route("/api/monitoring/top-sql", get(top_sql))
        .route("/api/monitoring/tablespaces", get(tablespaces))
        .route("/api/monitoring/awr-snapshots", get(awr_snapshots))
        .route("/api/monitoring/collect", post(collect))
        .route("/api/history", get(history))
}

#[derive(Debug, Deserialize)]
struct WaitEventParams {
    connection_id: Option<String>,
    wait_class: Option<String>,
    #[serde(default)]
    include_idle: bool,
}

async fn wait_events(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<WaitEventParams>,
) -> ApiResult<Envelope<Vec<Map<String, Value>>>> {
    let connection_id = require(params.connection_id.as_deref(), "connection_id")?;
    let wait_class = params
        .wait_class
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());
    let include_idle = params.include_idle || wait_class == Some("Idle");

    tracing::debug!(
        "📋 Fetching wait events - connection_id={}, wait_class={:?}",
        connection_id,
        wait_class
    );
    let sql = wait_events_sql(include_idle, wait_class.is_some());
    let binds = wait_class.map(BindValue::from).into_iter().collect();
    let (_, output) = run_query(&state, connection_id, &sql, binds).await?;

    let rows = filter_wait_events(WAIT_EVENT_FIELDS.apply_all(&output.rows), wait_class, include_idle);
    let count = rows.len();
    Ok(ok(rows).with("count", count))
}

#[derive(Debug, Deserialize)]
struct SessionParams {
    connection_id: Option<String>,
    status: Option<String>,
    username: Option<String>,
}

async fn sessions(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<SessionParams>,
) -> ApiResult<Envelope<Vec<Map<String, Value>>>> {
    let connection_id = require(params.connection_id.as_deref(), "connection_id")?;

    let mut sql = SESSIONS_SQL.to_string();
    let mut binds = Vec::new();
    for (column, value) in [("status", &params.status), ("username", &params.username)] {
        if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            binds.push(BindValue::from(value.to_uppercase()));
            sql.push_str(&format!("\n   AND {column} = :{}", binds.len()));
        }
    }
    sql.push_str("\n ORDER BY status, last_call_et DESC");

    let (_, output) = run_query(&state, connection_id, &sql, binds).await?;
    let rows = SESSION_FIELDS.apply_all(&output.rows);
    let count = rows.len();
    Ok(ok(rows).with("count", count))
}

#[derive(Debug, Deserialize)]
struct TopSqlParams {
    connection_id: Option<String>,
    order_by: Option<String>,
    limit: Option<i64>,
}

async fn top_sql(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<TopSqlParams>,
) -> ApiResult<Envelope<Vec<Map<String, Value>>>> {
    let connection_id = require(params.connection_id.as_deref(), "connection_id")?;
    let order_by = params.order_by.as_deref().unwrap_or("elapsed_time");
    // Only whitelisted identifiers are ever formatted into the statement.
    let Some(order_by) = TOP_SQL_ORDER.iter().find(|c| c.eq_ignore_ascii_case(order_by)) else {
        return Err(ApiError::invalid(format!(
            "order_by must be one of: {}",
            TOP_SQL_ORDER.join(", ")
        )));
    };
    let limit = bounded(params.limit, 10, 1..=100, "limit")?;

    let (_, output) = run_query(
        &state,
        connection_id,
        &top_sql_sql(order_by),
        vec![BindValue::from(limit)],
    )
    .await?;
    let rows = TOP_SQL_FIELDS.apply_all(&output.rows);
    let count = rows.len();
    Ok(ok(rows).with("count", count).with("order_by", *order_by))
}

async fn tablespaces(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<ConnectionParams>,
) -> ApiResult<Envelope<Vec<Map<String, Value>>>> {
    let connection_id = params.connection_id()?;
    let (_, output) = run_query(&state, connection_id, TABLESPACES_SQL, Vec::new()).await?;
    let rows = TABLESPACE_FIELDS.apply_all(&output.rows);
    let count = rows.len();
    Ok(ok(rows).with("count", count))
}

#[derive(Debug, Deserialize)]
struct AwrParams {
    connection_id: Option<String>,
    days: Option<i64>,
}

async fn awr_snapshots(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<AwrParams>,
) -> ApiResult<Envelope<Vec<Map<String, Value>>>> {
    let connection_id = require(params.connection_id.as_deref(), "connection_id")?;
    let days = bounded(params.days, 7, 1..=31, "days")?;

    let (_, output) = run_query(
        &state,
        connection_id,
        AWR_SNAPSHOTS_SQL,
        vec![BindValue::from(days)],
    )
    .await?;
    let rows = AWR_SNAPSHOT_FIELDS.apply_all(&output.rows);
    let count = rows.len();
    Ok(ok(rows).with("count", count).with("days", days))
}

#[derive(Debug, Deserialize)]
struct CollectRequest {
    connection_id: Option<String>,
    kinds: Option<Vec<HistoryKind>>,
}

async fn collect(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CollectRequest>,
) -> ApiResult<Envelope<Vec<CollectedSnapshot>>> {
    let connection_id = require(body.connection_id.as_deref(), "connection_id")?;
    let kinds = body
        .kinds
        .unwrap_or_else(|| HistoryCollector::SNAPSHOT_KINDS.to_vec());
    if kinds.is_empty() {
        return Err(ApiError::invalid("kinds must not be empty"));
    }
    if let Some(kind) = kinds
        .iter()
        .find(|k| !HistoryCollector::SNAPSHOT_KINDS.contains(k))
    {
        return Err(ApiError::invalid(format!(
            "{} cannot be collected here; use /api/stats/gather",
            kind.as_str()
        )));
    }

    let snapshots = HistoryCollector::from_state(&state)
        .collect_kinds(connection_id, &kinds)
        .await?;
    tracing::info!(
        "✅ Snapshots collected - connection_id={}, kinds={}",
        connection_id,
        snapshots.len()
    );
    Ok(ok(snapshots))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    connection_id: Option<String>,
    kind: Option<String>,
    limit: Option<usize>,
}

async fn history(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<HistoryParams>,
) -> ApiResult<Envelope<Vec<HistoryRecord>>> {
    let connection_id = require(params.connection_id.as_deref(), "connection_id")?;
    let kind = params
        .kind
        .as_deref()
        .map(str::parse::<HistoryKind>)
        .transpose()
        .map_err(ApiError::invalid)?;
    let limit = bounded(params.limit, 50, 1..=500, "limit")?;

    let records = state.store.list_history(connection_id, kind, limit).await?;
    let count = records.len();
    Ok(ok(records).with("count", count))
}
