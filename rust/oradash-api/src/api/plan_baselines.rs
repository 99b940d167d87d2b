//! SQL plan baselines: locally tracked records and the live DBA view.

use axum::{extract::State, routing::get, Router};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{run_query, ConnectionParams};
use crate::database::{BaselineRepository, PlanBaseline, PlanBaselineData};
use crate::error::{ok, require, ApiError, ApiJson, ApiPath, ApiQuery, ApiResult, Envelope};
use crate::oracle::{FieldMap, FieldSpec};
use crate::AppState;

const LIVE_BASELINES_SQL: &str = "SELECT sql_handle, plan_name, origin, enabled, accepted, fixed,
       optimizer_cost, executions, elapsed_time, cpu_time, buffer_gets,
       TO_CHAR(created, 'YYYY-MM-DD\"T\"HH24:MI:SS') AS created,
       DBMS_LOB.SUBSTR(sql_text, 1000, 1) AS sql_text
  FROM dba_sql_plan_baselines
 ORDER BY created DESC";

const LIVE_BASELINE_FIELDS: FieldMap = FieldMap::new(&[
    FieldSpec::text("SQL_HANDLE", "sql_handle"),
    FieldSpec::text("PLAN_NAME", "plan_name"),
    FieldSpec::text("ORIGIN", "origin"),
    FieldSpec::flag("ENABLED", "is_enabled"),
    FieldSpec::flag("ACCEPTED", "is_accepted"),
    FieldSpec::flag("FIXED", "is_fixed"),
    FieldSpec::int("OPTIMIZER_COST", "optimizer_cost"),
    FieldSpec::int("EXECUTIONS", "executions"),
    FieldSpec::int("ELAPSED_TIME", "elapsed_time"),
    FieldSpec::int("CPU_TIME", "cpu_time"),
    FieldSpec::int("BUFFER_GETS", "buffer_gets"),
    FieldSpec::text("CREATED", "created"),
    FieldSpec::text("SQL_TEXT", "sql_text"),
]);

/// `/api/plan-baselines` routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/plan-baselines", get(list_baselines).post(create_baseline))
        .route("/api/plan-baselines/live", get(live_baselines))
        .route("/api/plan-baselines/{id}", get(get_baseline).put(replace_baseline))
}

/// Body for create and full replace. Omitted flags take their defaults.
#[derive(Debug, Deserialize)]
struct BaselineBody {
    oracle_connection_id: Option<String>,
    sql_id: Option<String>,
    plan_hash_value: Option<i64>,
    sql_handle: Option<String>,
    plan_name: Option<String>,
    sql_text: Option<String>,
    origin: Option<String>,
    is_enabled: Option<bool>,
    is_accepted: Option<bool>,
    is_fixed: Option<bool>,
    optimizer_cost: Option<i64>,
    executions: Option<i64>,
    elapsed_time: Option<i64>,
    cpu_time: Option<i64>,
    buffer_gets: Option<i64>,
}

impl BaselineBody {
    fn into_data(self) -> ApiResult<PlanBaselineData> {
        let connection_id = require(self.oracle_connection_id.as_deref(), "oracle_connection_id")?;
        let sql_id = require(self.sql_id.as_deref(), "sql_id")?;
        let plan_hash_value = self
            .plan_hash_value
            .ok_or_else(|| ApiError::invalid("Missing required parameter: plan_hash_value"))?;

        let mut data =
            PlanBaselineData::new(connection_id.to_string(), sql_id.to_string(), plan_hash_value);
        data.sql_handle = self.sql_handle;
        data.plan_name = self.plan_name;
        data.sql_text = self.sql_text;
        data.origin = self.origin;
        data.is_enabled = self.is_enabled.unwrap_or(data.is_enabled);
        data.is_accepted = self.is_accepted.unwrap_or(data.is_accepted);
        data.is_fixed = self.is_fixed.unwrap_or(data.is_fixed);
        data.optimizer_cost = self.optimizer_cost;
        data.executions = self.executions;
        data.elapsed_time = self.elapsed_time;
        data.cpu_time = self.cpu_time;
        data.buffer_gets = self.buffer_gets;
        Ok(data)
    }
}

async fn list_baselines(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<ConnectionParams>,
) -> ApiResult<Envelope<Vec<PlanBaseline>>> {
    let connection_id = params.connection_id()?;
    let baselines = state.store.list_baselines(connection_id).await?;
    let count = baselines.len();
    Ok(ok(baselines).with("count", count))
}

async fn create_baseline(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<BaselineBody>,
) -> ApiResult<Envelope<PlanBaseline>> {
    let data = body.into_data()?;
    let baseline = state.store.create_baseline(data).await?;
    tracing::info!(
        "✅ Plan baseline recorded - id={}, sql_id={}, plan_hash_value={}",
        baseline.id,
        baseline.data.sql_id,
        baseline.data.plan_hash_value
    );
    Ok(ok(baseline))
}

async fn get_baseline(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Envelope<PlanBaseline>> {
    state
        .store
        .get_baseline(&id)
        .await?
        .map(ok)
        .ok_or_else(|| ApiError::not_found(format!("Plan baseline '{id}' not found")))
}

async fn replace_baseline(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
    ApiJson(body): ApiJson<BaselineBody>,
) -> ApiResult<Envelope<PlanBaseline>> {
    let data = body.into_data()?;
    let baseline = state
        .store
        .replace_baseline(&id, data)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Plan baseline '{id}' not found")))?;
    tracing::info!("✅ Plan baseline replaced - id={}", id);
    Ok(ok(baseline))
}

async fn live_baselines(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<ConnectionParams>,
) -> ApiResult<Envelope<Vec<Map<String, Value>>>> {
    let connection_id = params.connection_id()?;
    let (_, output) = run_query(&state, connection_id, LIVE_BASELINES_SQL, Vec::new()).await?;
    let rows = LIVE_BASELINE_FIELDS.apply_all(&output.rows);
    let count = rows.len();
    Ok(ok(rows).with("count", count))
}
