//! Advisor task recommendations.
//!
//! Recommendations come first; their actions are then fetched concurrently.
//! The task script and tuning report are optional extras: when either fails
//! the response still succeeds with an empty string, `partial: true` and a
//! warning.

use axum::{extract::State, routing::get, Router};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::default_options;
use crate::error::{ok, require, ApiQuery, ApiResult, Envelope};
use crate::oracle::{BindValue, FieldMap, FieldSpec, QueryOptions, ResolvedConfig, Statement};
use crate::AppState;

const RECOMMENDATIONS_SQL: &str = "SELECT r.rec_id, r.finding_id, r.type, r.rank, r.benefit,
       f.type AS finding_type, f.impact, f.message AS finding
  FROM dba_advisor_recommendations r
  LEFT JOIN dba_advisor_findings f
    ON f.task_id = r.task_id AND f.finding_id = r.finding_id
 WHERE r.task_name = :1
 ORDER BY r.rank, r.rec_id";

const RECOMMENDATION_FIELDS: FieldMap = FieldMap::new(&[
    FieldSpec::int("REC_ID", "rec_id"),
    FieldSpec::int("FINDING_ID", "finding_id"),
    FieldSpec::text("TYPE", "type"),
    FieldSpec::int("RANK", "rank"),
    FieldSpec::int("BENEFIT", "benefit"),
    FieldSpec::text("FINDING_TYPE", "finding_type"),
    FieldSpec::int("IMPACT", "impact"),
    FieldSpec::text("FINDING", "finding"),
]);

const ACTIONS_SQL: &str = "SELECT action_id, command, message, attr1, attr2, attr3
  FROM dba_advisor_actions
 WHERE task_name = :1 AND rec_id = :2
 ORDER BY action_id";

const ACTION_FIELDS: FieldMap = FieldMap::new(&[
    FieldSpec::int("ACTION_ID", "action_id"),
    FieldSpec::text("COMMAND", "command"),
    FieldSpec::text("MESSAGE", "message"),
    FieldSpec::text("ATTR1", "attr1"),
    FieldSpec::text("ATTR2", "attr2"),
    FieldSpec::text("ATTR3", "attr3"),
]);

const TASK_SCRIPT_SQL: &str = "SELECT DBMS_ADVISOR.GET_TASK_SCRIPT(:1) AS script FROM dual";

const TUNING_REPORT_SQL: &str = "SELECT DBMS_SQLTUNE.REPORT_TUNING_TASK(:1) AS report FROM dual";

/// `/api/advisor/*` routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/advisor/recommendations", get(recommendations))
}

#[derive(Debug, Deserialize)]
struct RecommendationParams {
    connection_id: Option<String>,
    task_name: Option<String>,
    #[serde(default)]
    include_script: bool,
    #[serde(default)]
    include_report: bool,
}

/// Fetch a single text value, degrading to `""` plus a warning on failure.
async fn optional_text(
    state: &AppState,
    config: &ResolvedConfig,
    options: QueryOptions,
    sql: &str,
    task_name: &str,
    label: &str,
    warnings: &mut Vec<String>,
) -> String {
    match state
        .executor
        .execute(config, sql, vec![BindValue::from(task_name)], options)
        .await
    {
        Ok(output) => output
            .rows
            .first()
            .and_then(|row| row.values().next())
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Err(e) => {
            tracing::warn!("⚠️  Advisor {} unavailable - task_name={}, error={}", label, task_name, e);
            warnings.push(format!("{label} unavailable: {e}"));
            String::new()
        }
    }
}

async fn recommendations(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<RecommendationParams>,
) -> ApiResult<Envelope<Vec<Map<String, Value>>>> {
    let connection_id = require(params.connection_id.as_deref(), "connection_id")?;
    let task_name = require(params.task_name.as_deref(), "task_name")?;

    let config = state.resolver.resolve(connection_id).await?;
    let options = default_options(&state);

    tracing::debug!("🔍 Loading advisor task - connection_id={}, task_name={}", connection_id, task_name);
    let recs = state
        .executor
        .execute(&config, RECOMMENDATIONS_SQL, vec![BindValue::from(task_name)], options)
        .await?;
    let mut recommendations = RECOMMENDATION_FIELDS.apply_all(&recs.rows);

    // Actions per recommendation, all or nothing.
    let statements = recommendations
        .iter()
        .map(|rec| {
            let rec_id = rec.get("rec_id").and_then(Value::as_i64);
            Statement::new(
                ACTIONS_SQL,
                vec![BindValue::from(task_name), BindValue::from(rec_id)],
            )
        })
        .collect();
    let actions = state.executor.execute_many(&config, statements, options).await?;
    for (rec, output) in recommendations.iter_mut().zip(actions) {
        let actions = ACTION_FIELDS
            .apply_all(&output.rows)
            .into_iter()
            .map(Value::Object)
            .collect();
        rec.insert("actions".to_string(), Value::Array(actions));
    }

    let mut warnings = Vec::new();
    let script = if params.include_script {
        Some(optional_text(&state, &config, options, TASK_SCRIPT_SQL, task_name, "script", &mut warnings).await)
    } else {
        None
    };
    let report = if params.include_report {
        Some(optional_text(&state, &config, options, TUNING_REPORT_SQL, task_name, "report", &mut warnings).await)
    } else {
        None
    };

    let count = recommendations.len();
    let mut envelope = ok(recommendations)
        .with("task_name", task_name)
        .with("count", count)
        .with("partial", !warnings.is_empty())
        .with("warnings", warnings);
    if let Some(script) = script {
        envelope = envelope.with("script", script);
    }
    if let Some(report) = report {
        envelope = envelope.with("report", report);
    }
    Ok(envelope)
}
