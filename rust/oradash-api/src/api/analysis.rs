//! LLM-backed SQL analysis. Errors use the nested `{code, message}` shape.

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::default_options;
use crate::error::{ok, require, ApiError, ApiJson, ApiResult};
use crate::oracle::{BindValue, FieldMap, FieldSpec, Statement};
use crate::AppState;

const SQL_TEXT_SQL: &str = "SELECT DBMS_LOB.SUBSTR(sql_fulltext, 4000, 1) AS sql_text
  FROM v$sql
 WHERE sql_id = :1 AND ROWNUM = 1";

const PLAN_SQL: &str = "SELECT id, depth, operation, options, object_owner, object_name,
       cost, cardinality
  FROM v$sql_plan
 WHERE sql_id = :1
   AND child_number = (SELECT MIN(child_number) FROM v$sql_plan WHERE sql_id = :2)
 ORDER BY id";

const PLAN_FIELDS: FieldMap = FieldMap::new(&[
    FieldSpec::int("ID", "id"),
    FieldSpec::int("DEPTH", "depth"),
    FieldSpec::text("OPERATION", "operation"),
    FieldSpec::text("OPTIONS", "options"),
    FieldSpec::text("OBJECT_OWNER", "object_owner"),
    FieldSpec::text("OBJECT_NAME", "object_name"),
    FieldSpec::int("COST", "cost"),
    FieldSpec::int("CARDINALITY", "cardinality"),
]);

const FALLBACK_HINT: &str =
    "Use /api/advisor/recommendations with a SQL Tuning Advisor task instead";

/// `/api/ai/*` routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/ai/analyze-sql", post(analyze_sql))
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    connection_id: Option<String>,
    sql_id: Option<String>,
    sql_text: Option<String>,
}

/// Render plan rows as an indented operation tree.
fn format_plan(rows: &[Map<String, Value>]) -> String {
    let text = |row: &Map<String, Value>, key: &str| {
        row.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
    };
    rows.iter()
        .map(|row| {
            let depth = row.get("depth").and_then(Value::as_u64).unwrap_or(0);
            let id = row.get("id").and_then(Value::as_i64).unwrap_or(0);
            let mut line = format!(
                "{}{id} {} {}",
                "  ".repeat(usize::try_from(depth).unwrap_or(0)),
                text(row, "operation"),
                text(row, "options")
            )
            .trim_end()
            .to_string();
            let object = text(row, "object_name");
            if !object.is_empty() {
                line.push_str(&format!(" {}.{object}", text(row, "object_owner")));
            }
            if let Some(cost) = row.get("cost").and_then(Value::as_i64) {
                line.push_str(&format!(" cost={cost}"));
            }
            if let Some(rows) = row.get("cardinality").and_then(Value::as_i64) {
                line.push_str(&format!(" rows={rows}"));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

async fn analyze_sql(
    State(state): State<AppState>,
    body: Result<ApiJson<AnalyzeRequest>, ApiError>,
) -> Response {
    match analyze(state, body).await {
        Ok(response) => response,
        Err(e) => e.into_nested_response(),
    }
}

async fn analyze(
    state: AppState,
    body: Result<ApiJson<AnalyzeRequest>, ApiError>,
) -> ApiResult<Response> {
    let Some(llm) = state.llm.clone() else {
        return Err(ApiError::FeatureDisabled {
            feature: "AI SQL analysis",
            fallback: FALLBACK_HINT,
        });
    };
    let ApiJson(body) = body?;

    let sql_id = body.sql_id.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let (sql_text, plan) = match (sql_id, body.sql_text.as_deref().map(str::trim)) {
        (Some(sql_id), given) => {
            let connection_id = require(body.connection_id.as_deref(), "connection_id")?;
            let config = state.resolver.resolve(connection_id).await?;
            let outputs = state
                .executor
                .execute_many(
                    &config,
                    vec![
                        Statement::new(SQL_TEXT_SQL, vec![BindValue::from(sql_id)]),
                        Statement::new(PLAN_SQL, vec![BindValue::from(sql_id), BindValue::from(sql_id)]),
                    ],
                    default_options(&state),
                )
                .await?;

            let fetched = outputs
                .first()
                .and_then(|o| o.rows.first())
                .and_then(|row| row.values().next())
                .and_then(Value::as_str)
                .map(str::to_string);
            let sql_text = match (fetched, given) {
                (Some(text), _) => text,
                (None, Some(text)) if !text.is_empty() => text.to_string(),
                _ => return Err(ApiError::not_found(format!("SQL '{sql_id}' not found in v$sql"))),
            };
            let plan_rows = outputs
                .get(1)
                .map(|o| PLAN_FIELDS.apply_all(&o.rows))
                .unwrap_or_default();
            (sql_text, Some(format_plan(&plan_rows)))
        }
        (None, Some(text)) if !text.is_empty() => (text.to_string(), None),
        _ => {
            return Err(ApiError::invalid(
                "Missing required parameter: sql_text or sql_id",
            ))
        }
    };

    tracing::info!("🤖 Analyzing SQL - sql_id={:?}, model={}", sql_id, llm.model());
    let analysis = llm
        .analyze_sql(&sql_text, plan.as_deref())
        .await
        .map_err(|e| ApiError::Upstream {
            message: format!("LLM analysis failed: {e:#}"),
            code: None,
            offset: None,
        })?;

    Ok(ok(json!({
        "sql_id": sql_id,
        "sql_text": sql_text,
        "plan": plan,
        "analysis": analysis.analysis,
        "model": analysis.model,
        "usage": {
            "prompt_tokens": analysis.prompt_tokens,
            "completion_tokens": analysis.completion_tokens,
        },
    }))
    .into_response())
}
