//! SQL console, statistics gathering, advisor and AI analysis routes.

mod common;

use axum::http::StatusCode;
use common::spawn_app;
use oradash_api::oracle::{BindValue, DriverError};
use serde_json::{json, Value};

#[tokio::test]
async fn test_console_select_lowercases_columns() {
    let app = spawn_app().await;
    let id = app.create_connection("Primary", "ORCLPDB1").await;
    app.driver.respond(
        "FROM employees",
        vec![
            json!({ "EMPLOYEE_ID": 100, "LAST_NAME": "King" }),
            json!({ "EMPLOYEE_ID": 101, "LAST_NAME": "Kochhar" }),
        ],
    );

    let response = app
        .post("/api/sql/execute")
        .json(&json!({
            "connection_id": id,
            "sql": "SELECT employee_id, last_name FROM employees WHERE department_id = :1;",
            "binds": [90],
        }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["statement_kind"], "SELECT");
    assert_eq!(body["row_count"], 2);
    assert_eq!(body["data"][0]["last_name"], "King");
    assert_eq!(body["data"][1]["employee_id"], 101);

    let statements = app.driver.statements();
    let (sql, binds) = statements.last().unwrap();
    assert!(!sql.ends_with(';'));
    assert_eq!(binds, &vec![BindValue::Integer(90)]);
}

#[tokio::test]
async fn test_console_dml_reports_rows_affected() {
    let app = spawn_app().await;
    let id = app.create_connection("Primary", "ORCLPDB1").await;
    app.driver.respond("UPDATE employees", vec![json!({}), json!({}), json!({})]);

    let response = app
        .post("/api/sql/execute")
        .json(&json!({
            "connection_id": id,
            "sql": "UPDATE employees SET salary = salary * 1.1 WHERE department_id = 60",
        }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["statement_kind"], "DML");
    assert_eq!(body["rows_affected"], 3);
}

#[tokio::test]
async fn test_console_limits() {
    let app = spawn_app().await;
    let id = app.create_connection("Primary", "ORCLPDB1").await;

    app.post("/api/sql/execute")
        .json(&json!({ "connection_id": id }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    app.post("/api/sql/execute")
        .json(&json!({ "connection_id": id, "sql": "SELECT 1 FROM dual", "max_rows": 0 }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    app.post("/api/sql/execute")
        .json(&json!({ "connection_id": id, "sql": "SELECT 1 FROM dual", "timeout_ms": 999_999 }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(app.driver.connects(), 0);
}

#[tokio::test]
async fn test_gather_stats_records_history() {
    let app = spawn_app().await;
    let id = app.create_connection("Primary", "ORCLPDB1").await;

    let response = app
        .post("/api/stats/gather")
        .json(&json!({ "connection_id": id, "owner": "hr", "table_name": "employees" }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["owner"], "HR");
    assert_eq!(body["data"]["scope"], "table");
    assert_eq!(body["data"]["status"], "success");

    let statements = app.driver.statements();
    let (sql, binds) = statements.last().unwrap();
    assert!(sql.contains("GATHER_TABLE_STATS"));
    assert_eq!(binds[0], BindValue::Text("HR".to_string()));
    assert_eq!(binds[2], BindValue::Null);

    app.driver.fail(
        "GATHER_SCHEMA_STATS",
        DriverError::new("ORA-20000: Unable to analyze").with_code(20000),
    );
    app.post("/api/stats/gather")
        .json(&json!({ "connection_id": id, "owner": "hr" }))
        .await
        .assert_status(StatusCode::INTERNAL_SERVER_ERROR);

    let body: Value = app
        .get("/api/history")
        .add_query_param("connection_id", &id)
        .add_query_param("kind", "stats_collection")
        .await
        .json();
    assert_eq!(body["count"], 2);
    assert_eq!(body["data"][0]["payload"]["status"], "failed");
    assert_eq!(body["data"][1]["payload"]["status"], "success");
}

#[tokio::test]
async fn test_gather_stats_rejects_bad_input() {
    let app = spawn_app().await;
    let id = app.create_connection("Primary", "ORCLPDB1").await;

    app.post("/api/stats/gather")
        .json(&json!({ "connection_id": id, "owner": "HR; DROP USER x" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    app.post("/api/stats/gather")
        .json(&json!({ "connection_id": id, "owner": "HR", "estimate_percent": 0 }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(app.driver.connects(), 0);
}

#[tokio::test]
async fn test_advisor_degrades_when_script_fails() {
    let app = spawn_app().await;
    let id = app.create_connection("Primary", "ORCLPDB1").await;
    app.driver.respond(
        "dba_advisor_recommendations",
        vec![json!({ "REC_ID": 1, "TYPE": "INDEXES", "RANK": 1, "FINDING": "Full scan" })],
    );
    app.driver.respond(
        "dba_advisor_actions",
        vec![json!({ "ACTION_ID": 1, "COMMAND": "CREATE INDEX" })],
    );
    app.driver.fail(
        "GET_TASK_SCRIPT",
        DriverError::new("ORA-13631: task not found").with_code(13631),
    );

    let response = app
        .get("/api/advisor/recommendations")
        .add_query_param("connection_id", &id)
        .add_query_param("task_name", "TASK_42")
        .add_query_param("include_script", true)
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["count"], 1);
    assert_eq!(body["data"][0]["actions"][0]["command"], "CREATE INDEX");
    assert_eq!(body["partial"], true);
    assert_eq!(body["script"], "");
    assert_eq!(body["warnings"].as_array().unwrap().len(), 1);
    assert_eq!(app.driver.open_sessions(), 0);
}

#[tokio::test]
async fn test_ai_analysis_disabled_uses_nested_error() {
    let app = spawn_app().await;

    let response = app
        .post("/api/ai/analyze-sql")
        .json(&json!({ "sql_text": "SELECT * FROM employees" }))
        .await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "FEATURE_DISABLED");
    assert!(body["error"]["fallback"]
        .as_str()
        .unwrap()
        .contains("/api/advisor/recommendations"));
}
