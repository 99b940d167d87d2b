//! Monitoring endpoints, history collection and driver error mapping.

mod common;

use axum::http::StatusCode;
use common::spawn_app;
use oradash_api::oracle::{BindValue, DriverError};
use serde_json::{json, Value};

fn wait_event_rows() -> Vec<Value> {
    vec![
        json!({ "EVENT": "db file sequential read", "WAIT_CLASS": "User I/O", "TOTAL_WAITS": 10, "TIME_WAITED": 120 }),
        json!({ "EVENT": "log file sync", "WAIT_CLASS": "Commit", "TOTAL_WAITS": 4, "TIME_WAITED": 900 }),
        json!({ "EVENT": "db file scattered read", "WAIT_CLASS": "User I/O", "TOTAL_WAITS": 7, "TIME_WAITED": 450 }),
        json!({ "EVENT": "direct path read", "WAIT_CLASS": "User I/O", "TOTAL_WAITS": 1, "TIME_WAITED": null }),
        json!({ "EVENT": "SQL*Net message from client", "WAIT_CLASS": "Idle", "TOTAL_WAITS": 99, "TIME_WAITED": 99999 }),
    ]
}

#[tokio::test]
async fn test_wait_events_filtered_by_class_and_sorted() {
    let app = spawn_app().await;
    let id = app.create_connection("Primary", "ORCLPDB1").await;
    app.driver.respond("v$system_event", wait_event_rows());

    let response = app
        .get("/api/monitoring/wait-events")
        .add_query_param("connection_id", &id)
        .add_query_param("wait_class", "User I/O")
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["count"], 3);

    let events: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event"].as_str().unwrap())
        .collect();
    assert_eq!(
        events,
        vec!["db file scattered read", "db file sequential read", "direct path read"]
    );
    assert_eq!(body["data"][0]["total_waits"], 7);

    let statements = app.driver.statements();
    let (sql, binds) = statements.last().unwrap();
    assert!(sql.contains("wait_class = :1"));
    assert_eq!(binds, &vec![BindValue::Text("User I/O".to_string())]);
}

#[tokio::test]
async fn test_wait_events_exclude_idle_by_default() {
    let app = spawn_app().await;
    let id = app.create_connection("Primary", "ORCLPDB1").await;
    app.driver.respond("v$system_event", wait_event_rows());

    let body: Value = app
        .get("/api/monitoring/wait-events")
        .add_query_param("connection_id", &id)
        .await
        .json();
    assert_eq!(body["count"], 4);
    assert_eq!(body["data"][0]["event"], "log file sync");

    let body: Value = app
        .get("/api/monitoring/wait-events")
        .add_query_param("connection_id", &id)
        .add_query_param("include_idle", true)
        .await
        .json();
    assert_eq!(body["count"], 5);
    assert_eq!(body["data"][0]["wait_class"], "Idle");
}

#[tokio::test]
async fn test_missing_connection_id_is_rejected_without_oracle_calls() {
    let app = spawn_app().await;

    for path in [
        "/api/monitoring/wait-events",
        "/api/monitoring/sessions",
        "/api/monitoring/top-sql",
        "/api/monitoring/tablespaces",
        "/api/monitoring/awr-snapshots",
    ] {
        let response = app.get(path).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Missing required parameter: connection_id");
    }
    assert_eq!(app.driver.connects(), 0);
}

#[tokio::test]
async fn test_unknown_connection_is_not_found() {
    let app = spawn_app().await;

    let response = app
        .get("/api/monitoring/sessions")
        .add_query_param("connection_id", "does-not-exist")
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(app.driver.connects(), 0);
}

#[tokio::test]
async fn test_top_sql_validation() {
    let app = spawn_app().await;
    let id = app.create_connection("Primary", "ORCLPDB1").await;

    app.get("/api/monitoring/top-sql")
        .add_query_param("connection_id", &id)
        .add_query_param("order_by", "sql_text; DROP TABLE x")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    app.get("/api/monitoring/top-sql")
        .add_query_param("connection_id", &id)
        .add_query_param("limit", 0)
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    app.get("/api/monitoring/top-sql")
        .add_query_param("connection_id", &id)
        .add_query_param("limit", 101)
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(app.driver.connects(), 0);

    app.driver.respond(
        "avg_elapsed_ms",
        vec![json!({ "SQL_ID": "abc123", "EXECUTIONS": 5, "CPU_TIME": 777 })],
    );
    let response = app
        .get("/api/monitoring/top-sql")
        .add_query_param("connection_id", &id)
        .add_query_param("order_by", "cpu_time")
        .add_query_param("limit", 5)
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["order_by"], "cpu_time");
    assert_eq!(body["data"][0]["sql_id"], "abc123");

    let statements = app.driver.statements();
    let (sql, binds) = statements.last().unwrap();
    assert!(sql.contains("ORDER BY cpu_time DESC"));
    assert_eq!(binds, &vec![BindValue::Integer(5)]);
}

#[tokio::test]
async fn test_sessions_filters_are_bound() {
    let app = spawn_app().await;
    let id = app.create_connection("Primary", "ORCLPDB1").await;

    app.get("/api/monitoring/sessions")
        .add_query_param("connection_id", &id)
        .add_query_param("status", "active")
        .add_query_param("username", "hr")
        .await
        .assert_status_ok();

    let statements = app.driver.statements();
    let (sql, binds) = statements.last().unwrap();
    assert!(sql.contains("AND status = :1"));
    assert!(sql.contains("AND username = :2"));
    assert_eq!(
        binds,
        &vec![
            BindValue::Text("ACTIVE".to_string()),
            BindValue::Text("HR".to_string())
        ]
    );
}

#[tokio::test]
async fn test_connections_are_released_after_every_call() {
    let app = spawn_app().await;
    let id = app.create_connection("Primary", "ORCLPDB1").await;
    app.driver.fail(
        "dba_tablespace_usage_metrics",
        DriverError::new("ORA-00942: table or view does not exist").with_code(942),
    );

    for i in 0..10 {
        let path = if i % 2 == 0 {
            "/api/monitoring/wait-events"
        } else {
            "/api/monitoring/tablespaces"
        };
        app.get(path).add_query_param("connection_id", &id).await;
    }

    assert_eq!(app.driver.connects(), 10);
    assert_eq!(app.driver.open_sessions(), 0);
}

#[tokio::test]
async fn test_oracle_error_code_and_offset_are_passed_through() {
    let app = spawn_app().await;
    let id = app.create_connection("Primary", "ORCLPDB1").await;
    app.driver.fail(
        "dba_hist_snapshot",
        DriverError {
            code: Some(942),
            offset: Some(116),
            message: "ORA-00942: table or view does not exist".to_string(),
        },
    );

    let response = app
        .get("/api/monitoring/awr-snapshots")
        .add_query_param("connection_id", &id)
        .await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "ORA-00942");
    assert_eq!(body["offset"], 116);
    assert_eq!(body["error"], "ORA-00942: table or view does not exist");
}

#[tokio::test]
async fn test_collect_then_read_history() {
    let app = spawn_app().await;
    let id = app.create_connection("Primary", "ORCLPDB1").await;
    app.driver.respond("v$system_event", wait_event_rows());
    app.driver.respond(
        "avg_elapsed_ms",
        vec![
            json!({ "SQL_ID": "a1", "ELAPSED_TIME": 10 }),
            json!({ "SQL_ID": "b2", "ELAPSED_TIME": 5 }),
        ],
    );

    let response = app
        .post("/api/monitoring/collect")
        .json(&json!({ "connection_id": id }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"][0]["kind"], "wait_events");
    assert_eq!(body["data"][0]["row_count"], 4);
    assert_eq!(body["data"][1]["kind"], "sql_stats");
    assert_eq!(body["data"][1]["row_count"], 2);

    let body: Value = app
        .get("/api/history")
        .add_query_param("connection_id", &id)
        .add_query_param("kind", "sql_stats")
        .await
        .json();
    assert_eq!(body["count"], 1);
    assert_eq!(body["data"][0]["payload"][0]["sql_id"], "a1");

    app.get("/api/history")
        .add_query_param("connection_id", &id)
        .add_query_param("kind", "bogus")
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.post("/api/monitoring/collect")
        .json(&json!({ "connection_id": id, "kinds": ["stats_collection"] }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}
