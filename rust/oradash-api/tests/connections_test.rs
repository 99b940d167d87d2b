//! Connection vault and health checks.

mod common;

use axum::http::StatusCode;
use common::spawn_app;
use oradash_api::oracle::DriverError;
use serde_json::{json, Value};

#[tokio::test]
async fn test_connection_crud_hides_password() {
    let app = spawn_app().await;
    let id = app.create_connection("Primary", "ORCLPDB1").await;

    let response = app.get(&format!("/api/connections/{id}")).await;
    response.assert_status_ok();
    let body: Value = response.json();
    let data = &body["data"];
    assert_eq!(data["name"], "Primary");
    assert_eq!(data["port"], 1521);
    assert_eq!(data["connection_type"], "SERVICE_NAME");
    assert_eq!(data["has_password"], true);
    assert!(data.get("encrypted_password").is_none());
    assert!(data.get("password").is_none());

    let response = app
        .patch(&format!("/api/connections/{id}"))
        .json(&json!({ "name": "Primary (renamed)", "port": 1522 }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["name"], "Primary (renamed)");
    assert_eq!(body["data"]["port"], 1522);

    let response = app.get("/api/connections").await;
    let body: Value = response.json();
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn test_create_connection_validation() {
    let app = spawn_app().await;
    let base = json!({
        "name": "Reporting",
        "host": "db.internal",
        "service_name": "REPORTS",
        "username": "system",
    });

    // Missing password.
    let response = app.post("/api/connections").json(&base).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"], "Missing required parameter: password");

    // Both selectors for a service-name connection.
    let mut both = base.clone();
    both["password"] = json!("secret");
    both["sid"] = json!("ORCL");
    both["connection_type"] = json!("SERVICE_NAME");
    app.post("/api/connections")
        .json(&both)
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    // Port zero.
    let mut zero = base.clone();
    zero["password"] = json!("secret");
    zero["port"] = json!(0);
    app.post("/api/connections")
        .json(&zero)
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sid_is_inferred() {
    let app = spawn_app().await;

    let response = app
        .post("/api/connections")
        .json(&json!({
            "name": "Legacy",
            "host": "legacy.internal",
            "sid": "ORCL",
            "username": "system",
            "password": "secret",
        }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["connection_type"], "SID");
}

#[tokio::test]
async fn test_duplicate_connection_is_rejected() {
    let app = spawn_app().await;
    app.create_connection("First", "ORCLPDB1").await;

    let response = app
        .post("/api/connections")
        .json(&json!({
            "name": "Second",
            "host": "db.internal",
            "port": 1521,
            "service_name": "ORCLPDB1",
            "username": "system",
            "password": "other",
        }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_check_records_result() {
    let app = spawn_app().await;
    let id = app.create_connection("Primary", "ORCLPDB1").await;
    app.driver.respond(
        "v$instance",
        vec![json!({
            "INSTANCE_NAME": "orcl",
            "HOST_NAME": "db01",
            "VERSION": "19.0.0.0.0",
            "STATUS": "OPEN",
            "DATABASE_STATUS": "ACTIVE",
            "STARTUP_TIME": "2026-01-01T00:00:00",
        })],
    );

    let response = app.post(&format!("/api/connections/{id}/test")).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["healthy"], true);
    assert_eq!(body["data"]["instance"]["instance_name"], "orcl");

    let body: Value = app.get(&format!("/api/connections/{id}")).await.json();
    assert_eq!(body["data"]["last_health_status"], "healthy");
    assert!(body["data"]["last_health_check_at"].is_string());
}

#[tokio::test]
async fn test_failed_health_check_is_recorded() {
    let app = spawn_app().await;
    let id = app.create_connection("Primary", "ORCLPDB1").await;
    app.driver
        .refuse_connections(DriverError::new("ORA-12541: TNS:no listener").with_code(12541));

    let response = app.post(&format!("/api/connections/{id}/test")).await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "ORA-12541");

    let body: Value = app.get(&format!("/api/connections/{id}")).await.json();
    assert_eq!(body["data"]["last_health_status"], "unhealthy");
    assert!(body["data"]["last_health_error"]
        .as_str()
        .unwrap()
        .contains("ORA-12541"));
    assert_eq!(app.driver.open_sessions(), 0);
}

#[tokio::test]
async fn test_unsaved_connection_test_does_not_persist() {
    let app = spawn_app().await;

    let response = app
        .post("/api/connections/test")
        .json(&json!({
            "host": "db.internal",
            "service_name": "ORCLPDB1",
            "username": "system",
            "password": "secret",
        }))
        .await;
    response.assert_status_ok();
    assert_eq!(app.driver.connects(), 1);

    let body: Value = app.get("/api/connections").await.json();
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn test_deactivated_connection_cannot_be_used() {
    let app = spawn_app().await;
    let id = app.create_connection("Primary", "ORCLPDB1").await;

    // Warm the resolver cache first.
    app.get("/api/monitoring/tablespaces")
        .add_query_param("connection_id", &id)
        .await
        .assert_status_ok();

    let response = app.delete(&format!("/api/connections/{id}")).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["is_active"], false);

    app.get("/api/monitoring/tablespaces")
        .add_query_param("connection_id", &id)
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let body: Value = app.get("/api/connections").await.json();
    assert_eq!(body["count"], 0);
    let body: Value = app
        .get("/api/connections")
        .add_query_param("include_inactive", true)
        .await
        .json();
    assert_eq!(body["count"], 1);

    app.delete("/api/connections/unknown-id")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_single_default_connection() {
    let app = spawn_app().await;
    let first = app.create_connection("First", "PDB1").await;
    let second = app.create_connection("Second", "PDB2").await;

    app.post(&format!("/api/connections/{first}/default"))
        .await
        .assert_status_ok();
    app.post(&format!("/api/connections/{second}/default"))
        .await
        .assert_status_ok();

    let body: Value = app.get("/api/connections").await.json();
    let defaults: Vec<&Value> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|c| c["is_default"] == true)
        .collect();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0]["id"], second.as_str());
}
