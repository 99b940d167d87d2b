//! Shared fixtures: a scripted Oracle driver and a logged-in test server.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum_test::{TestRequest, TestServer};
use oradash_api::config::AppConfig;
use oradash_api::oracle::{
    BindValue, ColumnMeta, DriverConnection, DriverError, OracleDriver, ResolvedConfig, Row,
};
use oradash_api::server::{create_router, create_state};
use oradash_api::AppState;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;

pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const ADMIN_PASSWORD: &str = "correct-horse-battery";

#[derive(Clone)]
enum Canned {
    Rows(Vec<Row>),
    Fail(DriverError),
}

#[derive(Default)]
struct Tally {
    connects: AtomicUsize,
    open: AtomicUsize,
    statements: Mutex<Vec<(String, Vec<BindValue>)>>,
    canned: Mutex<Vec<(String, Canned)>>,
    refuse_connect: Mutex<Option<DriverError>>,
}

/// Driver double. Answers statements by the first registered SQL substring
/// and tracks how many sessions are open.
#[derive(Clone, Default)]
pub struct FakeDriver {
    tally: Arc<Tally>,
}

impl FakeDriver {
    /// Answer statements containing `needle` with `rows` (JSON objects).
    pub fn respond(&self, needle: &str, rows: Vec<Value>) {
        let rows = rows
            .into_iter()
            .map(|v| match v {
                Value::Object(map) => map,
                other => panic!("canned row must be an object, got {other}"),
            })
            .collect();
        self.tally.canned.lock().insert(0, (needle.to_string(), Canned::Rows(rows)));
    }

    /// Fail statements containing `needle`.
    pub fn fail(&self, needle: &str, error: DriverError) {
        self.tally.canned.lock().insert(0, (needle.to_string(), Canned::Fail(error)));
    }

    /// Fail every connection attempt.
    pub fn refuse_connections(&self, error: DriverError) {
        *self.tally.refuse_connect.lock() = Some(error);
    }

    pub fn connects(&self) -> usize {
        self.tally.connects.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.tally.open.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<(String, Vec<BindValue>)> {
        self.tally.statements.lock().clone()
    }

    fn answer(&self, sql: &str) -> Option<Canned> {
        self.tally
            .canned
            .lock()
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, canned)| canned.clone())
    }
}

impl OracleDriver for FakeDriver {
    fn connect(
        &self,
        _config: &ResolvedConfig,
        _call_timeout: Duration,
    ) -> Result<Box<dyn DriverConnection>, DriverError> {
        self.tally.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.tally.refuse_connect.lock().clone() {
            return Err(e);
        }
        self.tally.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            driver: self.clone(),
        }))
    }
}

struct FakeConnection {
    driver: FakeDriver,
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        self.driver.tally.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DriverConnection for FakeConnection {
    fn query(
        &mut self,
        sql: &str,
        binds: &[BindValue],
        max_rows: usize,
        _fetch_array_size: u32,
    ) -> Result<(Vec<ColumnMeta>, Vec<Row>), DriverError> {
        self.driver
            .tally
            .statements
            .lock()
            .push((sql.to_string(), binds.to_vec()));
        match self.driver.answer(sql) {
            Some(Canned::Fail(e)) => Err(e),
            Some(Canned::Rows(rows)) => {
                let meta = rows
                    .first()
                    .map(|row| {
                        row.keys()
                            .map(|name| ColumnMeta {
                                name: name.clone(),
                                db_type: "VARCHAR2".to_string(),
                                nullable: true,
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Ok((meta, rows.into_iter().take(max_rows).collect()))
            }
            None => Ok((Vec::new(), Vec::new())),
        }
    }

    fn execute(&mut self, sql: &str, binds: &[BindValue], _auto_commit: bool) -> Result<u64, DriverError> {
        self.driver
            .tally
            .statements
            .lock()
            .push((sql.to_string(), binds.to_vec()));
        match self.driver.answer(sql) {
            Some(Canned::Fail(e)) => Err(e),
            Some(Canned::Rows(rows)) => Ok(rows.len() as u64),
            None => Ok(0),
        }
    }

    fn close(self: Box<Self>) -> Result<(), DriverError> {
        Ok(())
    }
}

/// Running app plus the handles tests inspect.
pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    pub driver: FakeDriver,
    pub token: String,
    _dir: TempDir,
}

impl TestApp {
    pub fn get(&self, path: &str) -> TestRequest {
        self.server.get(path).authorization_bearer(&self.token)
    }

    pub fn post(&self, path: &str) -> TestRequest {
        self.server.post(path).authorization_bearer(&self.token)
    }

    pub fn patch(&self, path: &str) -> TestRequest {
        self.server.patch(path).authorization_bearer(&self.token)
    }

    pub fn put(&self, path: &str) -> TestRequest {
        self.server.put(path).authorization_bearer(&self.token)
    }

    pub fn delete(&self, path: &str) -> TestRequest {
        self.server.delete(path).authorization_bearer(&self.token)
    }

    /// Create a service-name connection and return its id.
    pub async fn create_connection(&self, name: &str, service_name: &str) -> String {
        let response = self
            .post("/api/connections")
            .json(&json!({
                "name": name,
                "host": "db.internal",
                "port": 1521,
                "service_name": service_name,
                "username": "system",
                "password": "oracle-secret",
            }))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        body["data"]["id"].as_str().unwrap().to_string()
    }
}

pub fn test_config(dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.store.path = dir.path().join("oradash.sqlite");
    config.store.key_path = dir.path().join("encryption.key");
    config.auth.bootstrap_email = Some(ADMIN_EMAIL.to_string());
    config.auth.bootstrap_password = Some(ADMIN_PASSWORD.to_string());
    config
}

/// Start an app on a temporary store and sign in as the bootstrap admin.
pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

pub async fn spawn_app_with(customize: impl FnOnce(&mut AppConfig)) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    customize(&mut config);

    let driver = FakeDriver::default();
    let state = create_state(config, Arc::new(driver.clone())).await.unwrap();
    let server = TestServer::new(create_router(state.clone())).unwrap();

    let login = server
        .post("/api/auth/login")
        .json(&json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD }))
        .await;
    login.assert_status_ok();
    let token = login.cookie("oradash_session").value().to_string();

    TestApp {
        server,
        state,
        driver,
        token,
        _dir: dir,
    }
}
