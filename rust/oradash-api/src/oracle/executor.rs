//! Oracle query execution.
//!
//! Each call opens a fresh driver connection on the blocking pool, runs one
//! statement under the driver call timeout and closes the connection again,
//! whatever the outcome. An outer tokio timeout of `timeout + 2s` bounds the
//! request itself.
//!
//! The driver is a trait object so the service can run against the real
//! client library or a test double.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::classify::{classify, StatementKind};
use super::resolver::ResolvedConfig;
use crate::config::OracleConfig;
use crate::logging::OpTimer;

/// Slack between the driver call timeout and the request timeout.
const OUTER_TIMEOUT_MARGIN: Duration = Duration::from_secs(2);

/// A result row keyed by the driver's column names.
pub type Row = Map<String, Value>;

/// Bind parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BindValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for BindValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for BindValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for BindValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl<T: Into<BindValue>> From<Option<T>> for BindValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Per-call execution settings.
#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
    pub timeout: Duration,
    pub max_rows: usize,
    pub fetch_array_size: u32,
    /// Ignored for DDL, which always commits.
    pub auto_commit: bool,
}

impl QueryOptions {
    #[must_use]
    pub fn from_config(config: &OracleConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_rows: config.max_rows,
            fetch_array_size: config.fetch_array_size,
            auto_commit: true,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    #[must_use]
    pub fn with_auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }
}

/// Column description returned with SELECT results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMeta {
    pub name: String,
    pub db_type: String,
    pub nullable: bool,
}

/// Result of one statement.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutput {
    pub rows: Vec<Row>,
    pub meta_data: Vec<ColumnMeta>,
    /// `None` for queries.
    pub rows_affected: Option<u64>,
    pub statement_kind: StatementKind,
    pub elapsed_ms: u64,
}

/// Statement plus its binds, for [`QueryExecutor::execute_many`].
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub binds: Vec<BindValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, binds: Vec<BindValue>) -> Self {
        Self {
            sql: sql.into(),
            binds,
        }
    }
}

/// Error reported by a driver.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DriverError {
    /// Numeric ORA code.
    pub code: Option<i32>,
    /// Byte offset of the error in the statement text.
    pub offset: Option<u32>,
    pub message: String,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            offset: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    /// `ORA-NNNNN` form of the code.
    #[must_use]
    pub fn code_label(&self) -> Option<String> {
        self.code.map(|c| format!("ORA-{c:05}"))
    }

    /// Call timeouts surface as ORA-03156 or ODPI's DPI-1067.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.code, Some(3156)) || self.message.contains("DPI-1067")
    }
}

/// Failure of [`QueryExecutor::execute`].
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Could not open a session (listener down, bad credentials, ...).
    #[error("Failed to connect to Oracle: {0}")]
    Connect(DriverError),

    /// Oracle rejected or failed the statement.
    #[error("{0}")]
    Upstream(DriverError),

    #[error("Query timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// The blocking worker panicked or was cancelled.
    #[error("Oracle worker task failed: {0}")]
    Join(String),
}

/// Opens driver connections.
pub trait OracleDriver: Send + Sync + 'static {
    /// Open a session with `call_timeout` applied to every round trip.
    fn connect(
        &self,
        config: &ResolvedConfig,
        call_timeout: Duration,
    ) -> Result<Box<dyn DriverConnection>, DriverError>;
}

/// One open driver session. Dropping it must release the session too.
pub trait DriverConnection: Send {
    /// Run a query, fetching at most `max_rows` rows.
    fn query(
        &mut self,
        sql: &str,
        binds: &[BindValue],
        max_rows: usize,
        fetch_array_size: u32,
    ) -> Result<(Vec<ColumnMeta>, Vec<Row>), DriverError>;

    /// Run DML, DDL or PL/SQL and return the affected row count.
    fn execute(&mut self, sql: &str, binds: &[BindValue], auto_commit: bool) -> Result<u64, DriverError>;

    /// Close the session.
    fn close(self: Box<Self>) -> Result<(), DriverError>;
}

/// Driver used when the crate is built without Oracle client support.
#[derive(Debug, Default)]
pub struct UnavailableDriver;

impl OracleDriver for UnavailableDriver {
    fn connect(&self, _: &ResolvedConfig, _: Duration) -> Result<Box<dyn DriverConnection>, DriverError> {
        Err(DriverError::new(
            "Oracle client support is not compiled in (enable the `oci` feature)",
        ))
    }
}

type Fetched = (Vec<ColumnMeta>, Vec<Row>, Option<u64>);

/// Executes statements against resolved connections.
#[derive(Clone)]
pub struct QueryExecutor {
    driver: Arc<dyn OracleDriver>,
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor").finish_non_exhaustive()
    }
}

impl QueryExecutor {
    #[must_use]
    pub fn new(driver: Arc<dyn OracleDriver>) -> Self {
        Self { driver }
    }

    /// Run one statement.
    pub async fn execute(
        &self,
        config: &ResolvedConfig,
        sql: &str,
        binds: Vec<BindValue>,
        options: QueryOptions,
    ) -> Result<QueryOutput, ExecutorError> {
        let kind = classify(sql);
        let timeout_ms = u64::try_from(options.timeout.as_millis()).unwrap_or(u64::MAX);
        let timer = OpTimer::new("oracle", "execute");

        let driver = Arc::clone(&self.driver);
        let config_owned = config.clone();
        let sql_owned = sql.to_string();
        let task = tokio::task::spawn_blocking(move || {
            run_statement(driver.as_ref(), &config_owned, &sql_owned, &binds, kind, options)
        });

        // The blocking task keeps running past the outer timeout and still
        // closes its connection when the driver returns.
        let result = match tokio::time::timeout(options.timeout + OUTER_TIMEOUT_MARGIN, task).await {
            Err(_) => Err(ExecutorError::Timeout { timeout_ms }),
            Ok(Err(join)) => Err(ExecutorError::Join(join.to_string())),
            Ok(Ok(result)) => result.map_err(|e| match e {
                ExecutorError::Upstream(ref d) | ExecutorError::Connect(ref d) if d.is_timeout() => {
                    ExecutorError::Timeout { timeout_ms }
                }
                other => other,
            }),
        };

        let elapsed = timer.finish_with_result(result.as_ref());
        match &result {
            Ok(_) => tracing::debug!(
                "Statement finished - connection_id={}, kind={:?}, elapsed_ms={}",
                config.connection_id,
                kind,
                elapsed.as_millis()
            ),
            Err(e) => tracing::warn!(
                "⚠️  Statement failed - connection_id={}, kind={:?}, error={}",
                config.connection_id,
                kind,
                e
            ),
        }

        let (meta_data, rows, rows_affected) = result?;
        Ok(QueryOutput {
            rows,
            meta_data,
            rows_affected,
            statement_kind: kind,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Run independent statements concurrently; the first failure wins.
    pub async fn execute_many(
        &self,
        config: &ResolvedConfig,
        statements: Vec<Statement>,
        options: QueryOptions,
    ) -> Result<Vec<QueryOutput>, ExecutorError> {
        futures::future::try_join_all(
            statements
                .into_iter()
                .map(move |s| async move { self.execute(config, &s.sql, s.binds, options).await }),
        )
        .await
    }
}

fn run_statement(
    driver: &dyn OracleDriver,
    config: &ResolvedConfig,
    sql: &str,
    binds: &[BindValue],
    kind: StatementKind,
    options: QueryOptions,
) -> Result<Fetched, ExecutorError> {
    let mut conn = driver
        .connect(config, options.timeout)
        .map_err(ExecutorError::Connect)?;

    let outcome = match kind {
        StatementKind::Select => conn
            .query(sql, binds, options.max_rows, options.fetch_array_size)
            .map(|(meta, rows)| (meta, rows, None)),
        StatementKind::Ddl => conn
            .execute(sql, binds, true)
            .map(|n| (Vec::new(), Vec::new(), Some(n))),
        StatementKind::Dml => conn
            .execute(sql, binds, options.auto_commit)
            .map(|n| (Vec::new(), Vec::new(), Some(n))),
    };

    if let Err(e) = conn.close() {
        tracing::warn!(
            "⚠️  Failed to close Oracle connection - connection_id={}, error={}",
            config.connection_id,
            e
        );
    }

    outcome.map_err(ExecutorError::Upstream)
}
