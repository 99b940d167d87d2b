//! Oracle client driver backed by the `oracle` crate (ODPI-C).
//!
//! The client library is loaded at runtime; nothing here runs until the
//! first connection is opened.

use std::path::Path;
use std::time::Duration;

use ::oracle::sql_type::{OracleType, ToSql};
use ::oracle::{Connection, Connector};
use serde_json::Value;

use super::executor::{BindValue, ColumnMeta, DriverConnection, DriverError, OracleDriver, Row};
use super::resolver::ResolvedConfig;
use crate::database::Privilege;

impl From<::oracle::Error> for DriverError {
    fn from(err: ::oracle::Error) -> Self {
        let (code, offset) = err
            .db_error()
            .map_or((None, None), |db| (Some(db.code()), Some(u32::from(db.offset()))));
        Self {
            code,
            offset,
            message: err.to_string(),
        }
    }
}

/// Initialise the Oracle client from an explicit library directory.
///
/// Without this call ODPI-C searches the platform default locations.
pub fn init_client(lib_dir: &Path) -> anyhow::Result<()> {
    let mut params = ::oracle::InitParams::new();
    params
        .oracle_client_lib_dir(lib_dir)
        .map_err(|e| anyhow::anyhow!("Invalid Oracle client directory {}: {e}", lib_dir.display()))?;
    params
        .init()
        .map_err(|e| anyhow::anyhow!("Failed to initialise Oracle client: {e}"))?;
    Ok(())
}

/// Driver that opens real OCI sessions.
#[derive(Debug, Default)]
pub struct OciDriver;

impl OracleDriver for OciDriver {
    fn connect(
        &self,
        config: &ResolvedConfig,
        call_timeout: Duration,
    ) -> Result<Box<dyn DriverConnection>, DriverError> {
        let mut connector = Connector::new(
            config.username.as_str(),
            config.password.as_str(),
            config.connect_string(),
        );
        if let Some(privilege) = config.privilege {
            connector.privilege(map_privilege(privilege));
        }

        let conn = connector.connect()?;
        conn.set_call_timeout(Some(call_timeout))?;
        Ok(Box::new(OciConnection { conn }))
    }
}

fn map_privilege(privilege: Privilege) -> ::oracle::Privilege {
    match privilege {
        Privilege::Sysdba => ::oracle::Privilege::Sysdba,
        Privilege::Sysoper => ::oracle::Privilege::Sysoper,
        Privilege::Sysbackup => ::oracle::Privilege::Sysbackup,
        Privilege::Sysdg => ::oracle::Privilege::Sysdg,
        Privilege::Syskm => ::oracle::Privilege::Syskm,
    }
}

struct OciConnection {
    conn: Connection,
}

fn to_oracle_binds(binds: &[BindValue]) -> Vec<Box<dyn ToSql>> {
    binds
        .iter()
        .map(|bind| -> Box<dyn ToSql> {
            match bind {
                BindValue::Null => Box::new(None::<String>),
                BindValue::Bool(b) => Box::new(i64::from(*b)),
                BindValue::Integer(i) => Box::new(*i),
                BindValue::Float(f) => Box::new(*f),
                BindValue::Text(s) => Box::new(s.clone()),
            }
        })
        .collect()
}

fn is_numeric(oracle_type: &OracleType) -> bool {
    matches!(
        oracle_type,
        OracleType::Number(_, _)
            | OracleType::Float(_)
            | OracleType::BinaryFloat
            | OracleType::BinaryDouble
            | OracleType::Int64
            | OracleType::UInt64
    )
}

/// NUMBER becomes an integer when it has no fractional part, a float otherwise.
fn number_value(text: &str) -> Value {
    if let Ok(i) = text.parse::<i64>() {
        return Value::from(i);
    }
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map_or_else(|| Value::String(text.to_string()), Value::Number)
}

impl DriverConnection for OciConnection {
    fn query(
        &mut self,
        sql: &str,
        binds: &[BindValue],
        max_rows: usize,
        fetch_array_size: u32,
    ) -> Result<(Vec<ColumnMeta>, Vec<Row>), DriverError> {
        let owned = to_oracle_binds(binds);
        let params: Vec<&dyn ToSql> = owned.iter().map(AsRef::as_ref).collect();

        let mut stmt = self
            .conn
            .statement(sql)
            .fetch_array_size(fetch_array_size)
            .build()?;
        let result_set = stmt.query(&params)?;

        let columns: Vec<(String, bool)> = result_set
            .column_info()
            .iter()
            .map(|c| (c.name().to_string(), is_numeric(c.oracle_type())))
            .collect();
        let meta_data = result_set
            .column_info()
            .iter()
            .map(|c| ColumnMeta {
                name: c.name().to_string(),
                db_type: c.oracle_type().to_string(),
                nullable: c.nullable(),
            })
            .collect();

        let mut rows = Vec::new();
        for row in result_set.take(max_rows) {
            let row = row?;
            let mut out = Row::with_capacity(columns.len());
            for ((name, numeric), value) in columns.iter().zip(row.sql_values()) {
                let text: Option<String> = match value.get() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::debug!("Column {} not convertible to text: {}", name, e);
                        None
                    }
                };
                let json = match text {
                    None => Value::Null,
                    Some(t) if *numeric => number_value(&t),
                    Some(t) => Value::String(t),
                };
                out.insert(name.clone(), json);
            }
            rows.push(out);
        }

        Ok((meta_data, rows))
    }

    fn execute(&mut self, sql: &str, binds: &[BindValue], auto_commit: bool) -> Result<u64, DriverError> {
        let owned = to_oracle_binds(binds);
        let params: Vec<&dyn ToSql> = owned.iter().map(AsRef::as_ref).collect();

        self.conn.set_autocommit(auto_commit);
        let stmt = self.conn.execute(sql, &params)?;
        Ok(stmt.row_count()?)
    }

    fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.conn.close()?;
        Ok(())
    }
}
