//! Oracle connection vault.
//!
//! Records are soft-deleted only. The password column always holds the
//! [`KeyManager`](super::KeyManager) envelope, never plaintext.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Deserializer, Serialize};

use super::store::{is_unique_violation, parse_datetime, parse_optional_datetime, Store};

/// How the Oracle target is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionType {
    ServiceName,
    Sid,
}

impl ConnectionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ServiceName => "SERVICE_NAME",
            Self::Sid => "SID",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "SERVICE_NAME" => Ok(Self::ServiceName),
            "SID" => Ok(Self::Sid),
            other => anyhow::bail!("Unknown connection_type '{other}' in store"),
        }
    }
}

/// Administrative privilege used when connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Privilege {
    Sysdba,
    Sysoper,
    Sysbackup,
    Sysdg,
    Syskm,
}

impl Privilege {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sysdba => "SYSDBA",
            Self::Sysoper => "SYSOPER",
            Self::Sysbackup => "SYSBACKUP",
            Self::Sysdg => "SYSDG",
            Self::Syskm => "SYSKM",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "SYSDBA" => Some(Self::Sysdba),
            "SYSOPER" => Some(Self::Sysoper),
            "SYSBACKUP" => Some(Self::Sysbackup),
            "SYSDG" => Some(Self::Sysdg),
            "SYSKM" => Some(Self::Syskm),
            _ => None,
        }
    }
}

/// Result of the last health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
        }
    }
}

/// Stored connection record.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionRecord {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub service_name: Option<String>,
    pub sid: Option<String>,
    pub username: String,
    #[serde(skip_serializing)]
    pub encrypted_password: String,
    pub connection_type: ConnectionType,
    pub privilege: Option<Privilege>,
    pub is_active: bool,
    pub is_default: bool,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub last_health_status: Option<String>,
    pub last_health_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// API view of a record: everything except the password envelope.
#[derive(Debug, Serialize)]
pub struct ConnectionView<'a> {
    #[serde(flatten)]
    record: &'a ConnectionRecord,
    has_password: bool,
}

impl ConnectionRecord {
    /// Public representation returned by the API.
    #[must_use]
    pub fn view(&self) -> ConnectionView<'_> {
        ConnectionView {
            record: self,
            has_password: !self.encrypted_password.is_empty(),
        }
    }

    /// Apply a partial update. The password is handled by the caller since it
    /// needs encrypting.
    pub fn apply(&mut self, update: ConnectionUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(host) = update.host {
            self.host = host;
        }
        if let Some(port) = update.port {
            self.port = port;
        }
        if let Some(username) = update.username {
            self.username = username;
        }
        if let Some(privilege) = update.privilege {
            self.privilege = privilege;
        }
        if let Some(active) = update.is_active {
            self.is_active = active;
            if !active {
                self.is_default = false;
            }
        }

        // Switching the selector drops the other half unless it was sent too.
        if let Some(kind) = update.connection_type {
            if kind != self.connection_type {
                match kind {
                    ConnectionType::ServiceName if update.sid.is_none() => self.sid = None,
                    ConnectionType::Sid if update.service_name.is_none() => {
                        self.service_name = None;
                    }
                    _ => {}
                }
            }
            self.connection_type = kind;
        }
        if let Some(service_name) = update.service_name {
            self.service_name = service_name;
        }
        if let Some(sid) = update.sid {
            self.sid = sid;
        }
    }
}

/// Validate the service name / SID selector.
///
/// Returns a message suitable for a 400 response.
pub fn validate_target(
    connection_type: ConnectionType,
    service_name: Option<&str>,
    sid: Option<&str>,
) -> std::result::Result<(), String> {
    let present = |v: Option<&str>| v.is_some_and(|s| !s.trim().is_empty());
    match connection_type {
        ConnectionType::ServiceName if !present(service_name) => {
            Err("service_name is required when connection_type is SERVICE_NAME".to_string())
        }
        ConnectionType::ServiceName if sid.is_some() => {
            Err("sid must not be set when connection_type is SERVICE_NAME".to_string())
        }
        ConnectionType::Sid if !present(sid) => {
            Err("sid is required when connection_type is SID".to_string())
        }
        ConnectionType::Sid if service_name.is_some() => {
            Err("service_name must not be set when connection_type is SID".to_string())
        }
        _ => Ok(()),
    }
}

/// Fields for a new record. The password is already encrypted.
#[derive(Debug, Clone)]
pub struct NewConnection {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub service_name: Option<String>,
    pub sid: Option<String>,
    pub username: String,
    pub encrypted_password: String,
    pub connection_type: ConnectionType,
    pub privilege: Option<Privilege>,
    pub is_default: bool,
}

/// Partial update body for `PATCH /api/connections/{id}`.
///
/// Nullable columns use `Option<Option<_>>`: absent leaves the value alone,
/// `null` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionUpdate {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(default, deserialize_with = "double_option")]
    pub service_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub sid: Option<Option<String>>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connection_type: Option<ConnectionType>,
    #[serde(default, deserialize_with = "double_option")]
    pub privilege: Option<Option<Privilege>>,
    pub is_active: Option<bool>,
}

fn double_option<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Raised when a create or update would collide with the unique target index.
#[derive(Debug, thiserror::Error)]
#[error("A connection for {username}@{host}:{port}/{target} already exists")]
pub struct DuplicateConnection {
    pub host: String,
    pub port: u16,
    pub target: String,
    pub username: String,
}

impl DuplicateConnection {
    fn of(host: &str, port: u16, target: Option<&str>, username: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            target: target.unwrap_or_default().to_string(),
            username: username.to_string(),
        }
    }
}

/// Repository for Oracle connection records.
#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    /// Insert a record. A duplicate target fails with [`DuplicateConnection`].
    async fn create_connection(&self, new: NewConnection) -> Result<ConnectionRecord>;

    /// Fetch by id, active or not.
    async fn get_connection(&self, id: &str) -> Result<Option<ConnectionRecord>>;

    /// List records, default first then by name.
    async fn list_connections(&self, include_inactive: bool) -> Result<Vec<ConnectionRecord>>;

    /// Persist every mutable column of `record`.
    async fn save_connection(&self, record: ConnectionRecord) -> Result<ConnectionRecord>;

    /// Soft-delete. Returns false for unknown ids.
    async fn deactivate_connection(&self, id: &str) -> Result<bool>;

    /// Make `id` the only default. Returns false for unknown or inactive ids.
    async fn set_default_connection(&self, id: &str) -> Result<bool>;

    /// The active default record, if any.
    async fn default_connection(&self) -> Result<Option<ConnectionRecord>>;

    /// Store the outcome of a health check.
    async fn record_health(&self, id: &str, status: HealthStatus, error: Option<String>)
        -> Result<()>;
}

const SELECT_COLUMNS: &str = "id, name, host, port, service_name, sid, username, encrypted_password,
    connection_type, privilege, is_active, is_default, last_health_check_at,
    last_health_status, last_health_error, created_at, updated_at";

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<(ConnectionRecord, String)> {
    let connection_type: String = row.get(8)?;
    let privilege: Option<String> = row.get(9)?;
    Ok((
        ConnectionRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            host: row.get(2)?,
            port: row.get(3)?,
            service_name: row.get(4)?,
            sid: row.get(5)?,
            username: row.get(6)?,
            encrypted_password: row.get(7)?,
            connection_type: ConnectionType::ServiceName,
            privilege: privilege.as_deref().and_then(Privilege::parse),
            is_active: row.get(10)?,
            is_default: row.get(11)?,
            last_health_check_at: parse_optional_datetime(row.get(12)?),
            last_health_status: row.get(13)?,
            last_health_error: row.get(14)?,
            created_at: parse_datetime(&row.get::<_, String>(15)?),
            updated_at: parse_datetime(&row.get::<_, String>(16)?),
        },
        connection_type,
    ))
}

fn finish_record((mut record, connection_type): (ConnectionRecord, String)) -> Result<ConnectionRecord> {
    record.connection_type = ConnectionType::parse(&connection_type)?;
    Ok(record)
}

fn load(conn: &rusqlite::Connection, id: &str) -> Result<Option<ConnectionRecord>> {
    let raw = conn
        .query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM oracle_connections WHERE id = ?1"),
            params![id],
            row_to_record,
        )
        .optional()?;
    raw.map(finish_record).transpose()
}

#[async_trait]
impl ConnectionRepository for Store {
    async fn create_connection(&self, new: NewConnection) -> Result<ConnectionRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        self.call(move |conn| {
            let tx = conn.transaction()?;
            if new.is_default {
                tx.execute(
                    "UPDATE oracle_connections SET is_default = 0, updated_at = ?1 WHERE is_default = 1",
                    params![now],
                )?;
            }
            let inserted = tx.execute(
                "INSERT INTO oracle_connections
                    (id, name, host, port, service_name, sid, username, encrypted_password,
                     connection_type, privilege, is_active, is_default, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11, ?12, ?12)",
                params![
                    id,
                    new.name,
                    new.host,
                    new.port,
                    new.service_name,
                    new.sid,
                    new.username,
                    new.encrypted_password,
                    new.connection_type.as_str(),
                    new.privilege.map(Privilege::as_str),
                    new.is_default,
                    now,
                ],
            );
            if let Err(e) = inserted {
                if is_unique_violation(&e) {
                    let target = new.service_name.as_deref().or(new.sid.as_deref());
                    return Err(DuplicateConnection::of(&new.host, new.port, target, &new.username).into());
                }
                return Err(e).context("Failed to insert connection");
            }
            tx.commit()?;

            load(conn, &id)?.ok_or_else(|| anyhow::anyhow!("Connection {id} vanished after insert"))
        })
        .await
    }

    async fn get_connection(&self, id: &str) -> Result<Option<ConnectionRecord>> {
        let id = id.to_string();
        self.call(move |conn| load(conn, &id)).await
    }

    async fn list_connections(&self, include_inactive: bool) -> Result<Vec<ConnectionRecord>> {
        self.call(move |conn| {
            let sql = format!(
                "SELECT {SELECT_COLUMNS} FROM oracle_connections
                 WHERE is_active = 1 OR ?1
                 ORDER BY is_default DESC, name COLLATE NOCASE ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![include_inactive], row_to_record)?;

            let mut records = Vec::new();
            for raw in rows {
                records.push(finish_record(raw?)?);
            }
            Ok(records)
        })
        .await
    }

    async fn save_connection(&self, record: ConnectionRecord) -> Result<ConnectionRecord> {
        let now = Utc::now().to_rfc3339();
        self.call(move |conn| {
            let updated = conn.execute(
                "UPDATE oracle_connections SET
                    name = ?2, host = ?3, port = ?4, service_name = ?5, sid = ?6, username = ?7,
                    encrypted_password = ?8, connection_type = ?9, privilege = ?10,
                    is_active = ?11, is_default = ?12, updated_at = ?13
                 WHERE id = ?1",
                params![
                    record.id,
                    record.name,
                    record.host,
                    record.port,
                    record.service_name,
                    record.sid,
                    record.username,
                    record.encrypted_password,
                    record.connection_type.as_str(),
                    record.privilege.map(Privilege::as_str),
                    record.is_active,
                    record.is_default,
                    now,
                ],
            );
            match updated {
                Ok(0) => anyhow::bail!("Connection {} not found", record.id),
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    let target = record.service_name.as_deref().or(record.sid.as_deref());
                    return Err(
                        DuplicateConnection::of(&record.host, record.port, target, &record.username)
                            .into(),
                    );
                }
                Err(e) => return Err(e).context("Failed to update connection"),
            }

            load(conn, &record.id)?
                .ok_or_else(|| anyhow::anyhow!("Connection {} vanished after update", record.id))
        })
        .await
    }

    async fn deactivate_connection(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        let now = Utc::now().to_rfc3339();
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE oracle_connections SET is_active = 0, is_default = 0, updated_at = ?2 WHERE id = ?1",
                params![id, now],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn set_default_connection(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        let now = Utc::now().to_rfc3339();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let active: Option<bool> = tx
                .query_row(
                    "SELECT is_active FROM oracle_connections WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            if active != Some(true) {
                return Ok(false);
            }

            tx.execute(
                "UPDATE oracle_connections SET is_default = 0, updated_at = ?2 WHERE is_default = 1 AND id <> ?1",
                params![id, now],
            )?;
            tx.execute(
                "UPDATE oracle_connections SET is_default = 1, updated_at = ?2 WHERE id = ?1",
                params![id, now],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn default_connection(&self) -> Result<Option<ConnectionRecord>> {
        self.call(|conn| {
            let raw = conn
                .query_row(
                    &format!(
                        "SELECT {SELECT_COLUMNS} FROM oracle_connections WHERE is_default = 1 AND is_active = 1"
                    ),
                    [],
                    row_to_record,
                )
                .optional()?;
            raw.map(finish_record).transpose()
        })
        .await
    }

    async fn record_health(
        &self,
        id: &str,
        status: HealthStatus,
        error: Option<String>,
    ) -> Result<()> {
        let id = id.to_string();
        let now = Utc::now().to_rfc3339();
        self.call(move |conn| {
            conn.execute(
                "UPDATE oracle_connections
                 SET last_health_check_at = ?2, last_health_status = ?3, last_health_error = ?4
                 WHERE id = ?1",
                params![id, now, status.as_str(), error],
            )?;
            Ok(())
        })
        .await
    }
}
