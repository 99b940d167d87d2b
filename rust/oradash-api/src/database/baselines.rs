//! Locally tracked SQL plan baselines.
//!
//! Records are created whole and replaced whole; there is no partial update.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::store::{parse_datetime, Store};

/// Mutable content of a baseline record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanBaselineData {
    pub oracle_connection_id: String,
    pub sql_id: String,
    pub plan_hash_value: i64,
    pub sql_handle: Option<String>,
    pub plan_name: Option<String>,
    pub sql_text: Option<String>,
    pub origin: Option<String>,
    pub is_enabled: bool,
    pub is_accepted: bool,
    pub is_fixed: bool,
    pub optimizer_cost: Option<i64>,
    pub executions: Option<i64>,
    pub elapsed_time: Option<i64>,
    pub cpu_time: Option<i64>,
    pub buffer_gets: Option<i64>,
}

impl PlanBaselineData {
    /// New baseline with the documented flag defaults (enabled, accepted, not fixed).
    #[must_use]
    pub fn new(oracle_connection_id: String, sql_id: String, plan_hash_value: i64) -> Self {
        Self {
            oracle_connection_id,
            sql_id,
            plan_hash_value,
            sql_handle: None,
            plan_name: None,
            sql_text: None,
            origin: None,
            is_enabled: true,
            is_accepted: true,
            is_fixed: false,
            optimizer_cost: None,
            executions: None,
            elapsed_time: None,
            cpu_time: None,
            buffer_gets: None,
        }
    }
}

/// Stored baseline.
#[derive(Debug, Clone, Serialize)]
pub struct PlanBaseline {
    pub id: String,
    #[serde(flatten)]
    pub data: PlanBaselineData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait BaselineRepository: Send + Sync {
    async fn create_baseline(&self, data: PlanBaselineData) -> Result<PlanBaseline>;

    async fn get_baseline(&self, id: &str) -> Result<Option<PlanBaseline>>;

    /// Baselines for one connection, newest first.
    async fn list_baselines(&self, connection_id: &str) -> Result<Vec<PlanBaseline>>;

    /// Overwrite every field. Returns `None` for unknown ids.
    async fn replace_baseline(&self, id: &str, data: PlanBaselineData)
        -> Result<Option<PlanBaseline>>;
}

const COLUMNS: &str = "id, oracle_connection_id, sql_id, plan_hash_value, sql_handle, plan_name,
    sql_text, origin, is_enabled, is_accepted, is_fixed, optimizer_cost, executions,
    elapsed_time, cpu_time, buffer_gets, created_at, updated_at";

fn row_to_baseline(row: &Row<'_>) -> rusqlite::Result<PlanBaseline> {
    Ok(PlanBaseline {
        id: row.get(0)?,
        data: PlanBaselineData {
            oracle_connection_id: row.get(1)?,
            sql_id: row.get(2)?,
            plan_hash_value: row.get(3)?,
            sql_handle: row.get(4)?,
            plan_name: row.get(5)?,
            sql_text: row.get(6)?,
            origin: row.get(7)?,
            is_enabled: row.get(8)?,
            is_accepted: row.get(9)?,
            is_fixed: row.get(10)?,
            optimizer_cost: row.get(11)?,
            executions: row.get(12)?,
            elapsed_time: row.get(13)?,
            cpu_time: row.get(14)?,
            buffer_gets: row.get(15)?,
        },
        created_at: parse_datetime(&row.get::<_, String>(16)?),
        updated_at: parse_datetime(&row.get::<_, String>(17)?),
    })
}

fn load(conn: &rusqlite::Connection, id: &str) -> Result<Option<PlanBaseline>> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM plan_baselines WHERE id = ?1"),
            params![id],
            row_to_baseline,
        )
        .optional()?)
}

#[async_trait]
impl BaselineRepository for Store {
    async fn create_baseline(&self, data: PlanBaselineData) -> Result<PlanBaseline> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        self.call(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO plan_baselines ({COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?17)"
                ),
                params![
                    id,
                    data.oracle_connection_id,
                    data.sql_id,
                    data.plan_hash_value,
                    data.sql_handle,
                    data.plan_name,
                    data.sql_text,
                    data.origin,
                    data.is_enabled,
                    data.is_accepted,
                    data.is_fixed,
                    data.optimizer_cost,
                    data.executions,
                    data.elapsed_time,
                    data.cpu_time,
                    data.buffer_gets,
                    now,
                ],
            )?;
            load(conn, &id)?.ok_or_else(|| anyhow::anyhow!("Baseline {id} vanished after insert"))
        })
        .await
    }

    async fn get_baseline(&self, id: &str) -> Result<Option<PlanBaseline>> {
        let id = id.to_string();
        self.call(move |conn| load(conn, &id)).await
    }

    async fn list_baselines(&self, connection_id: &str) -> Result<Vec<PlanBaseline>> {
        let connection_id = connection_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM plan_baselines
                 WHERE oracle_connection_id = ?1
                 ORDER BY created_at DESC"
            ))?;
            let rows = stmt.query_map(params![connection_id], row_to_baseline)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn replace_baseline(
        &self,
        id: &str,
        data: PlanBaselineData,
    ) -> Result<Option<PlanBaseline>> {
        let id = id.to_string();
        let now = Utc::now().to_rfc3339();

        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE plan_baselines SET
                    oracle_connection_id = ?2, sql_id = ?3, plan_hash_value = ?4, sql_handle = ?5,
                    plan_name = ?6, sql_text = ?7, origin = ?8, is_enabled = ?9, is_accepted = ?10,
                    is_fixed = ?11, optimizer_cost = ?12, executions = ?13, elapsed_time = ?14,
                    cpu_time = ?15, buffer_gets = ?16, updated_at = ?17
                 WHERE id = ?1",
                params![
                    id,
                    data.oracle_connection_id,
                    data.sql_id,
                    data.plan_hash_value,
                    data.sql_handle,
                    data.plan_name,
                    data.sql_text,
                    data.origin,
                    data.is_enabled,
                    data.is_accepted,
                    data.is_fixed,
                    data.optimizer_cost,
                    data.executions,
                    data.elapsed_time,
                    data.cpu_time,
                    data.buffer_gets,
                    now,
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            load(conn, &id)
        })
        .await
    }
}
