//! Append-only collection history.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::store::{parse_datetime, Store};

/// What a history record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    WaitEvents,
    SqlStats,
    StatsCollection,
}

impl HistoryKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WaitEvents => "wait_events",
            Self::SqlStats => "sql_stats",
            Self::StatsCollection => "stats_collection",
        }
    }
}

impl std::str::FromStr for HistoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wait_events" => Ok(Self::WaitEvents),
            "sql_stats" => Ok(Self::SqlStats),
            "stats_collection" => Ok(Self::StatsCollection),
            other => Err(format!(
                "Unknown history kind '{other}' (expected wait_events, sql_stats or stats_collection)"
            )),
        }
    }
}

/// One stored snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub connection_id: String,
    pub kind: String,
    pub collected_at: DateTime<Utc>,
    pub row_count: i64,
    pub payload: Value,
}

/// Repository for history records: append and read only.
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Append a snapshot and return its id.
    async fn append_history(
        &self,
        connection_id: &str,
        kind: HistoryKind,
        row_count: usize,
        payload: &Value,
    ) -> Result<i64>;

    /// Newest first.
    async fn list_history(
        &self,
        connection_id: &str,
        kind: Option<HistoryKind>,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>>;
}

#[async_trait]
impl HistoryRepository for Store {
    async fn append_history(
        &self,
        connection_id: &str,
        kind: HistoryKind,
        row_count: usize,
        payload: &Value,
    ) -> Result<i64> {
        let connection_id = connection_id.to_string();
        let payload = serde_json::to_string(payload)?;
        let row_count = i64::try_from(row_count)?;
        let now = Utc::now().to_rfc3339();

        self.call(move |conn| {
            conn.execute(
                "INSERT INTO history_records (connection_id, kind, collected_at, row_count, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![connection_id, kind.as_str(), now, row_count, payload],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn list_history(
        &self,
        connection_id: &str,
        kind: Option<HistoryKind>,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>> {
        let connection_id = connection_id.to_string();
        let kind = kind.map(HistoryKind::as_str);
        let limit = i64::try_from(limit)?;

        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, connection_id, kind, collected_at, row_count, payload
                 FROM history_records
                 WHERE connection_id = ?1 AND (?2 IS NULL OR kind = ?2)
                 ORDER BY collected_at DESC, id DESC
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![connection_id, kind, limit], |row| {
                let payload: String = row.get(5)?;
                Ok(HistoryRecord {
                    id: row.get(0)?,
                    connection_id: row.get(1)?,
                    kind: row.get(2)?,
                    collected_at: parse_datetime(&row.get::<_, String>(3)?),
                    row_count: row.get(4)?,
                    payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
                })
            })?;

            let mut records = Vec::new();
            for record in rows {
                records.push(record?);
            }
            Ok(records)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_append_and_list() {
        let store = Store::in_memory().await.expect("store");
        store
            .append_history("c1", HistoryKind::WaitEvents, 2, &json!([{"event": "db file sequential read"}]))
            .await
            .expect("append 1");
        store
            .append_history("c1", HistoryKind::SqlStats, 0, &json!([]))
            .await
            .expect("append 2");
        store
            .append_history("c2", HistoryKind::WaitEvents, 0, &json!([]))
            .await
            .expect("append 3");

        let all = store.list_history("c1", None, 10).await.expect("list");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].kind, "sql_stats");

        let waits = store
            .list_history("c1", Some(HistoryKind::WaitEvents), 10)
            .await
            .expect("list waits");
        assert_eq!(waits.len(), 1);
        assert_eq!(waits[0].row_count, 2);
        assert_eq!(waits[0].payload[0]["event"], "db file sequential read");
    }

    #[tokio::test]
    async fn test_rows_cannot_be_changed() {
        let store = Store::in_memory().await.expect("store");
        let id = store
            .append_history("c1", HistoryKind::StatsCollection, 1, &json!({"status": "ok"}))
            .await
            .expect("append");

        let update = store
            .call(move |conn| {
                conn.execute("UPDATE history_records SET row_count = 5 WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await;
        assert!(update.is_err());

        let delete = store
            .call(|conn| {
                conn.execute("DELETE FROM history_records", [])?;
                Ok(())
            })
            .await;
        assert!(delete.is_err());

        assert_eq!(store.list_history("c1", None, 10).await.expect("list").len(), 1);
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("sql_stats".parse::<HistoryKind>(), Ok(HistoryKind::SqlStats));
        assert!("awr".parse::<HistoryKind>().is_err());
    }
}
