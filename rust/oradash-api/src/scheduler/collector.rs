//! Snapshot collection into the history store.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::database::{HistoryKind, HistoryRepository, Store};
use crate::oracle::views::{
    filter_wait_events, top_sql_sql, wait_events_sql, TOP_SQL_FIELDS, WAIT_EVENT_FIELDS,
};
use crate::oracle::{
    BindValue, ConfigResolver, ExecutorError, QueryExecutor, QueryOptions, ResolveError, Statement,
};
use crate::AppState;

/// Top SQL rows kept per `sql_stats` snapshot.
const SQL_STATS_LIMIT: i64 = 50;

/// Why a snapshot collection failed.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Execute(#[from] ExecutorError),
    #[error("Failed to store snapshot: {0:#}")]
    Store(#[from] anyhow::Error),
}

/// One periodic collection for a connection.
#[async_trait]
pub trait Collector: Send + Sync + 'static {
    /// Collect and persist; returns the number of rows stored.
    async fn collect(&self, connection_id: &str) -> anyhow::Result<usize>;
}

/// Outcome of one stored snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CollectedSnapshot {
    pub kind: HistoryKind,
    pub history_id: i64,
    pub row_count: usize,
}

/// Collects wait event and SQL statistics snapshots into the history store.
#[derive(Clone)]
pub struct HistoryCollector {
    store: Store,
    resolver: Arc<ConfigResolver>,
    executor: QueryExecutor,
    options: QueryOptions,
}

impl std::fmt::Debug for HistoryCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryCollector").finish_non_exhaustive()
    }
}

impl HistoryCollector {
    /// Kinds that are snapshots of performance views.
    pub const SNAPSHOT_KINDS: [HistoryKind; 2] = [HistoryKind::WaitEvents, HistoryKind::SqlStats];

    #[must_use]
    pub fn new(
        store: Store,
        resolver: Arc<ConfigResolver>,
        executor: QueryExecutor,
        options: QueryOptions,
    ) -> Self {
        Self {
            store,
            resolver,
            executor,
            options,
        }
    }

    #[must_use]
    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.store.clone(),
            Arc::clone(&state.resolver),
            state.executor.clone(),
            QueryOptions::from_config(&state.config.oracle),
        )
    }

    fn statement(kind: HistoryKind) -> Statement {
        match kind {
            HistoryKind::SqlStats => Statement::new(
                top_sql_sql("elapsed_time"),
                vec![BindValue::from(SQL_STATS_LIMIT)],
            ),
            _ => Statement::new(wait_events_sql(false, false), Vec::new()),
        }
    }

    /// Run the snapshot queries concurrently and append one record per kind.
    pub async fn collect_kinds(
        &self,
        connection_id: &str,
        kinds: &[HistoryKind],
    ) -> Result<Vec<CollectedSnapshot>, CollectError> {
        let config = self.resolver.resolve(connection_id).await?;
        let statements = kinds.iter().map(|k| Self::statement(*k)).collect();
        let outputs = self
            .executor
            .execute_many(&config, statements, self.options)
            .await?;

        let mut snapshots = Vec::with_capacity(kinds.len());
        for (kind, output) in kinds.iter().zip(outputs) {
            let rows = match kind {
                HistoryKind::SqlStats => TOP_SQL_FIELDS.apply_all(&output.rows),
                _ => filter_wait_events(WAIT_EVENT_FIELDS.apply_all(&output.rows), None, false),
            };
            let row_count = rows.len();
            let payload = Value::Array(rows.into_iter().map(Value::Object).collect());
            let history_id = self
                .store
                .append_history(connection_id, *kind, row_count, &payload)
                .await?;
            snapshots.push(CollectedSnapshot {
                kind: *kind,
                history_id,
                row_count,
            });
        }
        Ok(snapshots)
    }
}

#[async_trait]
impl Collector for HistoryCollector {
    async fn collect(&self, connection_id: &str) -> anyhow::Result<usize> {
        let snapshots = self
            .collect_kinds(connection_id, &Self::SNAPSHOT_KINDS)
            .await?;
        Ok(snapshots.iter().map(|s| s.row_count).sum())
    }
}
