//! HTTP API endpoints.
//!
//! Every handler follows the same path: presence checks on its parameters,
//! resolve the connection id, run one or more statements, reshape the rows
//! and wrap them in the `{success, data}` envelope.

pub mod advisor;
pub mod analysis;
pub mod connections;
pub mod health;
pub mod monitoring;
pub mod plan_baselines;
pub mod prefetch;
pub mod sql;
pub mod stats;

use axum::Router;
use serde::Deserialize;

use crate::error::{require, ApiError, ApiResult};
use crate::oracle::{BindValue, QueryOptions, QueryOutput, ResolvedConfig};
use crate::AppState;

/// Create the API router.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(connections::router())
        .merge(monitoring::router())
        .merge(stats::router())
        .merge(plan_baselines::router())
        .merge(advisor::router())
        .merge(sql::router())
        .merge(analysis::router())
        .merge(prefetch::router())
}

/// Query string carrying only the target connection.
#[derive(Debug, Deserialize)]
pub struct ConnectionParams {
    pub connection_id: Option<String>,
}

impl ConnectionParams {
    pub fn connection_id(&self) -> ApiResult<&str> {
        require(self.connection_id.as_deref(), "connection_id")
    }
}

/// Default execution options from configuration.
pub(crate) fn default_options(state: &AppState) -> QueryOptions {
    QueryOptions::from_config(&state.config.oracle)
}

/// Resolve `connection_id` and run one statement with default options.
pub(crate) async fn run_query(
    state: &AppState,
    connection_id: &str,
    sql: &str,
    binds: Vec<BindValue>,
) -> ApiResult<(ResolvedConfig, QueryOutput)> {
    let config = state.resolver.resolve(connection_id).await?;
    let output = state
        .executor
        .execute(&config, sql, binds, default_options(state))
        .await?;
    Ok((config, output))
}

/// Parse an optional integer parameter and check it against `range`.
pub(crate) fn bounded<T>(value: Option<T>, default: T, range: std::ops::RangeInclusive<T>, name: &str) -> ApiResult<T>
where
    T: PartialOrd + Copy + std::fmt::Display,
{
    let value = value.unwrap_or(default);
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ApiError::invalid(format!(
            "{name} must be between {} and {}",
            range.start(),
            range.end()
        )))
    }
}
