//! Connection vault endpoints.

use std::time::Duration;

use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::default_options;
use crate::database::connections::validate_target;
use crate::database::{
    ConnectionRecord, ConnectionRepository, ConnectionType, ConnectionUpdate, DuplicateConnection,
    HealthStatus, NewConnection, Privilege,
};
use crate::error::{ok, require, ApiError, ApiJson, ApiPath, ApiQuery, ApiResult, Envelope};
use crate::oracle::{FieldMap, FieldSpec, OracleTarget, QueryOutput, ResolvedConfig};
use crate::AppState;

const DEFAULT_PORT: u16 = 1521;

/// Health checks use a shorter timeout than regular statements.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

const INSTANCE_SQL: &str = "SELECT instance_name, host_name, version, status, database_status,
       TO_CHAR(startup_time, 'YYYY-MM-DD\"T\"HH24:MI:SS') AS startup_time
  FROM v$instance";

const INSTANCE_FIELDS: FieldMap = FieldMap::new(&[
    FieldSpec::text("INSTANCE_NAME", "instance_name"),
    FieldSpec::text("HOST_NAME", "host_name"),
    FieldSpec::text("VERSION", "version"),
    FieldSpec::text("STATUS", "status"),
    FieldSpec::text("DATABASE_STATUS", "database_status"),
    FieldSpec::text("STARTUP_TIME", "startup_time"),
]);

/// `/api/connections` routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/connections", get(list_connections).post(create_connection))
        .route("/api/connections/test", post(test_unsaved))
        .route(
            "/api/connections/{id}",
            get(get_connection)
                .patch(update_connection)
                .delete(delete_connection),
        )
        .route("/api/connections/{id}/default", post(set_default))
        .route("/api/connections/{id}/test", post(test_connection))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    include_inactive: bool,
}

async fn list_connections(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> ApiResult<Envelope<Vec<Value>>> {
    let records = state.store.list_connections(params.include_inactive).await?;
    let count = records.len();
    let views = records
        .iter()
        .map(|r| serde_json::to_value(r.view()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(anyhow::Error::from)?;
    Ok(ok(views).with("count", count))
}

/// Body shared by create and unsaved test.
#[derive(Debug, Deserialize)]
struct ConnectionBody {
    name: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    service_name: Option<String>,
    sid: Option<String>,
    username: Option<String>,
    password: Option<String>,
    connection_type: Option<ConnectionType>,
    privilege: Option<Privilege>,
    #[serde(default)]
    is_default: bool,
}

impl ConnectionBody {
    /// Infer the selector when the client did not name one.
    fn connection_type(&self) -> ConnectionType {
        match (self.connection_type, &self.service_name, &self.sid) {
            (Some(kind), _, _) => kind,
            (None, None, Some(_)) => ConnectionType::Sid,
            _ => ConnectionType::ServiceName,
        }
    }

    fn port(&self) -> ApiResult<u16> {
        match self.port.unwrap_or(DEFAULT_PORT) {
            0 => Err(ApiError::invalid("port must be between 1 and 65535")),
            port => Ok(port),
        }
    }

    fn target(&self) -> ApiResult<OracleTarget> {
        OracleTarget::from_parts(
            self.connection_type(),
            self.service_name.as_deref(),
            self.sid.as_deref(),
        )
        .map_err(ApiError::invalid)
    }
}

fn duplicate_or_internal(e: anyhow::Error) -> ApiError {
    match e.downcast_ref::<DuplicateConnection>() {
        Some(dup) => ApiError::invalid(dup.to_string()),
        None => ApiError::Internal(e),
    }
}

fn view_json(record: &ConnectionRecord) -> ApiResult<Value> {
    serde_json::to_value(record.view()).map_err(|e| ApiError::Internal(e.into()))
}

async fn create_connection(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ConnectionBody>,
) -> ApiResult<Envelope<Value>> {
    let name = require(body.name.as_deref(), "name")?.to_string();
    let host = require(body.host.as_deref(), "host")?.to_string();
    let username = require(body.username.as_deref(), "username")?.to_string();
    let password = require(body.password.as_deref(), "password")?;
    let port = body.port()?;
    let connection_type = body.connection_type();
    validate_target(connection_type, body.service_name.as_deref(), body.sid.as_deref())
        .map_err(ApiError::invalid)?;

    let encrypted_password = state.keys.encrypt(password)?;
    let record = state
        .store
        .create_connection(NewConnection {
            name,
            host,
            port,
            service_name: body.service_name.clone(),
            sid: body.sid.clone(),
            username,
            encrypted_password,
            connection_type,
            privilege: body.privilege,
            is_default: body.is_default,
        })
        .await
        .map_err(duplicate_or_internal)?;

    tracing::info!(
        "✅ Connection created - connection_id={}, name={}, default={}",
        record.id,
        record.name,
        record.is_default
    );
    Ok(ok(view_json(&record)?))
}

async fn load_record(state: &AppState, id: &str) -> ApiResult<ConnectionRecord> {
    state
        .store
        .get_connection(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Oracle connection '{id}' not found")))
}

async fn get_connection(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Envelope<Value>> {
    let record = load_record(&state, &id).await?;
    Ok(ok(view_json(&record)?))
}

async fn update_connection(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
    ApiJson(mut update): ApiJson<ConnectionUpdate>,
) -> ApiResult<Envelope<Value>> {
    let mut record = load_record(&state, &id).await?;

    let password = update.password.take();
    record.apply(update);

    for (value, name) in [
        (&record.name, "name"),
        (&record.host, "host"),
        (&record.username, "username"),
    ] {
        if value.trim().is_empty() {
            return Err(ApiError::invalid(format!("{name} must not be empty")));
        }
    }
    if record.port == 0 {
        return Err(ApiError::invalid("port must be between 1 and 65535"));
    }
    validate_target(
        record.connection_type,
        record.service_name.as_deref(),
        record.sid.as_deref(),
    )
    .map_err(ApiError::invalid)?;

    if let Some(password) = password {
        if password.is_empty() {
            return Err(ApiError::invalid("password must not be empty"));
        }
        record.encrypted_password = state.keys.encrypt(&password)?;
    }

    let saved = state
        .store
        .save_connection(record)
        .await
        .map_err(duplicate_or_internal)?;
    state.resolver.invalidate(&id);
    if !saved.is_active {
        state.scheduler.forget(&id).await;
    }

    tracing::info!("✅ Connection updated - connection_id={}", id);
    Ok(ok(view_json(&saved)?))
}

async fn delete_connection(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Envelope<Value>> {
    if !state.store.deactivate_connection(&id).await? {
        return Err(ApiError::not_found(format!("Oracle connection '{id}' not found")));
    }
    state.resolver.invalidate(&id);
    state.scheduler.forget(&id).await;

    tracing::info!("🗑️  Connection deactivated - connection_id={}", id);
    Ok(ok(json!({ "id": id, "is_active": false })))
}

async fn set_default(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Envelope<Value>> {
    if !state.store.set_default_connection(&id).await? {
        return Err(ApiError::not_found(format!(
            "Oracle connection '{id}' not found or inactive"
        )));
    }
    let record = load_record(&state, &id).await?;
    tracing::info!("✅ Default connection set - connection_id={}", id);
    Ok(ok(view_json(&record)?))
}

async fn run_health_check(state: &AppState, config: &ResolvedConfig) -> ApiResult<QueryOutput> {
    let options = default_options(state)
        .with_timeout(HEALTH_CHECK_TIMEOUT.min(state.config.oracle.timeout()))
        .with_max_rows(1);
    Ok(state.executor.execute(config, INSTANCE_SQL, Vec::new(), options).await?)
}

fn health_body(output: &QueryOutput) -> Value {
    let instance = output
        .rows
        .first()
        .map(|row| INSTANCE_FIELDS.apply(row))
        .unwrap_or_else(Map::new);
    json!({
        "healthy": true,
        "instance": instance,
        "elapsed_ms": output.elapsed_ms,
    })
}

async fn test_connection(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Envelope<Value>> {
    let config = state.resolver.resolve(&id).await?;
    tracing::info!("🔍 Testing connection - connection_id={}, target={}", id, config.connect_string());

    match run_health_check(&state, &config).await {
        Ok(output) => {
            state.store.record_health(&id, HealthStatus::Healthy, None).await?;
            tracing::info!("✅ Connection healthy - connection_id={}", id);
            Ok(ok(health_body(&output)))
        }
        Err(e) => {
            state
                .store
                .record_health(&id, HealthStatus::Unhealthy, Some(e.public_message()))
                .await?;
            Err(e)
        }
    }
}

/// Test connection details without saving them.
async fn test_unsaved(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ConnectionBody>,
) -> ApiResult<Envelope<Value>> {
    let host = require(body.host.as_deref(), "host")?.to_string();
    let username = require(body.username.as_deref(), "username")?.to_string();
    let password = require(body.password.as_deref(), "password")?.to_string();
    let port = body.port()?;
    let target = body.target()?;

    let config = ResolvedConfig {
        connection_id: "unsaved".to_string(),
        name: body.name.clone().unwrap_or_else(|| "unsaved".to_string()),
        host,
        port,
        target,
        username,
        password,
        privilege: body.privilege,
    };
    tracing::info!("🔍 Testing unsaved connection - target={}", config.connect_string());

    let output = run_health_check(&state, &config).await?;
    Ok(ok(health_body(&output)))
}
