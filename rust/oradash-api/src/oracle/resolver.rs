//! Connection id to usable Oracle descriptor.
//!
//! Resolution reads the vault, decrypts the password and caches the result for
//! a short TTL. Handlers never see ciphertext and never decrypt themselves.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use thiserror::Error;

use crate::database::{ConnectionRecord, ConnectionRepository, ConnectionType, KeyManager, Privilege, Store};

/// How the listener identifies the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleTarget {
    ServiceName(String),
    Sid(String),
}

impl OracleTarget {
    /// Build from the vault's selector columns.
    pub fn from_parts(
        connection_type: ConnectionType,
        service_name: Option<&str>,
        sid: Option<&str>,
    ) -> Result<Self, String> {
        crate::database::connections::validate_target(connection_type, service_name, sid)?;
        Ok(match connection_type {
            ConnectionType::ServiceName => Self::ServiceName(service_name.unwrap_or_default().trim().to_string()),
            ConnectionType::Sid => Self::Sid(sid.unwrap_or_default().trim().to_string()),
        })
    }
}

/// Everything needed to open a driver connection.
#[derive(Clone)]
pub struct ResolvedConfig {
    pub connection_id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub target: OracleTarget,
    pub username: String,
    pub password: String,
    pub privilege: Option<Privilege>,
}

impl std::fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("connection_id", &self.connection_id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("target", &self.target)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("privilege", &self.privilege)
            .finish()
    }
}

impl ResolvedConfig {
    /// Easy Connect string for service names, a full descriptor for SIDs.
    #[must_use]
    pub fn connect_string(&self) -> String {
        match &self.target {
            OracleTarget::ServiceName(service) => format!("//{}:{}/{}", self.host, self.port, service),
            OracleTarget::Sid(sid) => format!(
                "(DESCRIPTION=(ADDRESS=(PROTOCOL=TCP)(HOST={})(PORT={}))(CONNECT_DATA=(SID={})))",
                self.host, self.port, sid
            ),
        }
    }

    #[must_use]
    pub fn connection_type(&self) -> ConnectionType {
        match self.target {
            OracleTarget::ServiceName(_) => ConnectionType::ServiceName,
            OracleTarget::Sid(_) => ConnectionType::Sid,
        }
    }

    fn from_record(record: &ConnectionRecord, password: String) -> Result<Self, String> {
        Ok(Self {
            connection_id: record.id.clone(),
            name: record.name.clone(),
            host: record.host.clone(),
            port: record.port,
            target: OracleTarget::from_parts(
                record.connection_type,
                record.service_name.as_deref(),
                record.sid.as_deref(),
            )?,
            username: record.username.clone(),
            password,
            privilege: record.privilege,
        })
    }
}

/// Why a connection id could not be resolved.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Unknown or inactive id.
    #[error("Oracle connection '{0}' not found or inactive")]
    NotFound(String),

    /// Stored ciphertext no longer decrypts (key rotated or data corrupted).
    #[error("Failed to decrypt credentials of connection {id}")]
    Decryption {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Store(anyhow::Error),
}

/// Resolves connection ids with a short-lived cache.
pub struct ConfigResolver {
    store: Store,
    keys: Arc<KeyManager>,
    ttl: Duration,
    cache: RwLock<HashMap<String, (Instant, ResolvedConfig)>>,
}

impl std::fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigResolver")
            .field("ttl", &self.ttl)
            .field("cached", &self.cache.read().len())
            .finish_non_exhaustive()
    }
}

impl ConfigResolver {
    /// A `ttl` of zero disables caching.
    #[must_use]
    pub fn new(store: Store, keys: Arc<KeyManager>, ttl: Duration) -> Self {
        Self {
            store,
            keys,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve an active connection record into a usable descriptor.
    pub async fn resolve(&self, id: &str) -> Result<ResolvedConfig, ResolveError> {
        if let Some(hit) = self.cached(id) {
            return Ok(hit);
        }

        let record = self
            .store
            .get_connection(id)
            .await
            .map_err(ResolveError::Store)?
            .filter(|r| r.is_active)
            .ok_or_else(|| ResolveError::NotFound(id.to_string()))?;

        let password = self.keys.decrypt(&record.encrypted_password).map_err(|source| {
            tracing::error!("❌ Credential decryption failed - connection_id={}", id);
            ResolveError::Decryption {
                id: id.to_string(),
                source,
            }
        })?;

        let resolved = ResolvedConfig::from_record(&record, password)
            .map_err(|msg| ResolveError::Store(anyhow::anyhow!("Connection {id} is malformed: {msg}")))?;

        if !self.ttl.is_zero() {
            self.cache
                .write()
                .insert(id.to_string(), (Instant::now(), resolved.clone()));
        }
        tracing::debug!("🔍 Resolved connection - connection_id={}, target={}", id, resolved.connect_string());
        Ok(resolved)
    }

    /// Drop the cached entry for `id`; called after every vault mutation.
    pub fn invalidate(&self, id: &str) {
        self.cache.write().remove(id);
    }

    fn cached(&self, id: &str) -> Option<ResolvedConfig> {
        if self.ttl.is_zero() {
            return None;
        }
        let cache = self.cache.read();
        let (at, config) = cache.get(id)?;
        (at.elapsed() < self.ttl).then(|| config.clone())
    }
}
