//! SQLite-backed auxiliary store.
//!
//! One connection behind a mutex, all statements executed on the blocking
//! pool. Repositories in the sibling modules are implemented on [`Store`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;

use super::schema::SQLITE_SCHEMA;

/// Handle to the auxiliary SQLite database.
#[derive(Clone)]
pub struct Store {
    path: Option<PathBuf>,
    sqlite: Arc<Mutex<Option<Connection>>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("ready", &self.sqlite.lock().is_some())
            .finish()
    }
}

impl Store {
    /// Open (or create) the database file and apply the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        let store = Self {
            path: Some(path.to_path_buf()),
            sqlite: Arc::new(Mutex::new(None)),
        };
        store.init().await?;
        Ok(store)
    }

    /// Private in-memory database, used by tests.
    pub async fn in_memory() -> Result<Self> {
        let store = Self {
            path: None,
            sqlite: Arc::new(Mutex::new(None)),
        };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        let sqlite = self.sqlite.clone();
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut guard = sqlite.lock();
            if guard.is_some() {
                return Ok(());
            }

            let conn = match &path {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent).with_context(|| {
                            format!("Failed to create store directory {}", parent.display())
                        })?;
                    }
                    let conn = Connection::open(path)
                        .with_context(|| format!("Failed to open {}", path.display()))?;
                    conn.pragma_update(None, "journal_mode", "WAL")?;
                    conn
                }
                None => Connection::open_in_memory()?,
            };
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.execute_batch(SQLITE_SCHEMA)
                .context("Failed to apply store schema")?;

            *guard = Some(conn);
            Ok(())
        })
        .await
        .context("Tokio spawn_blocking failed")?
    }

    /// Run `f` against the connection on the blocking pool.
    pub(crate) async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let sqlite = self.sqlite.clone();
        tokio::task::spawn_blocking(move || -> Result<T> {
            let mut guard = sqlite.lock();
            let conn = guard
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("SQLite not initialized"))?;
            f(conn)
        })
        .await
        .context("Tokio spawn_blocking failed")?
    }

    /// Cheap round trip used by the readiness probe.
    pub async fn ping(&self) -> Result<()> {
        self.call(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }
}

pub(crate) fn parse_datetime(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_optional_datetime(value: Option<String>) -> Option<DateTime<Utc>> {
    value.as_deref().map(parse_datetime)
}

/// True when `err` is a UNIQUE constraint or unique index violation.
/// CHECK and NOT NULL failures are not.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
