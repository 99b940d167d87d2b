//! Oradash API - Oracle monitoring and tuning backend
//!
//! This crate serves the JSON API behind the Oradash dashboard. It keeps a
//! vault of Oracle connection records, resolves them into usable connection
//! descriptors, runs administrative SQL against dynamic performance views and
//! advisor packages, and stores collection history in a local SQLite store.
//!
//! - **Connection vault**: encrypted credentials, default/active flags, health checks
//! - **Query execution**: short-lived driver connections with timeouts and row limits
//! - **Monitoring**: wait events, sessions, top SQL, tablespaces, AWR snapshots
//! - **Tuning**: SQL plan baselines, advisor recommendations, optimizer statistics
//! - **Prefetch scheduling**: periodic collection per connection
//!
//! # Architecture
//!
//! - [`config`]: Configuration management and environment loading
//! - [`database`]: SQLite store, credential encryption and repositories
//! - [`oracle`]: Config resolution, statement classification, query execution, row mapping
//! - [`gateway`]: Session authentication and user profile routes
//! - [`api`]: Monitoring and tuning HTTP endpoints
//! - [`scheduler`]: Per-connection prefetch scheduler
//! - [`llm`]: Optional LLM-backed SQL analysis
//!
//! # Example
//!
//! ```rust,ignore
//! use oradash_api::{config::AppConfig, server::create_app};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let app = create_app(config).await?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod logging;
pub mod oracle;
pub mod scheduler;
pub mod server;

use std::sync::Arc;

use config::AppConfig;
use database::{KeyManager, Store};
use llm::LlmClient;
use oracle::{ConfigResolver, QueryExecutor};
use scheduler::PrefetchScheduler;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Auxiliary SQLite store (connections, history, baselines, users).
    pub store: Store,
    /// Credential encryption.
    pub keys: Arc<KeyManager>,
    /// Connection id to descriptor resolution.
    pub resolver: Arc<ConfigResolver>,
    /// Oracle statement execution.
    pub executor: QueryExecutor,
    /// Per-connection prefetch scheduler.
    pub scheduler: PrefetchScheduler,
    /// LLM client, present only when the analysis feature is enabled.
    pub llm: Option<Arc<LlmClient>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"AppConfig")
            .field("store", &self.store)
            .field("executor", &self.executor)
            .field("scheduler", &self.scheduler)
            .field("llm", &self.llm.is_some())
            .finish_non_exhaustive()
    }
}
