//! HTTP server setup and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::api;
use crate::config::AppConfig;
use crate::database::users::ensure_bootstrap_admin;
use crate::database::{ConnectionRepository, KeyManager, SessionRepository, Store};
use crate::gateway;
use crate::llm::LlmClient;
use crate::logging::{startup_banner, OpTimer};
use crate::oracle::{self, ConfigResolver, OracleDriver, QueryExecutor, QueryOptions};
use crate::scheduler::{HistoryCollector, PrefetchScheduler};
use crate::{log_init_step, log_init_warning, log_success, AppState};

/// Oradash API version (from Cargo.toml).
const VERSION: &str = env!("CARGO_PKG_VERSION");

const INIT_STEPS: u32 = 6;

/// Create the application with the real Oracle driver.
pub async fn create_app(config: AppConfig) -> anyhow::Result<Router> {
    let state = create_state(config, oracle::default_driver()).await?;
    Ok(create_router(state))
}

/// Build the shared state: store, key manager, resolver, executor, scheduler
/// and optional LLM client.
pub async fn create_state(
    config: AppConfig,
    driver: Arc<dyn OracleDriver>,
) -> anyhow::Result<AppState> {
    let overall_timer = OpTimer::new("server", "create_state");

    startup_banner(
        &format!("🚀 Oradash API v{VERSION}"),
        &format!(
            "Store: {} | LLM analysis: {}",
            config.store.path.display(),
            if config.features.llm_enabled { "on" } else { "off" }
        ),
    );

    // [1/6] Auxiliary store
    let step_timer = OpTimer::new("server", "store");
    let store = Store::open(&config.store.path).await?;
    match store.purge_expired_sessions().await {
        Ok(0) => {}
        Ok(n) => tracing::debug!("Purged {} expired sessions", n),
        Err(e) => log_init_warning!("Failed to purge expired sessions: {:#}", e),
    }
    log_init_step!(1, INIT_STEPS, "Store", format!("🗄️  SQLite at {}", config.store.path.display()));
    step_timer.finish();

    // [2/6] Credential key
    let step_timer = OpTimer::new("server", "keys");
    let keys = Arc::new(KeyManager::new(&config.store.key_path)?);
    log_init_step!(2, INIT_STEPS, "Credential Key", format!("🔑 {}", config.store.key_path.display()));
    step_timer.finish();

    // [3/6] Resolver and executor
    let step_timer = OpTimer::new("server", "oracle");
    let resolver = Arc::new(ConfigResolver::new(
        store.clone(),
        Arc::clone(&keys),
        Duration::from_secs(config.oracle.resolver_cache_ttl_secs),
    ));
    let executor = QueryExecutor::new(driver);
    log_init_step!(
        3,
        INIT_STEPS,
        "Oracle Access",
        format!(
            "⚙️  timeout={}ms max_rows={} cache_ttl={}s",
            config.oracle.default_timeout_ms,
            config.oracle.max_rows,
            config.oracle.resolver_cache_ttl_secs
        )
    );
    step_timer.finish();

    // [4/6] Prefetch scheduler
    let step_timer = OpTimer::new("server", "scheduler");
    let collector = HistoryCollector::new(
        store.clone(),
        Arc::clone(&resolver),
        executor.clone(),
        QueryOptions::from_config(&config.oracle),
    );
    let scheduler = PrefetchScheduler::new(Arc::new(collector), &config.prefetch);
    let autostart = if config.prefetch.autostart_default {
        autostart_default(&store, &scheduler).await
    } else {
        "not configured".to_string()
    };
    log_init_step!(4, INIT_STEPS, "Prefetch Scheduler", format!("⏱️  autostart: {autostart}"));
    step_timer.finish();

    // [5/6] LLM client
    let step_timer = OpTimer::new("server", "llm");
    let llm = if config.features.llm_enabled {
        let client = LlmClient::new(config.llm.clone())?;
        log_init_step!(
            5,
            INIT_STEPS,
            "LLM Analysis",
            format!(
                "🤖 {} {}",
                config.llm.model,
                if config.llm.api_key.is_some() { "✓" } else { "✗ No API key" }
            )
        );
        Some(Arc::new(client))
    } else {
        log_init_step!(5, INIT_STEPS, "LLM Analysis", "🤖 Disabled");
        None
    };
    step_timer.finish();

    // [6/6] Bootstrap admin
    let step_timer = OpTimer::new("server", "bootstrap");
    match (&config.auth.bootstrap_email, &config.auth.bootstrap_password) {
        (Some(email), Some(password)) => {
            if ensure_bootstrap_admin(&store, email, password).await? {
                log_init_step!(6, INIT_STEPS, "Users", format!("👤 Created admin {email}"));
            } else {
                log_init_step!(6, INIT_STEPS, "Users", "👤 Existing users kept");
            }
        }
        _ => {
            log_init_step!(6, INIT_STEPS, "Users", "👤 No bootstrap admin configured");
        }
    }
    step_timer.finish();

    overall_timer.finish();

    Ok(AppState {
        config: Arc::new(config),
        store,
        keys,
        resolver,
        executor,
        scheduler,
        llm,
    })
}

async fn autostart_default(store: &Store, scheduler: &PrefetchScheduler) -> String {
    match store.default_connection().await {
        Ok(Some(record)) => match scheduler.start(&record.id, None).await {
            Ok(status) => format!("{} every {}s", record.name, status.interval_secs),
            Err(e) => {
                log_init_warning!("Failed to start prefetch for {}: {}", record.id, e);
                "failed".to_string()
            }
        },
        Ok(None) => "no default connection".to_string(),
        Err(e) => {
            log_init_warning!("Failed to load default connection: {:#}", e);
            "failed".to_string()
        }
    }
}

/// Build the router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let step_timer = OpTimer::new("server", "router");
    let timeout_secs = state.config.server.timeout_secs;

    let app = Router::new()
        .merge(api::create_router())
        .merge(gateway::create_router())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(timeout_secs),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            gateway::auth_middleware,
        ))
        .with_state(state);

    step_timer.finish();
    log_success!("Oradash API router ready");
    app
}
