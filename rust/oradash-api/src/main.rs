//! Oradash API - Main Entry Point

use clap::Parser;
use mimalloc::MiMalloc;

use oradash_api::config::AppConfig;
use oradash_api::logging::init_tracing;
use oradash_api::server::{create_router, create_state};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Command-line arguments. Unset values fall back to the configuration.
#[derive(Parser, Debug)]
#[command(name = "oradash-api")]
#[command(about = "Oradash API - Oracle monitoring and tuning backend")]
#[command(version)]
struct Args {
    /// Host to bind to.
    #[arg(long, env = "ORADASH_HOST")]
    host: Option<String>,

    /// Port to listen on.
    #[arg(short, long, env = "ORADASH_PORT")]
    port: Option<u16>,

    /// Log level.
    #[arg(long, env = "ORADASH_LOG_LEVEL")]
    log_level: Option<String>,

    /// Config file path.
    #[arg(short, long, env = "ORADASH_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = AppConfig::load_from(args.config.as_deref())?;
    init_tracing(
        args.log_level.as_deref().unwrap_or(&config.logging.level),
        config.logging.json,
    );

    tracing::info!("Starting Oradash API v{}", env!("CARGO_PKG_VERSION"));

    #[cfg(feature = "oci")]
    if let Some(dir) = &config.oracle.client_lib_dir {
        oradash_api::oracle::driver::init_client(std::path::Path::new(dir))?;
        tracing::info!("Oracle client library loaded from {}", dir);
    }

    let addr = format!(
        "{}:{}",
        args.host.as_deref().unwrap_or(&config.server.host),
        args.port.unwrap_or(config.server.port)
    );

    let state = create_state(config, oradash_api::oracle::default_driver()).await?;
    let app = create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.scheduler.shutdown().await;
    tracing::info!("Server shut down gracefully");
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
}
