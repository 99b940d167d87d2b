//! Tracing setup and startup logging helpers.

use std::time::{Duration, Instant};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` overrides `level`.
pub fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_target(false)).try_init()
    };

    if let Err(e) = installed {
        eprintln!("tracing subscriber already installed: {e}");
    }
}

/// Measures one operation and logs its duration under `component`.
///
/// ```rust,ignore
/// let timer = OpTimer::new("oracle", "execute");
/// let result = run().await;
/// let elapsed = timer.finish_with_result(result.as_ref());
/// ```
#[derive(Debug)]
pub struct OpTimer {
    component: &'static str,
    operation: &'static str,
    start: Instant,
}

impl OpTimer {
    #[must_use]
    pub fn new(component: &'static str, operation: &'static str) -> Self {
        tracing::trace!(component, operation, "started");
        Self {
            component,
            operation,
            start: Instant::now(),
        }
    }

    /// Log the duration at info level. Used for startup phases.
    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        tracing::info!(
            component = self.component,
            operation = self.operation,
            duration_ms = elapsed.as_millis(),
            "completed"
        );
        elapsed
    }

    /// Log success at debug and failure at warn, then return the duration.
    pub fn finish_with_result<T, E: std::fmt::Display>(self, result: Result<&T, &E>) -> Duration {
        let elapsed = self.start.elapsed();
        let duration_ms = elapsed.as_millis();
        match result {
            Ok(_) => tracing::debug!(
                component = self.component,
                operation = self.operation,
                duration_ms,
                "succeeded"
            ),
            Err(e) => tracing::warn!(
                component = self.component,
                operation = self.operation,
                duration_ms,
                error = %e,
                "failed"
            ),
        }
        elapsed
    }
}

/// Boxed title lines printed once at boot.
pub fn startup_banner(title: &str, subtitle: &str) {
    let rule = "═".repeat(title.chars().count().max(subtitle.chars().count()) + 4);
    tracing::info!("{rule}");
    tracing::info!("  {title}");
    tracing::info!("  {subtitle}");
    tracing::info!("{rule}");
}

/// `[step/total] name - detail` for one bootstrap phase.
#[macro_export]
macro_rules! log_init_step {
    ($step:expr, $total:expr, $name:expr, $detail:expr) => {
        tracing::info!(step = $step, total = $total, "[{}/{}] {} - {}", $step, $total, $name, $detail)
    };
}

/// Non-fatal problem during bootstrap.
#[macro_export]
macro_rules! log_init_warning {
    ($($arg:tt)+) => {
        tracing::warn!("⚠️  {}", format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_success {
    ($($arg:tt)+) => {
        tracing::info!("✅ {}", format_args!($($arg)+))
    };
}
