//! Configuration management for Oradash API.
//!
//! Configuration is layered from defaults, an optional config file
//! (`config/oradash.{yaml,toml,json}`), `ORADASH__SECTION__KEY` environment
//! variables and a handful of well-known variables such as
//! `ORACLE_CLIENT_LIB_DIR` and `LLM_API_KEY`.
//!
//! ```rust,ignore
//! use oradash_api::config::{AppConfig, ConfigValidator};
//!
//! let config = AppConfig::load()?;
//! ConfigValidator::validate(&config)?;
//! ```

pub mod error;
pub mod validator;

pub use error::{ConfigResult, ConfigurationError};
pub use validator::ConfigValidator;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Session authentication.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Auxiliary SQLite store.
    #[serde(default)]
    pub store: StoreConfig,
    /// Oracle execution defaults.
    #[serde(default)]
    pub oracle: OracleConfig,
    /// Optional subsystems.
    #[serde(default)]
    pub features: FeaturesConfig,
    /// LLM provider settings (used when `features.llm_enabled`).
    #[serde(default)]
    pub llm: LlmConfig,
    /// Prefetch scheduler settings.
    #[serde(default)]
    pub prefetch: PrefetchConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment and config files.
    ///
    /// Sources, in order:
    /// 1. Default values
    /// 2. Config file (`config/oradash`)
    /// 3. `ORADASH__*` environment variables
    /// 4. Well-known environment variables
    ///
    /// The result is validated; use [`Self::load_unchecked`] to skip validation.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an explicit config file path.
    pub fn load_from(path: Option<&str>) -> anyhow::Result<Self> {
        let config = Self::load_unchecked(path)?;

        ConfigValidator::validate(&config)
            .map_err(|e| anyhow::anyhow!("Configuration validation failed:\n\n{e}"))?;

        Ok(config)
    }

    /// Load configuration without validation.
    pub fn load_unchecked(path: Option<&str>) -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let file = path.unwrap_or("config/oradash");

        let settings = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .add_source(config::File::with_name(file).required(path.is_some()))
            .add_source(
                config::Environment::with_prefix("ORADASH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut app_config: AppConfig = settings.try_deserialize()?;
        app_config.apply_env_overrides();
        Ok(app_config)
    }

    /// Apply well-known environment variables on top of the layered config.
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("ORADASH_DATA_DIR") {
            let dir = PathBuf::from(dir);
            self.store.path = dir.join("oradash.sqlite");
            self.store.key_path = dir.join("encryption.key");
        }
        if let Ok(dir) = std::env::var("ORACLE_CLIENT_LIB_DIR") {
            self.oracle.client_lib_dir = Some(dir);
        }
        if let Ok(key) = std::env::var("LLM_API_KEY").or_else(|_| std::env::var("OPENAI_API_KEY")) {
            self.llm.api_key = Some(key);
        }
        if let Ok(enabled) = std::env::var("ORADASH_LLM_ENABLED") {
            self.features.llm_enabled = matches!(enabled.as_str(), "1" | "true" | "yes");
        }
        if let Ok(email) = std::env::var("ORADASH_BOOTSTRAP_EMAIL") {
            self.auth.bootstrap_email = Some(email);
        }
        if let Ok(password) = std::env::var("ORADASH_BOOTSTRAP_PASSWORD") {
            self.auth.bootstrap_password = Some(password);
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// API port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    120
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Session authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Name of the session cookie.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Session lifetime in seconds.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    /// Mark the cookie `Secure` (HTTPS deployments).
    #[serde(default)]
    pub secure_cookie: bool,
    /// Email of the admin created when the users table is empty.
    pub bootstrap_email: Option<String>,
    /// Password of the bootstrap admin.
    pub bootstrap_password: Option<String>,
}

fn default_cookie_name() -> String {
    "oradash_session".to_string()
}

fn default_session_ttl() -> u64 {
    43200 // 12 hours
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            session_ttl_secs: default_session_ttl(),
            secure_cookie: false,
            bootstrap_email: None,
            bootstrap_password: None,
        }
    }
}

/// Auxiliary store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// Credential encryption key file (created on first start).
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data/oradash.sqlite")
}

fn default_key_path() -> PathBuf {
    PathBuf::from("./data/encryption.key")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            key_path: default_key_path(),
        }
    }
}

/// Oracle execution defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Statement timeout in milliseconds.
    #[serde(default = "default_oracle_timeout")]
    pub default_timeout_ms: u64,
    /// Maximum rows fetched by a SELECT.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    /// Driver fetch array size.
    #[serde(default = "default_fetch_array_size")]
    pub fetch_array_size: u32,
    /// How long a resolved connection descriptor is reused (0 disables caching).
    #[serde(default = "default_resolver_ttl")]
    pub resolver_cache_ttl_secs: u64,
    /// Directory holding the Oracle client libraries.
    pub client_lib_dir: Option<String>,
}

fn default_oracle_timeout() -> u64 {
    30_000
}

fn default_max_rows() -> usize {
    1000
}

fn default_fetch_array_size() -> u32 {
    100
}

fn default_resolver_ttl() -> u64 {
    30
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_oracle_timeout(),
            max_rows: default_max_rows(),
            fetch_array_size: default_fetch_array_size(),
            resolver_cache_ttl_secs: default_resolver_ttl(),
            client_lib_dir: None,
        }
    }
}

impl OracleConfig {
    /// Default statement timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Optional subsystems.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeaturesConfig {
    /// Enable LLM-backed SQL analysis routes.
    #[serde(default)]
    pub llm_enabled: bool,
}

/// LLM provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// API key.
    pub api_key: Option<String>,
    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,
    /// Maximum tokens to generate.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// HTTP timeout in seconds.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_llm_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f32 {
    0.2
}

fn default_llm_timeout() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

/// Prefetch scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefetchConfig {
    /// Interval used when a start request does not name one.
    #[serde(default = "default_interval")]
    pub default_interval_secs: u64,
    /// Smallest accepted interval.
    #[serde(default = "default_min_interval")]
    pub min_interval_secs: u64,
    /// Start collection for the default connection at boot.
    #[serde(default)]
    pub autostart_default: bool,
}

fn default_interval() -> u64 {
    300
}

fn default_min_interval() -> u64 {
    10
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: default_interval(),
            min_interval_secs: default_min_interval(),
            autostart_default: false,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to use JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
