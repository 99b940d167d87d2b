//! Startup validation of the loaded configuration.

use super::error::{ConfigResult, ConfigurationError};
use super::AppConfig;

/// Rejects settings the server cannot run with.
#[derive(Debug)]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Run every check and report all problems at once.
    pub fn validate(config: &AppConfig) -> ConfigResult<()> {
        let mut errors = Vec::new();
        Self::check_server(config, &mut errors);
        Self::check_oracle(config, &mut errors);
        errors.extend(Self::validate_auth(config).err());
        errors.extend(Self::validate_llm(config).err());
        Self::check_prefetch(config, &mut errors);

        ConfigurationError::collect(errors).map_or(Ok(()), Err)
    }

    fn check_server(config: &AppConfig, errors: &mut Vec<ConfigurationError>) {
        if config.server.port == 0 {
            errors.push(ConfigurationError::invalid(
                "server.port",
                "must not be 0",
                "Set ORADASH__SERVER__PORT or pass --port",
            ));
        }
        if config.server.timeout_secs == 0 {
            errors.push(ConfigurationError::invalid(
                "server.timeout_secs",
                "must be greater than 0",
                "Set ORADASH__SERVER__TIMEOUT_SECS, e.g. 60",
            ));
        }
    }

    fn check_oracle(config: &AppConfig, errors: &mut Vec<ConfigurationError>) {
        let oracle = &config.oracle;
        let zero_checks: [(&'static str, bool, &str); 3] = [
            ("oracle.max_rows", oracle.max_rows == 0, "ORADASH__ORACLE__MAX_ROWS"),
            (
                "oracle.fetch_array_size",
                oracle.fetch_array_size == 0,
                "ORADASH__ORACLE__FETCH_ARRAY_SIZE",
            ),
            (
                "oracle.default_timeout_ms",
                oracle.default_timeout_ms == 0,
                "ORADASH__ORACLE__DEFAULT_TIMEOUT_MS",
            ),
        ];
        for (key, is_zero, env_var) in zero_checks {
            if is_zero {
                errors.push(ConfigurationError::invalid(
                    key,
                    "must be greater than 0",
                    format!("Set {env_var} to a positive number"),
                ));
            }
        }
    }

    /// The bootstrap admin needs both an email and a usable password.
    pub fn validate_auth(config: &AppConfig) -> ConfigResult<()> {
        match (&config.auth.bootstrap_email, &config.auth.bootstrap_password) {
            (Some(_), None) => Err(ConfigurationError::IncompletePair {
                key: "auth.bootstrap_email",
                missing: "auth.bootstrap_password",
                env_var: "ORADASH_BOOTSTRAP_PASSWORD",
            }),
            (None, Some(_)) => Err(ConfigurationError::IncompletePair {
                key: "auth.bootstrap_password",
                missing: "auth.bootstrap_email",
                env_var: "ORADASH_BOOTSTRAP_EMAIL",
            }),
            (Some(_), Some(password)) if password.len() < 8 => Err(ConfigurationError::invalid(
                "auth.bootstrap_password",
                "is shorter than 8 characters",
                "Choose a longer ORADASH_BOOTSTRAP_PASSWORD",
            )),
            _ => Ok(()),
        }
    }

    /// SQL analysis needs a provider key.
    pub fn validate_llm(config: &AppConfig) -> ConfigResult<()> {
        if config.features.llm_enabled && config.llm.api_key.is_none() {
            return Err(ConfigurationError::MissingSecret {
                feature: "SQL analysis",
                secret: "LLM API key",
                env_vars: "LLM_API_KEY or OPENAI_API_KEY",
                flag: "features.llm_enabled",
            });
        }
        Ok(())
    }

    fn check_prefetch(config: &AppConfig, errors: &mut Vec<ConfigurationError>) {
        let prefetch = &config.prefetch;
        if prefetch.min_interval_secs == 0 {
            errors.push(ConfigurationError::invalid(
                "prefetch.min_interval_secs",
                "must be greater than 0",
                "Set ORADASH__PREFETCH__MIN_INTERVAL_SECS to at least 1",
            ));
        } else if prefetch.default_interval_secs < prefetch.min_interval_secs {
            errors.push(ConfigurationError::invalid(
                "prefetch.default_interval_secs",
                format!(
                    "({}) is below prefetch.min_interval_secs ({})",
                    prefetch.default_interval_secs, prefetch.min_interval_secs
                ),
                "Raise ORADASH__PREFETCH__DEFAULT_INTERVAL_SECS",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConfigValidator::validate(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_llm_enabled_without_key() {
        let mut config = AppConfig::default();
        config.features.llm_enabled = true;
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("LLM_API_KEY"));

        config.llm.api_key = Some("sk-test".to_string());
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_bootstrap_pair() {
        let mut config = AppConfig::default();
        config.auth.bootstrap_email = Some("admin@example.com".to_string());
        assert!(matches!(
            ConfigValidator::validate_auth(&config),
            Err(ConfigurationError::IncompletePair { missing: "auth.bootstrap_password", .. })
        ));

        config.auth.bootstrap_password = Some("short".to_string());
        assert!(ConfigValidator::validate_auth(&config).is_err());

        config.auth.bootstrap_password = Some("long-enough-secret".to_string());
        assert!(ConfigValidator::validate_auth(&config).is_ok());
    }

    #[test]
    fn test_every_zero_is_reported() {
        let mut config = AppConfig::default();
        config.oracle.max_rows = 0;
        config.oracle.fetch_array_size = 0;
        config.prefetch.min_interval_secs = 0;
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(err.count(), 3);
        assert!(err.to_string().contains("oracle.fetch_array_size"));
    }
}
