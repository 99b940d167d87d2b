//! Startup configuration errors.
//!
//! Every variant names the offending key and the environment variable or
//! setting that fixes it, so a failed boot prints something actionable.

use thiserror::Error;

/// A configuration problem found by [`super::validator::ConfigValidator`].
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    /// A value is out of range or unusable.
    #[error("Invalid configuration: {key} {problem}\n\nHow to fix: {hint}")]
    Invalid {
        key: &'static str,
        problem: String,
        hint: String,
    },

    /// One half of a pair of settings is set without the other.
    #[error("Incomplete configuration: {key} is set but {missing} is not\n\nSet via: {env_var}")]
    IncompletePair {
        key: &'static str,
        missing: &'static str,
        env_var: &'static str,
    },

    /// An enabled feature needs a secret that was not provided.
    #[error("{feature} is enabled but no {secret} is configured\n\nSet via: {env_vars}, or disable {flag}")]
    MissingSecret {
        feature: &'static str,
        secret: &'static str,
        env_vars: &'static str,
        flag: &'static str,
    },

    #[error("{}", render_all(.0))]
    Multiple(Vec<ConfigurationError>),
}

fn render_all(errors: &[ConfigurationError]) -> String {
    let mut out = format!("{} configuration errors:", errors.len());
    for (i, err) in errors.iter().enumerate() {
        out.push_str(&format!("\n\n{}. {err}", i + 1));
    }
    out
}

impl ConfigurationError {
    /// Out-of-range value for `key`.
    #[must_use]
    pub fn invalid(key: &'static str, problem: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            problem: problem.into(),
            hint: hint.into(),
        }
    }

    /// Merge findings; `None` when there are none.
    #[must_use]
    pub fn collect(mut errors: Vec<ConfigurationError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple(errors)),
        }
    }

    /// Number of individual problems.
    #[must_use]
    pub fn count(&self) -> usize {
        match self {
            Self::Multiple(errors) => errors.len(),
            _ => 1,
        }
    }
}

/// Result type for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigurationError>;
