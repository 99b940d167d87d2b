//! API error type and response envelopes.
//!
//! Every handler returns `Result<_, ApiError>`. Errors are logged where they
//! are raised; the response body only carries the public message plus the
//! Oracle error code and offset when the driver supplied them.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::oracle::{ExecutorError, ResolveError};
use crate::scheduler::{CollectError, SchedulerError};

/// Errors surfaced by API handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No or invalid session.
    #[error("Unauthorized")]
    Unauthorized,

    /// Missing or malformed parameters.
    #[error("{0}")]
    InvalidRequest(String),

    /// Unknown connection or resource.
    #[error("{0}")]
    NotFound(String),

    /// Oracle driver, network or database error.
    #[error("{message}")]
    Upstream {
        message: String,
        code: Option<String>,
        offset: Option<u32>,
    },

    /// Oracle statement exceeded its timeout.
    #[error("Query timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// An optional subsystem is switched off.
    #[error("{feature} is disabled")]
    FeatureDisabled {
        feature: &'static str,
        fallback: &'static str,
    },

    /// Anything else; details stay in the logs.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Shorthand for a 400.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Shorthand for a 404.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream { .. } | Self::Timeout { .. } | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::FeatureDisabled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Stable machine-readable code used by the nested error shape.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Upstream { code: Some(code), .. } => code,
            Self::Upstream { .. } => "UPSTREAM_FAILURE",
            Self::Timeout { .. } => "TIMEOUT",
            Self::FeatureDisabled { .. } => "FEATURE_DISABLED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show to API clients.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// Render as `{success: false, error: {code, message, fallback?}}`.
    #[must_use]
    pub fn into_nested_response(self) -> Response {
        log_error(&self);
        let mut error = json!({
            "code": self.code(),
            "message": self.public_message(),
        });
        if let Self::FeatureDisabled { fallback, .. } = &self {
            error["fallback"] = Value::String((*fallback).to_string());
        }
        (
            self.status(),
            Json(json!({ "success": false, "error": error })),
        )
            .into_response()
    }
}

fn log_error(err: &ApiError) {
    match err {
        ApiError::Internal(e) => tracing::error!("❌ Internal error: {e:#}"),
        ApiError::Upstream { message, code, .. } => {
            tracing::error!("❌ Oracle error - code={:?}, message={}", code, message);
        }
        ApiError::Timeout { timeout_ms } => {
            tracing::warn!("⚠️  Oracle statement timed out - timeout_ms={}", timeout_ms);
        }
        other => tracing::debug!("Request rejected - status={}, error={}", other.status(), other),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        log_error(&self);

        let mut body = Map::new();
        body.insert("success".to_string(), Value::Bool(false));
        body.insert("error".to_string(), Value::String(self.public_message()));
        match &self {
            Self::Upstream { code, offset, .. } => {
                if let Some(code) = code {
                    body.insert("code".to_string(), Value::String(code.clone()));
                }
                if let Some(offset) = offset {
                    body.insert("offset".to_string(), Value::from(*offset));
                }
            }
            Self::Timeout { .. } => {
                body.insert("code".to_string(), Value::String("TIMEOUT".to_string()));
                body.insert("error_type".to_string(), Value::String("timeout".to_string()));
            }
            Self::FeatureDisabled { fallback, .. } => {
                body.insert("fallback".to_string(), Value::String((*fallback).to_string()));
            }
            _ => {}
        }

        (self.status(), Json(Value::Object(body))).into_response()
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound(id) => {
                Self::NotFound(format!("Oracle connection '{id}' not found or inactive"))
            }
            ResolveError::Decryption { id, source } => Self::Internal(
                source.context(format!("Failed to decrypt credentials of connection {id}")),
            ),
            ResolveError::Store(e) => Self::Internal(e),
        }
    }
}

impl From<ExecutorError> for ApiError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::Timeout { timeout_ms } => Self::Timeout { timeout_ms },
            ExecutorError::Connect(ref e) => Self::Upstream {
                message: err.to_string(),
                code: e.code_label(),
                offset: None,
            },
            ExecutorError::Upstream(e) => Self::Upstream {
                code: e.code_label(),
                offset: e.offset,
                message: e.message,
            },
            ExecutorError::Join(message) => Self::Internal(anyhow::anyhow!(message)),
        }
    }
}

impl From<CollectError> for ApiError {
    fn from(err: CollectError) -> Self {
        match err {
            CollectError::Resolve(e) => e.into(),
            CollectError::Execute(e) => e.into(),
            CollectError::Store(e) => Self::Internal(e),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}

/// Result alias for handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// JSON body extractor whose rejections become `400 {success: false, error}`.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Query string extractor whose rejections become `400 {success: false, error}`.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// Path extractor whose rejections become `400 {success: false, error}`.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

/// Success envelope: `{success: true, data, ...extra}`.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    success: bool,
    data: T,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl<T: Serialize> Envelope<T> {
    /// Wrap `data`.
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
            extra: Map::new(),
        }
    }

    /// Add a top-level field next to `data`.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Wrap `data` in a success envelope.
pub fn ok<T: Serialize>(data: T) -> Envelope<T> {
    Envelope::new(data)
}

/// Require an optional string parameter to be present and non-blank.
pub fn require<'a>(value: Option<&'a str>, name: &str) -> ApiResult<&'a str> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ApiError::invalid(format!("Missing required parameter: {name}"))),
    }
}
