//! Session authentication.
//!
//! The middleware resolves the session token before any handler runs, so an
//! unauthenticated request never reaches the resolver or the Oracle driver.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
    routing::{get, post},
    Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use super::sessions::{removal_cookie, session_cookie, session_token};
use crate::database::users::verify_password;
use crate::database::{SessionRepository, User, UserRepository};
use crate::error::{ok, require, ApiError, ApiJson, ApiResult, Envelope};
use crate::AppState;

/// Paths reachable without a session.
const PUBLIC_PATHS: &[&str] = &["/health", "/ready", "/api/auth/login"];

/// The signed-in user, inserted into request extensions by [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user: User,
    pub token: String,
}

impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or(ApiError::Unauthorized)
    }
}

/// Reject requests without a valid session.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let path = req.uri().path();
    if PUBLIC_PATHS.contains(&path) || !path.starts_with("/api/") {
        return Ok(next.run(req).await);
    }

    let Some(token) = session_token(req.headers(), &state.config.auth) else {
        tracing::debug!("Missing session - path={}", path);
        return Err(ApiError::Unauthorized);
    };

    let user = state
        .store
        .session_user(&token)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    req.extensions_mut().insert(AuthenticatedUser { user, token });
    Ok(next.run(req).await)
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: Option<String>,
    password: Option<String>,
}

async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(body): ApiJson<LoginRequest>,
) -> ApiResult<(CookieJar, Envelope<User>)> {
    let email = require(body.email.as_deref(), "email")?;
    let password = require(body.password.as_deref(), "password")?;

    let user = match state.store.find_user_by_email(email).await? {
        Some(user) if verify_password(password, &user.password_hash) => user,
        _ => {
            tracing::warn!("⚠️  Failed login attempt - email={}", email);
            return Err(ApiError::Unauthorized);
        }
    };

    let ttl = i64::try_from(state.config.auth.session_ttl_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or_else(|| chrono::Duration::hours(12));
    let token = state.store.create_session(&user.id, ttl).await?;
    state.store.touch_last_login(&user.id).await?;

    tracing::info!("✅ User signed in - user_id={}", user.id);
    Ok((jar.add(session_cookie(&state.config.auth, token)), ok(user)))
}

async fn logout(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    jar: CookieJar,
) -> ApiResult<(CookieJar, Envelope<serde_json::Value>)> {
    state.store.delete_session(&auth.token).await?;
    tracing::info!("User signed out - user_id={}", auth.user.id);
    Ok((
        jar.remove(removal_cookie(&state.config.auth)),
        ok(serde_json::json!({ "logged_out": true })),
    ))
}

async fn me(auth: AuthenticatedUser) -> Envelope<User> {
    ok(auth.user)
}

/// `/api/auth/*` routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
}
