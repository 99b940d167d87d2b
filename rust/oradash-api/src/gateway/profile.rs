//! Profile routes for the signed-in user.

use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use serde::Deserialize;

use super::auth::AuthenticatedUser;
use crate::database::users::verify_password;
use crate::database::{DuplicateEmail, User, UserRepository};
use crate::error::{ok, require, ApiError, ApiJson, ApiResult, Envelope};
use crate::AppState;

const MIN_PASSWORD_LEN: usize = 8;

async fn get_profile(auth: AuthenticatedUser) -> Envelope<User> {
    ok(auth.user)
}

#[derive(Debug, Deserialize)]
struct ProfileUpdate {
    name: Option<String>,
    email: Option<String>,
}

async fn update_profile(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    ApiJson(body): ApiJson<ProfileUpdate>,
) -> ApiResult<Envelope<User>> {
    if body.name.is_none() && body.email.is_none() {
        return Err(ApiError::invalid("Nothing to update: provide name or email"));
    }
    let name = body.name.map(|n| n.trim().to_string());
    if name.as_deref().is_some_and(str::is_empty) {
        return Err(ApiError::invalid("name must not be empty"));
    }
    if let Some(email) = &body.email {
        if !email.contains('@') {
            return Err(ApiError::invalid("email is not a valid address"));
        }
    }

    let updated = state
        .store
        .update_profile(&auth.user.id, name, body.email)
        .await
        .map_err(|e| match e.downcast_ref::<DuplicateEmail>() {
            Some(dup) => ApiError::invalid(dup.to_string()),
            None => ApiError::Internal(e),
        })?
        .ok_or(ApiError::Unauthorized)?;

    tracing::info!("✅ Profile updated - user_id={}", updated.id);
    Ok(ok(updated))
}

#[derive(Debug, Deserialize)]
struct PasswordChange {
    current_password: Option<String>,
    new_password: Option<String>,
}

async fn change_password(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    ApiJson(body): ApiJson<PasswordChange>,
) -> ApiResult<Envelope<serde_json::Value>> {
    let current = require(body.current_password.as_deref(), "current_password")?;
    let new = require(body.new_password.as_deref(), "new_password")?;

    if new.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::invalid(format!(
            "new_password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if !verify_password(current, &auth.user.password_hash) {
        tracing::warn!("⚠️  Password change with wrong current password - user_id={}", auth.user.id);
        return Err(ApiError::invalid("current_password is incorrect"));
    }

    state
        .store
        .set_password(&auth.user.id, new, Some(&auth.token))
        .await?;

    tracing::info!("✅ Password changed - user_id={}", auth.user.id);
    Ok(ok(serde_json::json!({ "updated": true })))
}

/// `/api/profile` routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/profile", get(get_profile).patch(update_profile))
        .route("/api/profile/password", post(change_password))
}
