//! Gateway functionality - session authentication and user profile.

pub mod auth;
pub mod profile;
pub mod sessions;

pub use auth::{auth_middleware, AuthenticatedUser};

use axum::Router;

use crate::AppState;

/// Create the gateway router (auth and profile routes).
pub fn create_router() -> Router<AppState> {
    Router::new().merge(auth::router()).merge(profile::router())
}
