//! Session cookie helpers.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::config::AuthConfig;

/// Cookie carrying a freshly issued session token.
#[must_use]
pub fn session_cookie(config: &AuthConfig, token: String) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), token))
        .http_only(true)
        .secure(config.secure_cookie)
        .same_site(SameSite::Lax)
        .path("/")
        .build()
}

/// Cookie that removes the session cookie from the browser.
#[must_use]
pub fn removal_cookie(config: &AuthConfig) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), String::new()))
        .path("/")
        .build()
}

/// Session token from the cookie, or from `Authorization: Bearer` for scripted clients.
#[must_use]
pub fn session_token(headers: &HeaderMap, config: &AuthConfig) -> Option<String> {
    let jar = CookieJar::from_headers(headers);
    if let Some(cookie) = jar.get(&config.cookie_name) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_string());
        }
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header::COOKIE, HeaderValue};

    #[test]
    fn test_token_from_cookie() {
        let config = AuthConfig::default();
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; oradash_session=abc123"));
        assert_eq!(session_token(&headers, &config).as_deref(), Some("abc123"));
    }

    #[test]
    fn test_token_from_bearer() {
        let config = AuthConfig::default();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer xyz"));
        assert_eq!(session_token(&headers, &config).as_deref(), Some("xyz"));

        assert!(session_token(&HeaderMap::new(), &config).is_none());
    }

    #[test]
    fn test_cookie_attributes() {
        let config = AuthConfig::default();
        let cookie = session_cookie(&config, "tok".to_string());
        assert_eq!(cookie.name(), "oradash_session");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
    }
}
