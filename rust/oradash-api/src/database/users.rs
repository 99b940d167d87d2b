//! Dashboard users and their login sessions.

use anyhow::{Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::store::{is_unique_violation, parse_datetime, parse_optional_datetime, Store};

/// A dashboard user. The password hash never leaves this module's callers.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Raised when an email is already taken.
#[derive(Debug, thiserror::Error)]
#[error("Email {0} is already in use")]
pub struct DuplicateEmail(pub String);

/// Hash a password into an argon2 PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))
}

/// Check a password against a stored PHC string. Malformed hashes never verify.
#[must_use]
pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

fn new_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create_user(&self, email: &str, name: &str, password: &str) -> Result<User>;

    async fn get_user(&self, id: &str) -> Result<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn count_users(&self) -> Result<i64>;

    /// Change name and/or email.
    async fn update_profile(&self, id: &str, name: Option<String>, email: Option<String>)
        -> Result<Option<User>>;

    /// Store a new password hash and drop the user's other sessions.
    async fn set_password(&self, id: &str, password: &str, keep_session: Option<&str>) -> Result<()>;

    async fn touch_last_login(&self, id: &str) -> Result<()>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Issue a session token valid for `ttl`.
    async fn create_session(&self, user_id: &str, ttl: Duration) -> Result<String>;

    /// The user owning an unexpired session.
    async fn session_user(&self, token: &str) -> Result<Option<User>>;

    async fn delete_session(&self, token: &str) -> Result<()>;

    /// Remove expired sessions; returns how many were removed.
    async fn purge_expired_sessions(&self) -> Result<usize>;
}

const USER_COLUMNS: &str =
    "id, email, name, password_hash, created_at, updated_at, last_login_at";

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        password_hash: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
        updated_at: parse_datetime(&row.get::<_, String>(5)?),
        last_login_at: parse_optional_datetime(row.get(6)?),
    })
}

fn load_user(conn: &rusqlite::Connection, id: &str) -> Result<Option<User>> {
    Ok(conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            row_to_user,
        )
        .optional()?)
}

#[async_trait]
impl UserRepository for Store {
    async fn create_user(&self, email: &str, name: &str, password: &str) -> Result<User> {
        let id = uuid::Uuid::new_v4().to_string();
        let email = email.trim().to_string();
        let name = name.to_string();
        let hash = hash_password(password)?;
        let now = Utc::now().to_rfc3339();

        self.call(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, email, name, password_hash, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![id, email, name, hash, now],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => return Err(DuplicateEmail(email).into()),
                Err(e) => return Err(e).context("Failed to insert user"),
            }
            load_user(conn, &id)?.ok_or_else(|| anyhow::anyhow!("User {id} vanished after insert"))
        })
        .await
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let id = id.to_string();
        self.call(move |conn| load_user(conn, &id)).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.trim().to_string();
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                    params![email],
                    row_to_user,
                )
                .optional()?)
        })
        .await
    }

    async fn count_users(&self) -> Result<i64> {
        self.call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?))
            .await
    }

    async fn update_profile(
        &self,
        id: &str,
        name: Option<String>,
        email: Option<String>,
    ) -> Result<Option<User>> {
        let id = id.to_string();
        let email = email.map(|e| e.trim().to_string());
        let now = Utc::now().to_rfc3339();

        self.call(move |conn| {
            let updated = conn.execute(
                "UPDATE users SET name = COALESCE(?2, name), email = COALESCE(?3, email), updated_at = ?4
                 WHERE id = ?1",
                params![id, name, email, now],
            );
            match updated {
                Ok(0) => return Ok(None),
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(DuplicateEmail(email.unwrap_or_default()).into());
                }
                Err(e) => return Err(e).context("Failed to update profile"),
            }
            load_user(conn, &id)
        })
        .await
    }

    async fn set_password(&self, id: &str, password: &str, keep_session: Option<&str>) -> Result<()> {
        let id = id.to_string();
        let keep = keep_session.map(str::to_string);
        let hash = hash_password(password)?;
        let now = Utc::now().to_rfc3339();

        self.call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE users SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, hash, now],
            )?;
            tx.execute(
                "DELETE FROM user_sessions WHERE user_id = ?1 AND (?2 IS NULL OR token <> ?2)",
                params![id, keep],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn touch_last_login(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        let now = Utc::now().to_rfc3339();
        self.call(move |conn| {
            conn.execute(
                "UPDATE users SET last_login_at = ?2 WHERE id = ?1",
                params![id, now],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl SessionRepository for Store {
    async fn create_session(&self, user_id: &str, ttl: Duration) -> Result<String> {
        let token = new_session_token();
        let user_id = user_id.to_string();
        let now = Utc::now();
        let expires_at = (now + ttl).to_rfc3339();
        let created_at = now.to_rfc3339();

        let issued = token.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO user_sessions (token, user_id, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![issued, user_id, created_at, expires_at],
            )?;
            Ok(())
        })
        .await?;
        Ok(token)
    }

    async fn session_user(&self, token: &str) -> Result<Option<User>> {
        let token = token.to_string();
        let now = Utc::now();

        self.call(move |conn| {
            let session: Option<(String, String)> = conn
                .query_row(
                    "SELECT user_id, expires_at FROM user_sessions WHERE token = ?1",
                    params![token],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((user_id, expires_at)) = session else {
                return Ok(None);
            };
            if parse_datetime(&expires_at) <= now {
                conn.execute("DELETE FROM user_sessions WHERE token = ?1", params![token])?;
                return Ok(None);
            }
            load_user(conn, &user_id)
        })
        .await
    }

    async fn delete_session(&self, token: &str) -> Result<()> {
        let token = token.to_string();
        self.call(move |conn| {
            conn.execute("DELETE FROM user_sessions WHERE token = ?1", params![token])?;
            Ok(())
        })
        .await
    }

    async fn purge_expired_sessions(&self) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        self.call(move |conn| {
            Ok(conn.execute("DELETE FROM user_sessions WHERE expires_at <= ?1", params![now])?)
        })
        .await
    }
}

/// Create the bootstrap admin when no user exists yet.
///
/// Returns true when an account was created.
pub async fn ensure_bootstrap_admin(store: &Store, email: &str, password: &str) -> Result<bool> {
    if store.count_users().await? > 0 {
        return Ok(false);
    }
    store.create_user(email, "Administrator", password).await?;
    tracing::info!("👤 Created bootstrap admin account - email={}", email);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hashing() {
        let hash = hash_password("correct horse").expect("hash");
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-phc-string"));
    }

    #[test]
    fn test_session_token_shape() {
        let a = new_session_token();
        let b = new_session_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(!a.contains('=') && !a.contains('+') && !a.contains('/'));
    }

    #[tokio::test]
    async fn test_bootstrap_once() {
        let store = Store::in_memory().await.expect("store");
        assert!(ensure_bootstrap_admin(&store, "admin@example.com", "s3cret-pass").await.expect("first"));
        assert!(!ensure_bootstrap_admin(&store, "other@example.com", "s3cret-pass").await.expect("second"));
        assert_eq!(store.count_users().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_sessions() {
        let store = Store::in_memory().await.expect("store");
        let user = store.create_user("dba@example.com", "DBA", "password1").await.expect("user");

        let token = store.create_session(&user.id, Duration::hours(1)).await.expect("session");
        let owner = store.session_user(&token).await.expect("lookup").expect("valid");
        assert_eq!(owner.id, user.id);

        store.delete_session(&token).await.expect("delete");
        assert!(store.session_user(&token).await.expect("lookup").is_none());

        let expired = store.create_session(&user.id, Duration::seconds(-1)).await.expect("expired");
        assert!(store.session_user(&expired).await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn test_password_change_drops_other_sessions() {
        let store = Store::in_memory().await.expect("store");
        let user = store.create_user("dba@example.com", "DBA", "password1").await.expect("user");
        let current = store.create_session(&user.id, Duration::hours(1)).await.expect("current");
        let other = store.create_session(&user.id, Duration::hours(1)).await.expect("other");

        store.set_password(&user.id, "password2", Some(&current)).await.expect("set");

        assert!(store.session_user(&current).await.expect("lookup").is_some());
        assert!(store.session_user(&other).await.expect("lookup").is_none());
        let user = store.get_user(&user.id).await.expect("get").expect("user");
        assert!(verify_password("password2", &user.password_hash));
    }

    #[tokio::test]
    async fn test_duplicate_email() {
        let store = Store::in_memory().await.expect("store");
        store.create_user("a@example.com", "A", "password1").await.expect("a");
        let err = store.create_user("A@example.com", "B", "password1").await.unwrap_err();
        assert!(err.downcast_ref::<DuplicateEmail>().is_some());
    }
}
