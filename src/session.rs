//! Session resolver.
//!
//! A session is the Canvas credential a user handed over, bound to the
//! Canvas base URL it was issued for. Orchestrators only read sessions;
//! [`save_session`] exists for the CLI and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanvasSession {
    pub base_url: String,
    pub cookie_value: String,
    pub updated_at: String,
    pub expires_at: Option<String>,
}

impl CanvasSession {
    /// True when `expires_at` is set and in the past. An unparseable expiry
    /// is treated as no expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|exp| exp.with_timezone(&Utc) <= now)
            .unwrap_or(false)
    }
}

/// Looks up the credential an import run should use.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    /// Newest unexpired session for the user, by update time.
    async fn latest_session(&self, user_id: &str) -> sqlx::Result<Option<CanvasSession>>;
}

/// Resolver backed by the `canvas_sessions` table.
#[derive(Clone)]
pub struct SqliteSessions {
    pool: SqlitePool,
}

impl SqliteSessions {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionResolver for SqliteSessions {
    async fn latest_session(&self, user_id: &str) -> sqlx::Result<Option<CanvasSession>> {
        let rows: Vec<(String, String, String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT base_url, cookie_value, updated_at, expires_at
            FROM canvas_sessions
            WHERE user_id = ?
            ORDER BY updated_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let now = Utc::now();
        Ok(rows
            .into_iter()
            .map(|(base_url, cookie_value, updated_at, expires_at)| CanvasSession {
                base_url,
                cookie_value,
                updated_at,
                expires_at,
            })
            .find(|s| !s.is_expired(now)))
    }
}

/// Store or refresh the session for `(user_id, base_url)`.
pub async fn save_session(
    pool: &SqlitePool,
    user_id: &str,
    base_url: &str,
    cookie_value: &str,
    expires_at: Option<&str>,
) -> sqlx::Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO canvas_sessions (user_id, base_url, cookie_value, created_at, updated_at, expires_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id, base_url) DO UPDATE SET
            cookie_value = excluded.cookie_value,
            updated_at = excluded.updated_at,
            expires_at = excluded.expires_at
        "#,
    )
    .bind(user_id)
    .bind(base_url.trim_end_matches('/'))
    .bind(cookie_value)
    .bind(&now)
    .bind(&now)
    .bind(expires_at)
    .execute(pool)
    .await?;
    Ok(())
}
