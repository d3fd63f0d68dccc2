//! Sync cursor store.
//!
//! One row per `(user, base_url, endpoint)`. Import runs stamp `last_sync`
//! when they finish; `etag` is kept for conditional requests but nothing
//! filters on it yet.

use serde::Serialize;
use sqlx::SqlitePool;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCursor {
    pub endpoint: String,
    pub etag: Option<String>,
    pub last_sync: String,
}

pub async fn get_cursor(
    pool: &SqlitePool,
    user_id: &str,
    base_url: &str,
    endpoint: &str,
) -> sqlx::Result<Option<SyncCursor>> {
    let row: Option<(String, Option<String>, String)> = sqlx::query_as(
        "SELECT endpoint, etag, last_sync FROM sync_cursors WHERE user_id = ? AND base_url = ? AND endpoint = ?",
    )
    .bind(user_id)
    .bind(base_url)
    .bind(endpoint)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(endpoint, etag, last_sync)| SyncCursor {
        endpoint,
        etag,
        last_sync,
    }))
}

pub async fn set_cursor(
    pool: &SqlitePool,
    user_id: &str,
    base_url: &str,
    endpoint: &str,
    etag: Option<&str>,
) -> sqlx::Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO sync_cursors (user_id, base_url, endpoint, etag, last_sync) VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(user_id, base_url, endpoint) DO UPDATE SET etag = excluded.etag, last_sync = excluded.last_sync
        "#,
    )
    .bind(user_id)
    .bind(base_url)
    .bind(endpoint)
    .bind(etag)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Every cursor stored for a user, ordered by base URL then endpoint.
pub async fn list_cursors(pool: &SqlitePool, user_id: &str) -> sqlx::Result<Vec<(String, SyncCursor)>> {
    let rows: Vec<(String, String, Option<String>, String)> = sqlx::query_as(
        "SELECT base_url, endpoint, etag, last_sync FROM sync_cursors WHERE user_id = ? ORDER BY base_url, endpoint",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(base_url, endpoint, etag, last_sync)| {
            (
                base_url,
                SyncCursor {
                    endpoint,
                    etag,
                    last_sync,
                },
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn cursors_are_independent_per_endpoint() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::with_db_path(tmp.path().join("cursors.sqlite"));
        let pool = crate::db::connect(&config).await.unwrap();
        crate::migrate::apply(&pool).await.unwrap();

        let base = "https://school.instructure.com";
        assert!(get_cursor(&pool, "u1", base, "courses").await.unwrap().is_none());

        set_cursor(&pool, "u1", base, "courses", Some("\"abc\"")).await.unwrap();
        set_cursor(&pool, "u1", base, "grades", None).await.unwrap();
        set_cursor(&pool, "u1", base, "courses", Some("\"def\"")).await.unwrap();

        let courses = get_cursor(&pool, "u1", base, "courses").await.unwrap().unwrap();
        assert_eq!(courses.etag.as_deref(), Some("\"def\""));
        let grades = get_cursor(&pool, "u1", base, "grades").await.unwrap().unwrap();
        assert_eq!(grades.etag, None);
        assert!(get_cursor(&pool, "u2", base, "courses").await.unwrap().is_none());

        let all = list_cursors(&pool, "u1").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].1.endpoint, "courses");
    }
}
