//! Shared fixtures: an in-process mock Canvas server and a migrated
//! database with a stored session.

#![allow(dead_code)]

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::TempDir;

use dunorth_sync::config::Config;
use dunorth_sync::import::ImportContext;
use dunorth_sync::{db, migrate, session};

pub const USER: &str = "student-1";
pub const CREDENTIAL: &str = "secret-session";

/// Serve `router` on an ephemeral port and return its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Base URL as seen by the handler, rebuilt from the Host header.
pub fn origin(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("127.0.0.1");
    format!("http://{}", host)
}

pub fn json_ok(value: Value) -> Response {
    (StatusCode::OK, axum::Json(value)).into_response()
}

pub fn disabled() -> Response {
    (
        StatusCode::NOT_FOUND,
        axum::Json(json!({"errors": [{"message": "That page has been disabled for this course"}]})),
    )
        .into_response()
}

pub fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        axum::Json(json!({"errors": [{"message": "Invalid access token."}]})),
    )
        .into_response()
}

pub fn test_config(tmp: &TempDir) -> Config {
    let mut config = Config::with_db_path(tmp.path().join("data").join("dunorth.sqlite"));
    config.canvas.timeout_secs = 5;
    config
}

pub async fn open_pool(config: &Config) -> SqlitePool {
    let pool = db::connect(config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    pool
}

/// Migrated database with a session for [`USER`] pointing at `base_url`.
pub async fn context_for(config: Config, base_url: &str) -> ImportContext {
    let pool = open_pool(&config).await;
    session::save_session(&pool, USER, base_url, CREDENTIAL, None)
        .await
        .unwrap();
    ImportContext::new(config, pool)
}
