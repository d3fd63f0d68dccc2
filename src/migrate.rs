use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the database file and every table. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply the schema to an already open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT,
        display_name TEXT,
        canvas_user_id INTEGER,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS canvas_sessions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        base_url TEXT NOT NULL,
        cookie_value TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        expires_at TEXT,
        UNIQUE(user_id, base_url)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS courses (
        user_id TEXT NOT NULL,
        canvas_id INTEGER NOT NULL,
        name TEXT,
        course_code TEXT,
        term TEXT,
        raw_json TEXT NOT NULL,
        first_seen_at TEXT NOT NULL,
        synced_at TEXT NOT NULL,
        UNIQUE(user_id, canvas_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS assignments (
        user_id TEXT NOT NULL,
        canvas_id INTEGER NOT NULL,
        course_id INTEGER NOT NULL,
        name TEXT,
        due_at TEXT,
        description TEXT,
        points_possible REAL,
        submission_types TEXT,
        html_url TEXT,
        workflow_state TEXT,
        raw_json TEXT NOT NULL,
        first_seen_at TEXT NOT NULL,
        synced_at TEXT NOT NULL,
        UNIQUE(user_id, canvas_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS grades (
        user_id TEXT NOT NULL,
        canvas_id INTEGER NOT NULL,
        assignment_id INTEGER,
        course_id INTEGER,
        student_id INTEGER,
        score REAL,
        grade TEXT,
        excused INTEGER NOT NULL DEFAULT 0,
        late INTEGER NOT NULL DEFAULT 0,
        missing INTEGER NOT NULL DEFAULT 0,
        submitted_at TEXT,
        graded_at TEXT,
        workflow_state TEXT,
        submission_type TEXT,
        attempt INTEGER,
        raw_json TEXT NOT NULL,
        first_seen_at TEXT NOT NULL,
        synced_at TEXT NOT NULL,
        UNIQUE(user_id, canvas_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pages (
        user_id TEXT NOT NULL,
        canvas_id INTEGER NOT NULL,
        course_id INTEGER NOT NULL,
        title TEXT,
        url TEXT,
        body TEXT,
        raw_json TEXT NOT NULL,
        first_seen_at TEXT NOT NULL,
        synced_at TEXT NOT NULL,
        UNIQUE(user_id, canvas_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS files (
        user_id TEXT NOT NULL,
        canvas_id INTEGER NOT NULL,
        course_id INTEGER NOT NULL,
        filename TEXT,
        content_type TEXT,
        size INTEGER,
        url TEXT,
        public_url TEXT,
        extracted_text TEXT,
        raw_json TEXT NOT NULL,
        first_seen_at TEXT NOT NULL,
        synced_at TEXT NOT NULL,
        UNIQUE(user_id, canvas_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS announcements (
        user_id TEXT NOT NULL,
        canvas_id INTEGER NOT NULL,
        course_id INTEGER NOT NULL,
        title TEXT,
        message TEXT,
        posted_at TEXT,
        canvas_created_at TEXT,
        last_reply_at TEXT,
        html_url TEXT,
        author_name TEXT,
        author_id INTEGER,
        read_state TEXT,
        locked INTEGER NOT NULL DEFAULT 0,
        published INTEGER NOT NULL DEFAULT 1,
        raw_json TEXT NOT NULL,
        first_seen_at TEXT NOT NULL,
        synced_at TEXT NOT NULL,
        UNIQUE(user_id, canvas_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_cursors (
        user_id TEXT NOT NULL,
        base_url TEXT NOT NULL,
        endpoint TEXT NOT NULL,
        etag TEXT,
        last_sync TEXT NOT NULL,
        PRIMARY KEY (user_id, base_url, endpoint)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS index_documents (
        user_id TEXT NOT NULL,
        doc_id TEXT NOT NULL,
        course_id INTEGER,
        kind TEXT NOT NULL,
        title TEXT,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        content_hash TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (user_id, doc_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS index_chunks (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        doc_id TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        text TEXT NOT NULL,
        hash TEXT NOT NULL,
        UNIQUE(user_id, doc_id, chunk_index)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_canvas_sessions_user ON canvas_sessions(user_id, updated_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_assignments_course ON assignments(user_id, course_id)",
    "CREATE INDEX IF NOT EXISTS idx_grades_assignment ON grades(user_id, assignment_id)",
    "CREATE INDEX IF NOT EXISTS idx_files_course ON files(user_id, course_id)",
    "CREATE INDEX IF NOT EXISTS idx_index_chunks_doc ON index_chunks(user_id, doc_id)",
];
