//! Retrieval-index sink and post-commit hooks.
//!
//! After an entity is committed to the store, the orchestrators hand a
//! plain-text [`IndexDocument`] to every registered [`IndexSink`]. Sinks are
//! write-only from the pipeline's point of view and their failures are
//! logged and swallowed by [`PostCommitHooks::run`].
//!
//! [`SqliteChunkSink`] is the built-in sink: it chunks the text with
//! [`chunk_text`] and stores the chunks in `index_chunks`. A document whose
//! content hash has not changed since the last run is left alone.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::chunk::chunk_text;
use crate::extract::html_to_text;
use crate::models::{AnnouncementRecord, AssignmentRecord, CourseRecord, FileRecord, PageRecord};

/// Plain-text view of one stored entity.
#[derive(Debug, Clone)]
pub struct IndexDocument {
    pub user_id: String,
    pub course_id: Option<i64>,
    /// Stable id of the form `<kind>:<canvas_id>`.
    pub doc_id: String,
    pub kind: &'static str,
    pub title: Option<String>,
    pub text: String,
    pub metadata: Value,
}

fn join_parts(parts: &[Option<&str>]) -> String {
    parts
        .iter()
        .flatten()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

impl IndexDocument {
    pub fn course(user_id: &str, c: &CourseRecord) -> Self {
        Self {
            user_id: user_id.to_string(),
            course_id: Some(c.canvas_id),
            doc_id: format!("course:{}", c.canvas_id),
            kind: "course",
            title: c.name.clone(),
            text: join_parts(&[c.name.as_deref(), c.course_code.as_deref(), c.term.as_deref()]),
            metadata: json!({ "courseCode": c.course_code, "term": c.term }),
        }
    }

    pub fn assignment(user_id: &str, a: &AssignmentRecord) -> Self {
        let description = a.description.as_deref().map(html_to_text);
        Self {
            user_id: user_id.to_string(),
            course_id: Some(a.course_id),
            doc_id: format!("assignment:{}", a.canvas_id),
            kind: "assignment",
            title: a.name.clone(),
            text: join_parts(&[a.name.as_deref(), description.as_deref()]),
            metadata: json!({
                "dueAt": a.due_at,
                "pointsPossible": a.points_possible,
                "htmlUrl": a.html_url,
            }),
        }
    }

    pub fn page(user_id: &str, p: &PageRecord) -> Self {
        let body = p.body.as_deref().map(html_to_text);
        Self {
            user_id: user_id.to_string(),
            course_id: Some(p.course_id),
            doc_id: format!("page:{}", p.canvas_id),
            kind: "page",
            title: p.title.clone(),
            text: join_parts(&[p.title.as_deref(), body.as_deref()]),
            metadata: json!({ "url": p.url }),
        }
    }

    /// `None` when the file has no extracted text.
    pub fn file(user_id: &str, f: &FileRecord, extracted: Option<&str>) -> Option<Self> {
        let text = extracted.filter(|t| !t.trim().is_empty())?;
        Some(Self {
            user_id: user_id.to_string(),
            course_id: Some(f.course_id),
            doc_id: format!("file:{}", f.canvas_id),
            kind: "file",
            title: f.filename.clone(),
            text: join_parts(&[f.filename.as_deref(), Some(text)]),
            metadata: json!({ "contentType": f.content_type, "size": f.size }),
        })
    }

    pub fn announcement(user_id: &str, a: &AnnouncementRecord) -> Self {
        let message = a.message.as_deref().map(html_to_text);
        Self {
            user_id: user_id.to_string(),
            course_id: Some(a.course_id),
            doc_id: format!("announcement:{}", a.canvas_id),
            kind: "announcement",
            title: a.title.clone(),
            text: join_parts(&[a.title.as_deref(), message.as_deref()]),
            metadata: json!({
                "postedAt": a.posted_at,
                "author": a.author_name,
                "htmlUrl": a.html_url,
            }),
        }
    }

    fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.title.as_deref().unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update(self.text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Destination for indexed documents.
#[async_trait]
pub trait IndexSink: Send + Sync {
    fn name(&self) -> &str;

    async fn index_document(&self, doc: &IndexDocument) -> Result<()>;
}

/// Chunks documents into the local `index_chunks` table.
pub struct SqliteChunkSink {
    pool: SqlitePool,
    max_tokens: usize,
}

impl SqliteChunkSink {
    pub fn new(pool: SqlitePool, max_tokens: usize) -> Self {
        Self { pool, max_tokens }
    }
}

#[async_trait]
impl IndexSink for SqliteChunkSink {
    fn name(&self) -> &str {
        "sqlite-chunks"
    }

    async fn index_document(&self, doc: &IndexDocument) -> Result<()> {
        if doc.text.trim().is_empty() {
            return Ok(());
        }

        let hash = doc.content_hash();
        let existing: Option<String> = sqlx::query_scalar(
            "SELECT content_hash FROM index_documents WHERE user_id = ? AND doc_id = ?",
        )
        .bind(&doc.user_id)
        .bind(&doc.doc_id)
        .fetch_optional(&self.pool)
        .await?;

        if existing.as_deref() == Some(hash.as_str()) {
            debug!(doc_id = %doc.doc_id, "index document unchanged");
            return Ok(());
        }

        let chunks = chunk_text(&doc.doc_id, &doc.text, self.max_tokens);
        let now = chrono::Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO index_documents (user_id, doc_id, course_id, kind, title, metadata_json, content_hash, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, doc_id) DO UPDATE SET
                course_id = excluded.course_id,
                kind = excluded.kind,
                title = excluded.title,
                metadata_json = excluded.metadata_json,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.user_id)
        .bind(&doc.doc_id)
        .bind(doc.course_id)
        .bind(doc.kind)
        .bind(&doc.title)
        .bind(doc.metadata.to_string())
        .bind(&hash)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM index_chunks WHERE user_id = ? AND doc_id = ?")
            .bind(&doc.user_id)
            .bind(&doc.doc_id)
            .execute(&mut *tx)
            .await?;

        for chunk in &chunks {
            sqlx::query(
                "INSERT INTO index_chunks (id, user_id, doc_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&doc.user_id)
            .bind(&chunk.doc_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(doc_id = %doc.doc_id, chunks = chunks.len(), "indexed document");
        Ok(())
    }
}

/// Sinks invoked after each successful upsert.
#[derive(Clone, Default)]
pub struct PostCommitHooks {
    sinks: Vec<Arc<dyn IndexSink>>,
}

impl PostCommitHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sink: Arc<dyn IndexSink>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Hand the document to every sink. Never fails.
    pub async fn run(&self, doc: &IndexDocument) {
        for sink in &self.sinks {
            if let Err(e) = sink.index_document(doc).await {
                warn!(sink = sink.name(), doc_id = %doc.doc_id, error = %e, "index sink failed");
            }
        }
    }
}
