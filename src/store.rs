//! Entity upsert layer.
//!
//! Every Canvas entity is keyed by `(user_id, canvas_id)`. Upserts are
//! idempotent merge statements: re-running with the same payload touches
//! `synced_at` and nothing else observable.
//!
//! Merge rules per column:
//!
//! | Column kind | On conflict |
//! |-------------|-------------|
//! | `raw_json` | replaced wholesale |
//! | grade state (`score`, `grade`, flags, `workflow_state`, `graded_at`) | replaced |
//! | other descriptive columns | `COALESCE(new, old)`: a payload that omits a field keeps the stored value |
//! | `files.extracted_text` | only written by [`Store::set_file_text`] |

use std::collections::HashSet;

use sqlx::SqlitePool;

use crate::models::{
    AnnouncementRecord, AssignmentRecord, CourseRecord, FileRecord, PageRecord, SubmissionRecord,
};

/// Whether an upsert created the row or merged into an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Canvas entity tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Course,
    Assignment,
    Grade,
    Page,
    File,
    Announcement,
}

impl EntityKind {
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Course => "courses",
            EntityKind::Assignment => "assignments",
            EntityKind::Grade => "grades",
            EntityKind::Page => "pages",
            EntityKind::File => "files",
            EntityKind::Announcement => "announcements",
        }
    }
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Make sure a `users` row exists for this id.
    pub async fn ensure_user(&self, user_id: &str) -> sqlx::Result<()> {
        sqlx::query("INSERT OR IGNORE INTO users (id, created_at) VALUES (?, ?)")
            .bind(user_id)
            .bind(now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn exists(&self, kind: EntityKind, user_id: &str, canvas_id: i64) -> sqlx::Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) > 0 FROM {} WHERE user_id = ? AND canvas_id = ?",
            kind.table()
        );
        sqlx::query_scalar(&sql)
            .bind(user_id)
            .bind(canvas_id)
            .fetch_one(&self.pool)
            .await
    }

    async fn outcome(&self, kind: EntityKind, user_id: &str, canvas_id: i64) -> sqlx::Result<UpsertOutcome> {
        Ok(if self.exists(kind, user_id, canvas_id).await? {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    pub async fn upsert_course(&self, user_id: &str, c: &CourseRecord) -> sqlx::Result<UpsertOutcome> {
        let outcome = self.outcome(EntityKind::Course, user_id, c.canvas_id).await?;
        let ts = now();
        sqlx::query(
            r#"
            INSERT INTO courses (user_id, canvas_id, name, course_code, term, raw_json, first_seen_at, synced_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, canvas_id) DO UPDATE SET
                name = COALESCE(excluded.name, courses.name),
                course_code = COALESCE(excluded.course_code, courses.course_code),
                term = COALESCE(excluded.term, courses.term),
                raw_json = excluded.raw_json,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(user_id)
        .bind(c.canvas_id)
        .bind(&c.name)
        .bind(&c.course_code)
        .bind(&c.term)
        .bind(c.raw.to_string())
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await?;
        Ok(outcome)
    }

    pub async fn upsert_assignment(
        &self,
        user_id: &str,
        a: &AssignmentRecord,
    ) -> sqlx::Result<UpsertOutcome> {
        let outcome = self.outcome(EntityKind::Assignment, user_id, a.canvas_id).await?;
        let submission_types = if a.submission_types.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&a.submission_types).unwrap_or_default())
        };
        let ts = now();
        sqlx::query(
            r#"
            INSERT INTO assignments (user_id, canvas_id, course_id, name, due_at, description,
                                     points_possible, submission_types, html_url, workflow_state,
                                     raw_json, first_seen_at, synced_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, canvas_id) DO UPDATE SET
                course_id = excluded.course_id,
                name = COALESCE(excluded.name, assignments.name),
                due_at = COALESCE(excluded.due_at, assignments.due_at),
                description = COALESCE(excluded.description, assignments.description),
                points_possible = COALESCE(excluded.points_possible, assignments.points_possible),
                submission_types = COALESCE(excluded.submission_types, assignments.submission_types),
                html_url = COALESCE(excluded.html_url, assignments.html_url),
                workflow_state = COALESCE(excluded.workflow_state, assignments.workflow_state),
                raw_json = excluded.raw_json,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(user_id)
        .bind(a.canvas_id)
        .bind(a.course_id)
        .bind(&a.name)
        .bind(&a.due_at)
        .bind(&a.description)
        .bind(a.points_possible)
        .bind(submission_types)
        .bind(&a.html_url)
        .bind(&a.workflow_state)
        .bind(a.raw.to_string())
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await?;
        Ok(outcome)
    }

    pub async fn upsert_submission(
        &self,
        user_id: &str,
        s: &SubmissionRecord,
    ) -> sqlx::Result<UpsertOutcome> {
        let outcome = self.outcome(EntityKind::Grade, user_id, s.canvas_id).await?;
        let ts = now();
        sqlx::query(
            r#"
            INSERT INTO grades (user_id, canvas_id, assignment_id, course_id, student_id, score, grade,
                                excused, late, missing, submitted_at, graded_at, workflow_state,
                                submission_type, attempt, raw_json, first_seen_at, synced_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, canvas_id) DO UPDATE SET
                assignment_id = COALESCE(excluded.assignment_id, grades.assignment_id),
                course_id = COALESCE(excluded.course_id, grades.course_id),
                student_id = COALESCE(excluded.student_id, grades.student_id),
                score = excluded.score,
                grade = excluded.grade,
                excused = excluded.excused,
                late = excluded.late,
                missing = excluded.missing,
                submitted_at = COALESCE(excluded.submitted_at, grades.submitted_at),
                graded_at = excluded.graded_at,
                workflow_state = excluded.workflow_state,
                submission_type = COALESCE(excluded.submission_type, grades.submission_type),
                attempt = COALESCE(excluded.attempt, grades.attempt),
                raw_json = excluded.raw_json,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(user_id)
        .bind(s.canvas_id)
        .bind(s.assignment_id)
        .bind(s.course_id)
        .bind(s.student_id)
        .bind(s.score)
        .bind(&s.grade)
        .bind(s.excused)
        .bind(s.late)
        .bind(s.missing)
        .bind(&s.submitted_at)
        .bind(&s.graded_at)
        .bind(&s.workflow_state)
        .bind(&s.submission_type)
        .bind(s.attempt)
        .bind(s.raw.to_string())
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await?;
        Ok(outcome)
    }

    pub async fn upsert_page(&self, user_id: &str, p: &PageRecord) -> sqlx::Result<UpsertOutcome> {
        let outcome = self.outcome(EntityKind::Page, user_id, p.canvas_id).await?;
        let ts = now();
        sqlx::query(
            r#"
            INSERT INTO pages (user_id, canvas_id, course_id, title, url, body, raw_json, first_seen_at, synced_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, canvas_id) DO UPDATE SET
                course_id = excluded.course_id,
                title = COALESCE(excluded.title, pages.title),
                url = COALESCE(excluded.url, pages.url),
                body = COALESCE(excluded.body, pages.body),
                raw_json = excluded.raw_json,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(user_id)
        .bind(p.canvas_id)
        .bind(p.course_id)
        .bind(&p.title)
        .bind(&p.url)
        .bind(&p.body)
        .bind(p.raw.to_string())
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await?;
        Ok(outcome)
    }

    /// Store file metadata. Never touches `extracted_text`.
    pub async fn upsert_file(&self, user_id: &str, f: &FileRecord) -> sqlx::Result<UpsertOutcome> {
        let outcome = self.outcome(EntityKind::File, user_id, f.canvas_id).await?;
        let ts = now();
        sqlx::query(
            r#"
            INSERT INTO files (user_id, canvas_id, course_id, filename, content_type, size, url,
                               public_url, raw_json, first_seen_at, synced_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, canvas_id) DO UPDATE SET
                course_id = excluded.course_id,
                filename = COALESCE(excluded.filename, files.filename),
                content_type = COALESCE(excluded.content_type, files.content_type),
                size = COALESCE(excluded.size, files.size),
                url = COALESCE(excluded.url, files.url),
                public_url = COALESCE(excluded.public_url, files.public_url),
                raw_json = excluded.raw_json,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(user_id)
        .bind(f.canvas_id)
        .bind(f.course_id)
        .bind(&f.filename)
        .bind(&f.content_type)
        .bind(f.size)
        .bind(&f.url)
        .bind(&f.public_url)
        .bind(f.raw.to_string())
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await?;
        Ok(outcome)
    }

    /// Second-pass write of a file's extracted text.
    pub async fn set_file_text(&self, user_id: &str, canvas_id: i64, text: &str) -> sqlx::Result<()> {
        sqlx::query("UPDATE files SET extracted_text = ? WHERE user_id = ? AND canvas_id = ?")
            .bind(text)
            .bind(user_id)
            .bind(canvas_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn file_text(&self, user_id: &str, canvas_id: i64) -> sqlx::Result<Option<String>> {
        let text: Option<Option<String>> = sqlx::query_scalar(
            "SELECT extracted_text FROM files WHERE user_id = ? AND canvas_id = ?",
        )
        .bind(user_id)
        .bind(canvas_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(text.flatten())
    }

    pub async fn upsert_announcement(
        &self,
        user_id: &str,
        a: &AnnouncementRecord,
    ) -> sqlx::Result<UpsertOutcome> {
        let outcome = self.outcome(EntityKind::Announcement, user_id, a.canvas_id).await?;
        let ts = now();
        sqlx::query(
            r#"
            INSERT INTO announcements (user_id, canvas_id, course_id, title, message, posted_at,
                                       canvas_created_at, last_reply_at, html_url, author_name,
                                       author_id, read_state, locked, published, raw_json,
                                       first_seen_at, synced_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, canvas_id) DO UPDATE SET
                course_id = excluded.course_id,
                title = COALESCE(excluded.title, announcements.title),
                message = COALESCE(excluded.message, announcements.message),
                posted_at = COALESCE(excluded.posted_at, announcements.posted_at),
                canvas_created_at = COALESCE(excluded.canvas_created_at, announcements.canvas_created_at),
                last_reply_at = COALESCE(excluded.last_reply_at, announcements.last_reply_at),
                html_url = COALESCE(excluded.html_url, announcements.html_url),
                author_name = COALESCE(excluded.author_name, announcements.author_name),
                author_id = COALESCE(excluded.author_id, announcements.author_id),
                read_state = COALESCE(excluded.read_state, announcements.read_state),
                locked = excluded.locked,
                published = excluded.published,
                raw_json = excluded.raw_json,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(user_id)
        .bind(a.canvas_id)
        .bind(a.course_id)
        .bind(&a.title)
        .bind(&a.message)
        .bind(&a.posted_at)
        .bind(&a.created_at)
        .bind(&a.last_reply_at)
        .bind(&a.html_url)
        .bind(&a.author_name)
        .bind(a.author_id)
        .bind(&a.read_state)
        .bind(a.locked)
        .bind(a.published)
        .bind(a.raw.to_string())
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await?;
        Ok(outcome)
    }

    /// Snapshot of stored Canvas ids for one entity kind.
    pub async fn existing_ids(&self, kind: EntityKind, user_id: &str) -> sqlx::Result<HashSet<i64>> {
        let sql = format!("SELECT canvas_id FROM {} WHERE user_id = ?", kind.table());
        let ids: Vec<i64> = sqlx::query_scalar(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }

    pub async fn count(&self, kind: EntityKind, user_id: &str) -> sqlx::Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE user_id = ?", kind.table());
        sqlx::query_scalar(&sql)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
    }

    /// Known course ids, ascending.
    pub async fn course_ids(&self, user_id: &str) -> sqlx::Result<Vec<i64>> {
        sqlx::query_scalar("SELECT canvas_id FROM courses WHERE user_id = ? ORDER BY canvas_id")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
    }

    /// Known `(course_id, assignment_id)` pairs, ascending.
    pub async fn assignment_refs(&self, user_id: &str) -> sqlx::Result<Vec<(i64, i64)>> {
        sqlx::query_as(
            "SELECT course_id, canvas_id FROM assignments WHERE user_id = ? ORDER BY course_id, canvas_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }
}
