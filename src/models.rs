//! Normalized Canvas records.
//!
//! Each record keeps the handful of columns the store indexes and the full
//! upstream payload as an opaque [`Value`]. Canvas response shapes vary by
//! deployment and version, so only the fields listed here are typed. All
//! constructors return `None` when the payload has no usable id.

use serde_json::Value;

/// Read an id that Canvas may send as a number or, with string-id mode on,
/// as a decimal string.
pub fn json_id(v: &Value, key: &str) -> Option<i64> {
    match v.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_str(v: &Value, key: &str) -> Option<String> {
    match v.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn json_f64(v: &Value, key: &str) -> Option<f64> {
    match v.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_bool(v: &Value, key: &str) -> Option<bool> {
    v.get(key)?.as_bool()
}

#[derive(Debug, Clone)]
pub struct CourseRecord {
    pub canvas_id: i64,
    pub name: Option<String>,
    pub course_code: Option<String>,
    pub term: Option<String>,
    pub raw: Value,
}

impl CourseRecord {
    pub fn from_canvas(v: &Value) -> Option<Self> {
        Some(Self {
            canvas_id: json_id(v, "id")?,
            name: json_str(v, "name"),
            course_code: json_str(v, "course_code"),
            term: v.get("term").and_then(|t| json_str(t, "name")),
            raw: v.clone(),
        })
    }

    /// Courses whose `access_restricted_by_date` flag is set come back as
    /// id-only stubs and are not worth storing.
    pub fn is_restricted(v: &Value) -> bool {
        json_bool(v, "access_restricted_by_date").unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct AssignmentRecord {
    pub canvas_id: i64,
    pub course_id: i64,
    pub name: Option<String>,
    pub due_at: Option<String>,
    pub description: Option<String>,
    pub points_possible: Option<f64>,
    pub submission_types: Vec<String>,
    pub html_url: Option<String>,
    pub workflow_state: Option<String>,
    pub raw: Value,
}

impl AssignmentRecord {
    /// `course_id` falls back to the course being listed when the payload
    /// omits it.
    pub fn from_canvas(v: &Value, course_id: i64) -> Option<Self> {
        let workflow_state = json_str(v, "workflow_state").or_else(|| {
            json_bool(v, "published").map(|p| {
                if p {
                    "published".to_string()
                } else {
                    "unpublished".to_string()
                }
            })
        });
        Some(Self {
            canvas_id: json_id(v, "id")?,
            course_id: json_id(v, "course_id").unwrap_or(course_id),
            name: json_str(v, "name"),
            due_at: json_str(v, "due_at"),
            description: json_str(v, "description"),
            points_possible: json_f64(v, "points_possible"),
            submission_types: v
                .get("submission_types")
                .and_then(Value::as_array)
                .map(|types| {
                    types
                        .iter()
                        .filter_map(|t| t.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            html_url: json_str(v, "html_url"),
            workflow_state,
            raw: v.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    pub canvas_id: i64,
    pub assignment_id: Option<i64>,
    pub course_id: Option<i64>,
    pub student_id: Option<i64>,
    pub score: Option<f64>,
    pub grade: Option<String>,
    pub excused: bool,
    pub late: bool,
    pub missing: bool,
    pub submitted_at: Option<String>,
    pub graded_at: Option<String>,
    pub workflow_state: Option<String>,
    pub submission_type: Option<String>,
    pub attempt: Option<i64>,
    pub raw: Value,
}

impl SubmissionRecord {
    pub fn from_canvas(v: &Value, course_id: Option<i64>, assignment_id: Option<i64>) -> Option<Self> {
        Some(Self {
            canvas_id: json_id(v, "id")?,
            assignment_id: json_id(v, "assignment_id").or(assignment_id),
            course_id: json_id(v, "course_id").or(course_id),
            student_id: json_id(v, "user_id"),
            score: json_f64(v, "score"),
            grade: json_str(v, "grade"),
            excused: json_bool(v, "excused").unwrap_or(false),
            late: json_bool(v, "late").unwrap_or(false),
            missing: json_bool(v, "missing").unwrap_or(false),
            submitted_at: json_str(v, "submitted_at"),
            graded_at: json_str(v, "graded_at"),
            workflow_state: json_str(v, "workflow_state"),
            submission_type: json_str(v, "submission_type"),
            attempt: json_id(v, "attempt"),
            raw: v.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct PageRecord {
    pub canvas_id: i64,
    pub course_id: i64,
    pub title: Option<String>,
    pub url: Option<String>,
    pub body: Option<String>,
    pub raw: Value,
}

impl PageRecord {
    pub fn from_canvas(v: &Value, course_id: i64) -> Option<Self> {
        Some(Self {
            canvas_id: json_id(v, "page_id").or_else(|| json_id(v, "id"))?,
            course_id,
            title: json_str(v, "title"),
            url: json_str(v, "url"),
            body: json_str(v, "body"),
            raw: v.clone(),
        })
    }

    /// The course syllabus stored as a page. Its id is the negated course id
    /// so it can never collide with a real page id.
    pub fn syllabus(course: &Value, course_id: i64) -> Option<Self> {
        let body = json_str(course, "syllabus_body")?;
        if body.trim().is_empty() {
            return None;
        }
        Some(Self {
            canvas_id: -course_id,
            course_id,
            title: Some(match json_str(course, "name") {
                Some(name) => format!("{} Syllabus", name),
                None => "Syllabus".to_string(),
            }),
            url: Some("syllabus".to_string()),
            body: Some(body),
            raw: serde_json::json!({
                "course_id": course_id,
                "syllabus_body": course.get("syllabus_body").cloned().unwrap_or(Value::Null),
            }),
        })
    }
}

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub canvas_id: i64,
    pub course_id: i64,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub size: Option<i64>,
    pub url: Option<String>,
    pub public_url: Option<String>,
    pub raw: Value,
}

impl FileRecord {
    pub fn from_canvas(v: &Value, course_id: i64) -> Option<Self> {
        Some(Self {
            canvas_id: json_id(v, "id")?,
            course_id,
            filename: json_str(v, "display_name").or_else(|| json_str(v, "filename")),
            content_type: json_str(v, "content-type").or_else(|| json_str(v, "content_type")),
            size: json_id(v, "size"),
            url: json_str(v, "url"),
            public_url: None,
            raw: v.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct AnnouncementRecord {
    pub canvas_id: i64,
    pub course_id: i64,
    pub title: Option<String>,
    pub message: Option<String>,
    pub posted_at: Option<String>,
    pub created_at: Option<String>,
    pub last_reply_at: Option<String>,
    pub html_url: Option<String>,
    pub author_name: Option<String>,
    pub author_id: Option<i64>,
    pub read_state: Option<String>,
    pub locked: bool,
    pub published: bool,
    pub raw: Value,
}

impl AnnouncementRecord {
    pub fn from_canvas(v: &Value, course_id: i64) -> Option<Self> {
        let author = v.get("author");
        Some(Self {
            canvas_id: json_id(v, "id")?,
            course_id,
            title: json_str(v, "title"),
            message: json_str(v, "message"),
            posted_at: json_str(v, "posted_at"),
            created_at: json_str(v, "created_at"),
            last_reply_at: json_str(v, "last_reply_at"),
            html_url: json_str(v, "html_url"),
            author_name: author
                .and_then(|a| json_str(a, "display_name"))
                .or_else(|| json_str(v, "user_name")),
            author_id: author
                .and_then(|a| json_id(a, "id"))
                .or_else(|| json_id(v, "user_id")),
            read_state: json_str(v, "read_state"),
            locked: json_bool(v, "locked").unwrap_or(false),
            published: json_bool(v, "published").unwrap_or(true),
            raw: v.clone(),
        })
    }

    /// Whether Canvas itself marks this discussion topic as an announcement.
    pub fn is_flagged(v: &Value) -> bool {
        json_bool(v, "is_announcement").unwrap_or(false)
            || json_bool(v, "announcement").unwrap_or(false)
            || v.get("subscription_hold").and_then(Value::as_str) == Some("topic_is_announcement")
    }
}

/// A chunk of an indexed document's text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub doc_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}
