mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tempfile::TempDir;

use common::{context_for, disabled, json_ok, origin, serve, test_config, unauthorized, USER};
use dunorth_sync::cursor::get_cursor;
use dunorth_sync::error::ImportError;
use dunorth_sync::import::{
    announcements::import_announcements, assignments::import_assignments,
    content::import_content, courses::import_courses, grades::import_grades, run_all,
    StageOutcome,
};
use dunorth_sync::store::EntityKind;

fn two_courses() -> Response {
    json_ok(json!([
        {"id": 1, "name": "Biology", "course_code": "BIO-101", "term": {"name": "Fall 2026"}},
        {"id": 2, "name": "Chemistry", "course_code": "CHEM-110"},
        {"id": 3, "access_restricted_by_date": true}
    ]))
}

async fn assignments(Path(course_id): Path<i64>) -> Response {
    match course_id {
        1 => json_ok(json!([
            {"id": 10, "name": "Lab report", "due_at": "2026-09-01T23:59:00Z", "points_possible": 20},
            {"id": 11, "name": "Essay", "due_at": "2027-01-15T23:59:00Z", "description": "<p>Write about <b>cells</b></p>"},
            {"id": 12, "name": "Reading", "due_at": null}
        ])),
        _ => disabled(),
    }
}

fn canvas_router() -> Router {
    Router::new()
        .route("/api/v1/courses", get(|| async { two_courses() }))
        .route("/api/v1/courses/{id}/assignments", get(assignments))
}

#[tokio::test]
async fn assignments_end_to_end() {
    let base = serve(canvas_router()).await;
    let tmp = TempDir::new().unwrap();
    let ctx = context_for(test_config(&tmp), &base).await;

    let result = import_assignments(&ctx, USER).await.unwrap();
    assert_eq!(
        serde_json::to_value(&result).unwrap(),
        json!({
            "ok": true,
            "processed": 3,
            "insertedNew": 3,
            "updatedExisting": 0,
            "details": [{"courseId": 1, "count": 3}, {"courseId": 2, "count": 0}]
        })
    );

    // Course discovery stored the two accessible courses.
    assert_eq!(ctx.store.course_ids(USER).await.unwrap(), vec![1, 2]);
    let cursor = get_cursor(ctx.pool(), USER, &base, "assignments").await.unwrap();
    assert!(cursor.is_some());
}

#[tokio::test]
async fn reruns_are_idempotent() {
    let base = serve(canvas_router()).await;
    let tmp = TempDir::new().unwrap();
    let ctx = context_for(test_config(&tmp), &base).await;

    let first = import_courses(&ctx, USER).await.unwrap();
    assert_eq!(first.inserted_new, 2);
    let second = import_courses(&ctx, USER).await.unwrap();
    assert_eq!(second.inserted_new, 0);
    assert_eq!(second.processed, second.updated_existing);

    import_assignments(&ctx, USER).await.unwrap();
    let again = import_assignments(&ctx, USER).await.unwrap();
    assert_eq!(again.inserted_new, 0);
    assert_eq!(again.updated_existing, 3);
    assert_eq!(ctx.store.count(EntityKind::Assignment, USER).await.unwrap(), 3);
}

#[tokio::test]
async fn grades_deduplicate_across_discovery_paths() {
    let router = canvas_router()
        .route(
            "/api/v1/courses/{id}/assignments/{assignment_id}/submissions",
            get(|Path((course, assignment)): Path<(i64, i64)>| async move {
                if course == 1 && assignment == 10 {
                    json_ok(json!([{"id": 500, "assignment_id": 10, "user_id": 7, "score": 18.0, "grade": "A-"}]))
                } else {
                    json_ok(json!([]))
                }
            }),
        )
        .route(
            "/api/v1/courses/{id}/students/submissions",
            get(|Path(course): Path<i64>| async move {
                if course == 1 {
                    json_ok(json!([
                        {"id": 500, "assignment_id": 10, "user_id": 7, "score": 18.0, "grade": "A-"},
                        {"id": 501, "assignment_id": 11, "user_id": 7, "late": true}
                    ]))
                } else {
                    disabled()
                }
            }),
        );
    let base = serve(router).await;
    let tmp = TempDir::new().unwrap();
    let ctx = context_for(test_config(&tmp), &base).await;
    import_assignments(&ctx, USER).await.unwrap();

    let result = import_grades(&ctx, USER).await.unwrap();
    assert_eq!(result.unique_items_this_run, Some(2));
    assert_eq!(result.processed, 2);
    assert_eq!(result.inserted_new, 2);
    assert_eq!(result.errors().count(), 0);
    assert_eq!(ctx.store.count(EntityKind::Grade, USER).await.unwrap(), 2);

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["uniqueItemsThisRun"], 2);
}

#[tokio::test]
async fn announcements_keep_only_flagged_topics() {
    let router = canvas_router().route(
        "/api/v1/courses/{id}/discussion_topics",
        get(|Path(course): Path<i64>| async move {
            match course {
                1 => json_ok(json!([
                    {"id": 70, "title": "Welcome", "message": "<p>Hello class</p>", "is_announcement": true,
                     "posted_at": "2026-08-20T10:00:00Z", "author": {"id": 4, "display_name": "Dr. Reyes"}},
                    {"id": 71, "title": "Introduce yourself", "message": "<p>Reply below</p>"}
                ])),
                _ => disabled(),
            }
        }),
    );
    let base = serve(router).await;
    let tmp = TempDir::new().unwrap();
    let ctx = context_for(test_config(&tmp), &base).await;

    let first = import_announcements(&ctx, USER).await.unwrap();
    assert_eq!(first.processed, 1);
    assert_eq!(first.inserted_new, 1);
    assert!(first
        .details
        .iter()
        .any(|d| d.course_id == Some(2) && d.count == Some(0)));
    assert_eq!(first.errors().count(), 0);

    let second = import_announcements(&ctx, USER).await.unwrap();
    assert_eq!(second.inserted_new, 0);
    assert_eq!(second.updated_existing, 1);

    let author: Option<String> =
        sqlx::query_scalar("SELECT author_name FROM announcements WHERE canvas_id = 70")
            .fetch_one(ctx.pool())
            .await
            .unwrap();
    assert_eq!(author.as_deref(), Some("Dr. Reyes"));
}

#[tokio::test]
async fn cross_listed_announcement_is_new_once() {
    let router = canvas_router().route(
        "/api/v1/courses/{id}/discussion_topics",
        get(|| async {
            json_ok(json!([
                {"id": 80, "title": "Midterm moved", "message": "<p>Now on Friday</p>", "is_announcement": true}
            ]))
        }),
    );
    let base = serve(router).await;
    let tmp = TempDir::new().unwrap();
    let ctx = context_for(test_config(&tmp), &base).await;

    let result = import_announcements(&ctx, USER).await.unwrap();
    assert_eq!(result.processed, 2);
    assert_eq!(result.inserted_new, 1);
    assert_eq!(result.updated_existing, 1);
    assert_eq!(ctx.store.count(EntityKind::Announcement, USER).await.unwrap(), 1);
}

fn content_router(downloads: Arc<AtomicUsize>) -> Router {
    Router::new()
        .route(
            "/api/v1/courses",
            get(|| async { json_ok(json!([{"id": 1, "name": "Biology"}])) }),
        )
        .route(
            "/api/v1/courses/{id}",
            get(|| async {
                json_ok(json!({"id": 1, "name": "Biology", "syllabus_body": "<p>Grading: labs 40%</p>"}))
            }),
        )
        .route(
            "/api/v1/courses/{id}/pages",
            get(|| async { json_ok(json!([{"page_id": 5, "url": "week-1", "title": "Week 1"}])) }),
        )
        .route(
            "/api/v1/courses/{id}/pages/{url}",
            get(|| async {
                json_ok(json!({"page_id": 5, "url": "week-1", "title": "Week 1", "body": "<h2>Cells</h2><p>Organelles</p>"}))
            }),
        )
        .route(
            "/api/v1/courses/{id}/files",
            get(|headers: HeaderMap| async move {
                json_ok(json!([
                    {"id": 9, "display_name": "notes.txt", "content-type": "text/plain", "size": 64,
                     "url": format!("{}/files/9/download", origin(&headers))},
                    {"id": 10, "display_name": "photo.png", "content-type": "image/png", "size": 2048,
                     "url": format!("{}/files/10/download", origin(&headers))}
                ]))
            }),
        )
        .route(
            "/api/v1/files/{id}/public_url",
            get(|headers: HeaderMap, Path(id): Path<i64>| async move {
                json_ok(json!({"public_url": format!("{}/files/{}/download?verifier=abc", origin(&headers), id)}))
            }),
        )
        .route(
            "/files/{id}/download",
            get(move || {
                let downloads = downloads.clone();
                async move {
                    if downloads.fetch_add(1, Ordering::SeqCst) == 0 {
                        "Mitosis has four phases.".into_response()
                    } else {
                        (StatusCode::SERVICE_UNAVAILABLE, "try later").into_response()
                    }
                }
            }),
        )
}

#[tokio::test]
async fn content_stores_syllabus_pages_and_file_text() {
    let downloads = Arc::new(AtomicUsize::new(0));
    let base = serve(content_router(downloads.clone())).await;
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.extract.file_extensions = vec!["pdf".into(), "txt".into()];
    let ctx = context_for(config, &base).await;

    let first = import_content(&ctx, USER).await.unwrap();
    assert_eq!(first.processed, 4);
    assert_eq!(first.inserted_new, 4);
    assert_eq!(first.errors().count(), 0);
    assert_eq!(downloads.load(Ordering::SeqCst), 1);

    let (title, body): (Option<String>, Option<String>) =
        sqlx::query_as("SELECT title, body FROM pages WHERE canvas_id = -1")
            .fetch_one(ctx.pool())
            .await
            .unwrap();
    assert_eq!(title.as_deref(), Some("Biology Syllabus"));
    assert!(body.unwrap().contains("labs 40%"));

    let page_body: Option<String> = sqlx::query_scalar("SELECT body FROM pages WHERE canvas_id = 5")
        .fetch_one(ctx.pool())
        .await
        .unwrap();
    assert!(page_body.unwrap().contains("Organelles"));

    let public_url: Option<String> = sqlx::query_scalar("SELECT public_url FROM files WHERE canvas_id = 9")
        .fetch_one(ctx.pool())
        .await
        .unwrap();
    assert!(public_url.unwrap().ends_with("verifier=abc"));
    assert_eq!(
        ctx.store.file_text(USER, 9).await.unwrap().as_deref(),
        Some("Mitosis has four phases.")
    );
    assert_eq!(ctx.store.file_text(USER, 10).await.unwrap(), None);

    let indexed: Vec<String> =
        sqlx::query_scalar("SELECT doc_id FROM index_documents WHERE user_id = ? ORDER BY doc_id")
            .bind(USER)
            .fetch_all(ctx.pool())
            .await
            .unwrap();
    assert!(indexed.contains(&"file:9".to_string()));
    assert!(indexed.contains(&"page:5".to_string()));
    assert!(indexed.contains(&"page:-1".to_string()));
    assert!(!indexed.contains(&"file:10".to_string()));

    // The second download fails; the stored text must survive.
    let second = import_content(&ctx, USER).await.unwrap();
    assert_eq!(second.inserted_new, 0);
    assert_eq!(second.updated_existing, 4);
    assert!(second
        .errors()
        .any(|d| d.item_id == Some(9) && d.course_id == Some(1)));
    assert_eq!(
        ctx.store.file_text(USER, 9).await.unwrap().as_deref(),
        Some("Mitosis has four phases.")
    );
}

#[tokio::test]
async fn unreadable_file_text_is_an_item_error() {
    let downloads = Arc::new(AtomicUsize::new(0));
    let base = serve(content_router(downloads)).await;
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.extract.file_extensions = vec!["txt".into()];
    let ctx = context_for(config, &base).await;
    sqlx::query("ALTER TABLE files RENAME COLUMN extracted_text TO legacy_text")
        .execute(ctx.pool())
        .await
        .unwrap();

    let result = import_content(&ctx, USER).await.unwrap();
    assert!(result.ok);
    assert_eq!(result.processed, 4);
    assert!(result.errors().all(|d| d.course_id == Some(1) && d.item_id.is_some()));
    assert!(result.errors().any(|d| d.item_id == Some(9)));
    assert!(result.errors().any(|d| d.item_id == Some(10)));
    assert!(result
        .details
        .iter()
        .any(|d| d.course_id == Some(1) && d.count == Some(4)));
}

#[tokio::test]
async fn grades_survive_unreadable_assignments() {
    let router = canvas_router().route(
        "/api/v1/courses/{id}/students/submissions",
        get(|Path(course): Path<i64>| async move {
            if course == 1 {
                json_ok(json!([{"id": 600, "assignment_id": 10, "user_id": 7, "score": 15.0}]))
            } else {
                json_ok(json!([]))
            }
        }),
    );
    let base = serve(router).await;
    let tmp = TempDir::new().unwrap();
    let ctx = context_for(test_config(&tmp), &base).await;
    import_courses(&ctx, USER).await.unwrap();
    sqlx::query("DROP TABLE assignments")
        .execute(ctx.pool())
        .await
        .unwrap();

    let result = import_grades(&ctx, USER).await.unwrap();
    assert!(result.ok);
    assert_eq!(result.processed, 1);
    assert_eq!(result.unique_items_this_run, Some(1));
    let errors: Vec<_> = result.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].course_id, None);
    assert_eq!(ctx.store.count(EntityKind::Grade, USER).await.unwrap(), 1);
}

#[tokio::test]
async fn failing_course_does_not_stop_the_run() {
    let router = Router::new()
        .route("/api/v1/courses", get(|| async { two_courses() }))
        .route(
            "/api/v1/courses/{id}/assignments",
            get(|Path(course): Path<i64>| async move {
                if course == 1 {
                    (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response()
                } else {
                    json_ok(json!([{"id": 20, "name": "Titration"}]))
                }
            }),
        );
    let base = serve(router).await;
    let tmp = TempDir::new().unwrap();
    let ctx = context_for(test_config(&tmp), &base).await;

    let result = import_assignments(&ctx, USER).await.unwrap();
    assert!(result.ok);
    assert_eq!(result.processed, 1);
    let errors: Vec<_> = result.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].course_id, Some(1));
    assert!(errors[0].error.as_deref().unwrap().contains("500"));
}

#[tokio::test]
async fn startup_failures_are_fatal() {
    let tmp = TempDir::new().unwrap();
    let ctx = context_for(test_config(&tmp), "http://127.0.0.1:9").await;

    let err = import_courses(&ctx, "nobody").await.unwrap_err();
    assert!(matches!(err, ImportError::NoSession { .. }));
    assert_eq!(err.to_json(), json!({"ok": false, "error": "no_session"}));
    let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE id = 'nobody'")
        .fetch_one(ctx.pool())
        .await
        .unwrap();
    assert_eq!(users, 0);

    let err = import_courses(&ctx, "  ").await.unwrap_err();
    assert_eq!(err.code(), "invalid_input");
}

#[tokio::test]
async fn strict_auth_rejection_fails_at_startup() {
    let base = serve(Router::new().fallback(|| async { unauthorized() })).await;
    let tmp = TempDir::new().unwrap();

    let lenient = context_for(test_config(&tmp), &base).await;
    let result = import_courses(&lenient, USER).await.unwrap();
    assert_eq!(result.processed, 0);

    let mut config = test_config(&tmp);
    config.canvas.strict_auth = true;
    let strict = context_for(config, &base).await;
    let err = import_courses(&strict, USER).await.unwrap_err();
    assert_eq!(err.code(), "auth_failure");
    assert_eq!(strict.store.count(EntityKind::Course, USER).await.unwrap(), 0);
}

#[tokio::test]
async fn strict_auth_rejection_mid_run_is_a_course_detail() {
    let router = Router::new()
        .route("/api/v1/users/self", get(|| async { json_ok(json!({"id": 7, "name": "Student"})) }))
        .route("/api/v1/courses", get(|| async { two_courses() }))
        .route(
            "/api/v1/courses/{id}/assignments",
            get(|Path(course): Path<i64>| async move {
                if course == 1 {
                    json_ok(json!([{"id": 10, "name": "Lab report"}, {"id": 11, "name": "Essay"}]))
                } else {
                    unauthorized()
                }
            }),
        );
    let base = serve(router).await;
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.canvas.strict_auth = true;
    let ctx = context_for(config, &base).await;

    let result = import_assignments(&ctx, USER).await.unwrap();
    assert!(result.ok);
    assert_eq!(result.processed, 2);
    assert_eq!(ctx.store.count(EntityKind::Assignment, USER).await.unwrap(), 2);

    let json = serde_json::to_value(&result).unwrap();
    let details = json["details"].as_array().unwrap();
    assert_eq!(details[0], json!({"courseId": 1, "count": 2}));
    assert_eq!(details[1]["courseId"], 2);
    assert_eq!(details[1]["code"], "auth_failure");
    assert!(details[1]["error"].as_str().unwrap().contains("/api/v1/courses/2/assignments"));
}

#[tokio::test]
async fn run_all_reports_every_stage() {
    let router = canvas_router()
        .route(
            "/api/v1/courses/{id}/assignments/{assignment_id}/submissions",
            get(|| async { json_ok(json!([])) }),
        )
        .route("/api/v1/courses/{id}/students/submissions", get(|| async { disabled() }))
        .route("/api/v1/courses/{id}/discussion_topics", get(|| async { disabled() }))
        .route("/api/v1/courses/{id}", get(|| async { disabled() }))
        .route("/api/v1/courses/{id}/pages", get(|| async { disabled() }))
        .route("/api/v1/courses/{id}/files", get(|| async { disabled() }));
    let base = serve(router).await;
    let tmp = TempDir::new().unwrap();
    let ctx = context_for(test_config(&tmp), &base).await;

    let stages = run_all(&ctx, USER).await.unwrap();
    let names: Vec<_> = stages.keys().copied().collect();
    assert_eq!(names, vec!["announcements", "assignments", "content", "courses", "grades"]);
    for stage in stages.values() {
        assert!(matches!(stage, StageOutcome::Completed(r) if r.errors().count() == 0));
    }
    match &stages["assignments"] {
        StageOutcome::Completed(r) => assert_eq!(r.processed, 3),
        StageOutcome::Failed(v) => panic!("assignments failed: {}", v),
    }
}
