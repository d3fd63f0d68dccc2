use tracing::{info, warn};

use super::{Detail, ImportContext, ImportResult};
use crate::error::ImportOutcome;
use crate::models::CourseRecord;
use crate::sink::IndexDocument;

/// Active enrollments with their term expanded.
pub const COURSES_PATH: &str = "/api/v1/courses?enrollment_state=active&include[]=term";

/// Fetch the user's active course list once and upsert each course.
pub async fn import_courses(ctx: &ImportContext, user_id: &str) -> ImportOutcome<ImportResult> {
    let client = ctx.start(user_id).await?;
    info!(user_id, base_url = client.base_url(), "importing courses");

    let mut result = ImportResult::default();
    let listing = match client.paged_fetch(COURSES_PATH).await {
        Ok(listing) => listing,
        Err(e) => {
            warn!(user_id, error = %e, "course listing failed");
            result.details.push(Detail::fetch(None, None, &e));
            Vec::new()
        }
    };

    for raw in &listing {
        if CourseRecord::is_restricted(raw) {
            continue;
        }
        let Some(course) = CourseRecord::from_canvas(raw) else {
            result
                .details
                .push(Detail::error(None, None, "course payload without an id"));
            continue;
        };
        match ctx.store.upsert_course(user_id, &course).await {
            Ok(outcome) => {
                result.record(outcome);
                ctx.hooks.run(&IndexDocument::course(user_id, &course)).await;
            }
            Err(e) => {
                warn!(user_id, course_id = course.canvas_id, error = %e, "course upsert failed");
                result
                    .details
                    .push(Detail::error(Some(course.canvas_id), None, e.to_string()));
            }
        }
    }

    ctx.finish(user_id, &client, "courses").await;
    info!(
        user_id,
        processed = result.processed,
        inserted = result.inserted_new,
        updated = result.updated_existing,
        errors = result.errors().count(),
        "courses imported"
    );
    Ok(result)
}
