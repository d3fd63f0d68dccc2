use tracing::{info, warn};

use super::{resolve_course_ids, Detail, ImportContext, ImportResult};
use crate::error::ImportOutcome;
use crate::models::AssignmentRecord;
use crate::sink::IndexDocument;

pub fn assignments_path(course_id: i64) -> String {
    format!(
        "/api/v1/courses/{}/assignments?include[]=all_dates&include[]=submission&include[]=rubric",
        course_id
    )
}

/// Upsert every assignment of every known course.
///
/// Each course contributes a `{courseId, count}` detail, including courses
/// that returned nothing.
pub async fn import_assignments(ctx: &ImportContext, user_id: &str) -> ImportOutcome<ImportResult> {
    let client = ctx.start(user_id).await?;
    info!(user_id, base_url = client.base_url(), "importing assignments");

    let mut result = ImportResult::default();
    let course_ids = resolve_course_ids(ctx, &client, user_id, &mut result).await?;

    for course_id in course_ids {
        let listing = match client.paged_fetch(&assignments_path(course_id)).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(user_id, course_id, error = %e, "assignment listing failed");
                result.details.push(Detail::fetch(Some(course_id), None, &e));
                continue;
            }
        };

        let mut count = 0u64;
        for raw in &listing {
            let Some(assignment) = AssignmentRecord::from_canvas(raw, course_id) else {
                result.details.push(Detail::error(
                    Some(course_id),
                    None,
                    "assignment payload without an id",
                ));
                continue;
            };
            match ctx.store.upsert_assignment(user_id, &assignment).await {
                Ok(outcome) => {
                    result.record(outcome);
                    count += 1;
                    ctx.hooks
                        .run(&IndexDocument::assignment(user_id, &assignment))
                        .await;
                }
                Err(e) => {
                    warn!(user_id, course_id, assignment_id = assignment.canvas_id, error = %e, "assignment upsert failed");
                    result.details.push(Detail::error(
                        Some(course_id),
                        Some(assignment.canvas_id),
                        e.to_string(),
                    ));
                }
            }
        }
        result.details.push(Detail::count(course_id, count));
    }

    ctx.finish(user_id, &client, "assignments").await;
    info!(
        user_id,
        processed = result.processed,
        inserted = result.inserted_new,
        updated = result.updated_existing,
        "assignments imported"
    );
    Ok(result)
}
