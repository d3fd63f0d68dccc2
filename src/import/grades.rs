//! Grades import.
//!
//! Submissions are discovered twice: per assignment, and per course through
//! the gradebook endpoint. Neither path is known to be a superset of the
//! other across Canvas deployments, so both run. A run-scoped seen set keeps
//! each submission id counted once while every sighting is still upserted.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use tracing::{debug, info, warn};

use super::{resolve_course_ids, Detail, ImportContext, ImportResult};
use crate::error::ImportOutcome;
use crate::models::SubmissionRecord;

pub fn assignment_submissions_path(course_id: i64, assignment_id: i64) -> String {
    format!(
        "/api/v1/courses/{}/assignments/{}/submissions",
        course_id, assignment_id
    )
}

pub fn gradebook_path(course_id: i64) -> String {
    format!(
        "/api/v1/courses/{}/students/submissions?student_ids[]=self",
        course_id
    )
}

struct GradeRun<'a> {
    ctx: &'a ImportContext,
    user_id: &'a str,
    seen: HashSet<i64>,
    per_course: BTreeMap<i64, u64>,
    result: ImportResult,
}

impl GradeRun<'_> {
    async fn ingest(&mut self, listing: &[Value], course_id: i64, assignment_id: Option<i64>) {
        for raw in listing {
            let Some(submission) = SubmissionRecord::from_canvas(raw, Some(course_id), assignment_id)
            else {
                self.result.details.push(Detail::error(
                    Some(course_id),
                    assignment_id,
                    "submission payload without an id",
                ));
                continue;
            };
            match self.ctx.store.upsert_submission(self.user_id, &submission).await {
                Ok(outcome) => {
                    if self.seen.insert(submission.canvas_id) {
                        self.result.record(outcome);
                        *self.per_course.entry(course_id).or_default() += 1;
                    } else {
                        debug!(submission_id = submission.canvas_id, "submission already seen this run");
                    }
                }
                Err(e) => {
                    warn!(user_id = self.user_id, course_id, submission_id = submission.canvas_id, error = %e, "submission upsert failed");
                    self.result.details.push(Detail::error(
                        Some(course_id),
                        Some(submission.canvas_id),
                        e.to_string(),
                    ));
                }
            }
        }
    }
}

pub async fn import_grades(ctx: &ImportContext, user_id: &str) -> ImportOutcome<ImportResult> {
    let client = ctx.start(user_id).await?;
    info!(user_id, base_url = client.base_url(), "importing grades");

    let mut run = GradeRun {
        ctx,
        user_id,
        seen: HashSet::new(),
        per_course: BTreeMap::new(),
        result: ImportResult::default(),
    };
    let course_ids = resolve_course_ids(ctx, &client, user_id, &mut run.result).await?;

    let assignment_refs = match ctx.store.assignment_refs(user_id).await {
        Ok(refs) => refs,
        Err(e) => {
            warn!(user_id, error = %e, "stored assignments unavailable; skipping per-assignment path");
            run.result.details.push(Detail::error(None, None, e.to_string()));
            Vec::new()
        }
    };

    for (course_id, assignment_id) in assignment_refs {
        match client
            .paged_fetch(&assignment_submissions_path(course_id, assignment_id))
            .await
        {
            Ok(listing) => run.ingest(&listing, course_id, Some(assignment_id)).await,
            Err(e) => {
                warn!(user_id, course_id, assignment_id, error = %e, "submission listing failed");
                run.result
                    .details
                    .push(Detail::fetch(Some(course_id), Some(assignment_id), &e));
            }
        }
    }

    for &course_id in &course_ids {
        match client.paged_fetch(&gradebook_path(course_id)).await {
            Ok(listing) => run.ingest(&listing, course_id, None).await,
            Err(e) => {
                warn!(user_id, course_id, error = %e, "gradebook listing failed");
                run.result.details.push(Detail::fetch(Some(course_id), None, &e));
            }
        }
    }

    let GradeRun {
        seen,
        per_course,
        mut result,
        ..
    } = run;
    for course_id in course_ids {
        let count = per_course.get(&course_id).copied().unwrap_or(0);
        result.details.push(Detail::count(course_id, count));
    }
    result.unique_items_this_run = Some(seen.len() as u64);

    ctx.finish(user_id, &client, "grades").await;
    info!(
        user_id,
        processed = result.processed,
        unique = seen.len(),
        "grades imported"
    );
    Ok(result)
}
