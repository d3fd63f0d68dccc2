use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::{resolve_course_ids, Detail, ImportContext, ImportResult};
use crate::error::ImportOutcome;
use crate::models::AnnouncementRecord;
use crate::sink::IndexDocument;
use crate::store::{EntityKind, UpsertOutcome};

pub fn announcements_path(course_id: i64) -> String {
    format!(
        "/api/v1/courses/{}/discussion_topics?only_announcements=true",
        course_id
    )
}

/// Upsert the announcements of every known course.
///
/// Topics Canvas does not itself flag as announcements are dropped even
/// though the listing asked for announcements only. New versus updated is
/// judged against the ids stored before the run started; a topic
/// cross-listed under several courses is new at most once per run.
pub async fn import_announcements(
    ctx: &ImportContext,
    user_id: &str,
) -> ImportOutcome<ImportResult> {
    let client = ctx.start(user_id).await?;
    info!(user_id, base_url = client.base_url(), "importing announcements");

    let existing = ctx
        .store
        .existing_ids(EntityKind::Announcement, user_id)
        .await?;
    let mut result = ImportResult::default();
    let course_ids = resolve_course_ids(ctx, &client, user_id, &mut result).await?;
    let mut seen = HashSet::new();

    for course_id in course_ids {
        let listing = match client.paged_fetch(&announcements_path(course_id)).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(user_id, course_id, error = %e, "announcement listing failed");
                result.details.push(Detail::fetch(Some(course_id), None, &e));
                continue;
            }
        };

        let mut count = 0u64;
        for raw in listing.iter().filter(|raw| AnnouncementRecord::is_flagged(raw)) {
            let Some(announcement) = AnnouncementRecord::from_canvas(raw, course_id) else {
                continue;
            };
            match ctx.store.upsert_announcement(user_id, &announcement).await {
                Ok(_) => {
                    let first_sighting = seen.insert(announcement.canvas_id);
                    let outcome = if first_sighting && !existing.contains(&announcement.canvas_id) {
                        UpsertOutcome::Inserted
                    } else {
                        UpsertOutcome::Updated
                    };
                    result.record(outcome);
                    count += 1;
                    ctx.hooks
                        .run(&IndexDocument::announcement(user_id, &announcement))
                        .await;
                }
                Err(e) => {
                    warn!(user_id, course_id, announcement_id = announcement.canvas_id, error = %e, "announcement upsert failed");
                    result.details.push(Detail::error(
                        Some(course_id),
                        Some(announcement.canvas_id),
                        e.to_string(),
                    ));
                }
            }
        }
        debug!(user_id, course_id, listed = listing.len(), kept = count, "announcement listing filtered");
        result.details.push(Detail::count(course_id, count));
    }

    ctx.finish(user_id, &client, "announcements").await;
    info!(
        user_id,
        processed = result.processed,
        inserted = result.inserted_new,
        updated = result.updated_existing,
        "announcements imported"
    );
    Ok(result)
}
