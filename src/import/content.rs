//! Pages and files import.
//!
//! Per course, in order: the syllabus (from the course detail, stored as a
//! page with id `-course_id`), every wiki page with its body fetched one by
//! one, then every file. A file whose extension is listed in
//! `[extract] file_extensions` and whose size is within
//! `max_file_bytes` is downloaded through a fresh pre-signed URL and its
//! text stored in a second write.

use serde_json::Value;
use tracing::{debug, info, warn};

use super::{resolve_course_ids, Detail, ImportContext, ImportResult};
use crate::canvas::CanvasClient;
use crate::error::ImportOutcome;
use crate::extract::extract;
use crate::models::{FileRecord, PageRecord};
use crate::sink::IndexDocument;

pub fn syllabus_path(course_id: i64) -> String {
    format!("/api/v1/courses/{}?include[]=syllabus_body", course_id)
}

pub fn pages_path(course_id: i64) -> String {
    format!("/api/v1/courses/{}/pages", course_id)
}

pub fn page_detail_path(course_id: i64, page_url: &str) -> String {
    format!("/api/v1/courses/{}/pages/{}", course_id, page_url)
}

pub fn files_path(course_id: i64) -> String {
    format!("/api/v1/courses/{}/files", course_id)
}

pub fn public_url_path(file_id: i64) -> String {
    format!("/api/v1/files/{}/public_url", file_id)
}

pub async fn import_content(ctx: &ImportContext, user_id: &str) -> ImportOutcome<ImportResult> {
    let client = ctx.start(user_id).await?;
    info!(user_id, base_url = client.base_url(), "importing pages and files");

    let mut result = ImportResult::default();
    let course_ids = resolve_course_ids(ctx, &client, user_id, &mut result).await?;

    for course_id in course_ids {
        let mut count = 0u64;
        count += import_syllabus(ctx, &client, user_id, course_id, &mut result).await;
        count += import_pages(ctx, &client, user_id, course_id, &mut result).await;
        count += import_files(ctx, &client, user_id, course_id, &mut result).await;
        result.details.push(Detail::count(course_id, count));
    }

    ctx.finish(user_id, &client, "content").await;
    info!(
        user_id,
        processed = result.processed,
        inserted = result.inserted_new,
        updated = result.updated_existing,
        "pages and files imported"
    );
    Ok(result)
}

async fn store_page(
    ctx: &ImportContext,
    user_id: &str,
    page: &PageRecord,
    result: &mut ImportResult,
) -> bool {
    match ctx.store.upsert_page(user_id, page).await {
        Ok(outcome) => {
            result.record(outcome);
            ctx.hooks.run(&IndexDocument::page(user_id, page)).await;
            true
        }
        Err(e) => {
            warn!(user_id, course_id = page.course_id, page_id = page.canvas_id, error = %e, "page upsert failed");
            result.details.push(Detail::error(
                Some(page.course_id),
                Some(page.canvas_id),
                e.to_string(),
            ));
            false
        }
    }
}

async fn import_syllabus(
    ctx: &ImportContext,
    client: &CanvasClient,
    user_id: &str,
    course_id: i64,
    result: &mut ImportResult,
) -> u64 {
    let course = match client.single_fetch(&syllabus_path(course_id)).await {
        Ok(Some(course)) => course,
        Ok(None) => return 0,
        Err(e) => {
            warn!(user_id, course_id, error = %e, "course detail fetch failed");
            result.details.push(Detail::fetch(Some(course_id), None, &e));
            return 0;
        }
    };
    let Some(syllabus) = PageRecord::syllabus(&course, course_id) else {
        return 0;
    };
    store_page(ctx, user_id, &syllabus, result).await as u64
}

async fn import_pages(
    ctx: &ImportContext,
    client: &CanvasClient,
    user_id: &str,
    course_id: i64,
    result: &mut ImportResult,
) -> u64 {
    let listing = match client.paged_fetch(&pages_path(course_id)).await {
        Ok(listing) => listing,
        Err(e) => {
            warn!(user_id, course_id, error = %e, "page listing failed");
            result.details.push(Detail::fetch(Some(course_id), None, &e));
            return 0;
        }
    };

    let mut count = 0u64;
    for summary in &listing {
        let detail = match summary.get("url").and_then(Value::as_str) {
            Some(slug) => match client.single_fetch(&page_detail_path(course_id, slug)).await {
                Ok(detail) => detail,
                Err(e) => {
                    warn!(user_id, course_id, page = slug, error = %e, "page body fetch failed");
                    result.details.push(Detail::fetch(
                        Some(course_id),
                        crate::models::json_id(summary, "page_id"),
                        &e,
                    ));
                    None
                }
            },
            None => None,
        };

        let Some(page) = PageRecord::from_canvas(detail.as_ref().unwrap_or(summary), course_id)
        else {
            result
                .details
                .push(Detail::error(Some(course_id), None, "page payload without an id"));
            continue;
        };
        if store_page(ctx, user_id, &page, result).await {
            count += 1;
        }
    }
    count
}

async fn import_files(
    ctx: &ImportContext,
    client: &CanvasClient,
    user_id: &str,
    course_id: i64,
    result: &mut ImportResult,
) -> u64 {
    let listing = match client.paged_fetch(&files_path(course_id)).await {
        Ok(listing) => listing,
        Err(e) => {
            warn!(user_id, course_id, error = %e, "file listing failed");
            result.details.push(Detail::fetch(Some(course_id), None, &e));
            return 0;
        }
    };

    let mut count = 0u64;
    for raw in &listing {
        let Some(mut file) = FileRecord::from_canvas(raw, course_id) else {
            result
                .details
                .push(Detail::error(Some(course_id), None, "file payload without an id"));
            continue;
        };

        match client.single_fetch(&public_url_path(file.canvas_id)).await {
            Ok(body) => {
                file.public_url = body
                    .as_ref()
                    .and_then(|b| b.get("public_url"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
            Err(e) => {
                warn!(user_id, course_id, file_id = file.canvas_id, error = %e, "public url fetch failed");
                result
                    .details
                    .push(Detail::fetch(Some(course_id), Some(file.canvas_id), &e));
            }
        }

        match ctx.store.upsert_file(user_id, &file).await {
            Ok(outcome) => {
                result.record(outcome);
                count += 1;
            }
            Err(e) => {
                warn!(user_id, course_id, file_id = file.canvas_id, error = %e, "file upsert failed");
                result
                    .details
                    .push(Detail::error(Some(course_id), Some(file.canvas_id), e.to_string()));
                continue;
            }
        }

        if let Err(message) = extract_file_text(ctx, client, user_id, &file).await {
            result
                .details
                .push(Detail::error(Some(course_id), Some(file.canvas_id), message));
        }

        let stored_text = match ctx.store.file_text(user_id, file.canvas_id).await {
            Ok(text) => text,
            Err(e) => {
                warn!(user_id, course_id, file_id = file.canvas_id, error = %e, "stored file text unavailable");
                result
                    .details
                    .push(Detail::error(Some(course_id), Some(file.canvas_id), e.to_string()));
                continue;
            }
        };
        if let Some(doc) = IndexDocument::file(user_id, &file, stored_text.as_deref()) {
            ctx.hooks.run(&doc).await;
        }
    }
    count
}

/// Download and extract one file when it qualifies. Errors are returned as
/// detail messages; a file with no recoverable text is not an error.
async fn extract_file_text(
    ctx: &ImportContext,
    client: &CanvasClient,
    user_id: &str,
    file: &FileRecord,
) -> Result<(), String> {
    let filename = file.filename.as_deref().unwrap_or("");
    if !ctx.config.extract.wants(filename) {
        return Ok(());
    }
    let max_bytes = ctx.config.extract.max_file_bytes;
    if file.size.is_some_and(|size| size as u64 > max_bytes) {
        debug!(file_id = file.canvas_id, size = file.size, max_bytes, "file too large to extract");
        return Ok(());
    }
    let Some(url) = file.public_url.as_deref().or(file.url.as_deref()) else {
        debug!(file_id = file.canvas_id, "no download url");
        return Ok(());
    };

    let bytes = client
        .download(url, max_bytes)
        .await
        .map_err(|e| format!("download failed: {}", e))?;
    // Document decoding is CPU-bound; keep it off the async workers.
    let name = filename.to_string();
    let content_type = file.content_type.clone().unwrap_or_default();
    let extracted = tokio::task::spawn_blocking(move || extract(&bytes, &name, &content_type))
        .await
        .map_err(|e| format!("extraction task failed: {}", e))?;
    match extracted {
        Some(text) => ctx
            .store
            .set_file_text(user_id, file.canvas_id, &text)
            .await
            .map_err(|e| e.to_string()),
        None => {
            debug!(file_id = file.canvas_id, filename, "no text recovered");
            Ok(())
        }
    }
}
