//! Import orchestrators.
//!
//! Every orchestrator follows the same run shape:
//!
//! ```text
//! resolve session ──► course list ──► per course: fetch ──► upsert ──► hooks
//!                                                      └──► detail entry
//! ```
//!
//! Startup problems (no user id, no stored session, an unusable base URL)
//! are returned as [`ImportError`] before any item is touched. Under
//! `canvas.strict_auth` the credential is checked once at startup against
//! [`PROBE_PATH`], so a rejected credential also fails the run there. After
//! startup, a failing course or item becomes an entry in
//! [`ImportResult::details`] and the loop moves on; a credential rejected
//! mid-run is recorded with the `auth_failure` code.

pub mod announcements;
pub mod assignments;
pub mod content;
pub mod courses;
pub mod grades;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::canvas::CanvasClient;
use crate::config::Config;
use crate::cursor::set_cursor;
use crate::error::{FetchError, ImportError, ImportOutcome};
use crate::models::CourseRecord;
use crate::session::{SessionResolver, SqliteSessions};
use crate::sink::{IndexDocument, PostCommitHooks, SqliteChunkSink};
use crate::store::{Store, UpsertOutcome};

/// Aggregate result of one orchestrator run.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub ok: bool,
    pub processed: u64,
    pub inserted_new: u64,
    pub updated_existing: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_items_this_run: Option<u64>,
    pub details: Vec<Detail>,
}

impl Default for ImportResult {
    fn default() -> Self {
        Self {
            ok: true,
            processed: 0,
            inserted_new: 0,
            updated_existing: 0,
            unique_items_this_run: None,
            details: Vec::new(),
        }
    }
}

impl ImportResult {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        self.processed += 1;
        match outcome {
            UpsertOutcome::Inserted => self.inserted_new += 1,
            UpsertOutcome::Updated => self.updated_existing += 1,
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &Detail> {
        self.details.iter().filter(|d| d.error.is_some())
    }
}

/// One entry of a run's detail list: either a per-course count or an error
/// with enough context to find the failing course or item.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Detail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Detail {
    pub fn count(course_id: i64, count: u64) -> Self {
        Self {
            course_id: Some(course_id),
            item_id: None,
            count: Some(count),
            code: None,
            error: None,
        }
    }

    pub fn error(course_id: Option<i64>, item_id: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            course_id,
            item_id,
            count: None,
            code: None,
            error: Some(message.into()),
        }
    }

    /// Error entry for a failed Canvas request. A rejected credential keeps
    /// the `auth_failure` code so callers can tell it from other failures.
    pub fn fetch(course_id: Option<i64>, item_id: Option<i64>, e: &FetchError) -> Self {
        Self {
            code: e.is_auth_failure().then_some("auth_failure"),
            ..Self::error(course_id, item_id, e.to_string())
        }
    }
}

/// Cheap authenticated endpoint used to check the credential at startup.
pub const PROBE_PATH: &str = "/api/v1/users/self";

/// Everything an orchestrator needs besides the user id.
#[derive(Clone)]
pub struct ImportContext {
    pub config: Config,
    pub store: Store,
    pub sessions: Arc<dyn SessionResolver>,
    pub hooks: PostCommitHooks,
}

impl ImportContext {
    /// Context over one pool, resolving sessions from `canvas_sessions` and
    /// registering the SQLite chunk sink when `[index] enabled`.
    pub fn new(config: Config, pool: SqlitePool) -> Self {
        let mut hooks = PostCommitHooks::new();
        if config.index.enabled {
            hooks.register(Arc::new(SqliteChunkSink::new(
                pool.clone(),
                config.index.max_tokens,
            )));
        }
        Self {
            sessions: Arc::new(SqliteSessions::new(pool.clone())),
            store: Store::new(pool),
            config,
            hooks,
        }
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionResolver>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_hooks(mut self, hooks: PostCommitHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        self.store.pool()
    }

    /// Shared run startup: validate the user, resolve the session, build
    /// the client for it, and under strict auth check the credential.
    pub(crate) async fn start(&self, user_id: &str) -> ImportOutcome<CanvasClient> {
        if user_id.trim().is_empty() {
            return Err(ImportError::InvalidInput("user id is required".to_string()));
        }

        let session = self
            .sessions
            .latest_session(user_id)
            .await?
            .ok_or_else(|| ImportError::NoSession {
                user_id: user_id.to_string(),
            })?;
        if session.cookie_value.trim().is_empty() {
            return Err(ImportError::InvalidInput(
                "stored Canvas session has an empty credential".to_string(),
            ));
        }

        let client = CanvasClient::new(&session.base_url, &session.cookie_value, &self.config.canvas)
            .map_err(startup_error)?;
        if self.config.canvas.strict_auth {
            match client.single_fetch(PROBE_PATH).await {
                Ok(_) => {}
                Err(e) if e.is_auth_failure() => return Err(ImportError::Auth(e)),
                Err(e) => debug!(user_id, error = %e, "credential probe inconclusive"),
            }
        }

        self.store.ensure_user(user_id).await?;
        Ok(client)
    }

    /// Stamp the endpoint's cursor. A failure here is logged only.
    pub(crate) async fn finish(&self, user_id: &str, client: &CanvasClient, endpoint: &str) {
        if let Err(e) = set_cursor(self.pool(), user_id, client.base_url(), endpoint, None).await {
            warn!(user_id, endpoint, error = %e, "failed to record sync cursor");
        }
    }
}

fn startup_error(e: FetchError) -> ImportError {
    match e {
        FetchError::InvalidUrl(msg) => ImportError::InvalidInput(msg),
        FetchError::InvalidConfig(msg) => ImportError::InvalidInput(format!("configuration: {}", msg)),
        other => ImportError::Auth(other),
    }
}

/// Known course ids for the user. When none are stored yet, the active
/// course list is fetched from Canvas and stored first.
pub(crate) async fn resolve_course_ids(
    ctx: &ImportContext,
    client: &CanvasClient,
    user_id: &str,
    result: &mut ImportResult,
) -> ImportOutcome<Vec<i64>> {
    let known = ctx.store.course_ids(user_id).await?;
    if !known.is_empty() {
        return Ok(known);
    }

    let listing = match client.paged_fetch(courses::COURSES_PATH).await {
        Ok(listing) => listing,
        Err(e) => {
            warn!(user_id, error = %e, "course discovery failed");
            result.details.push(Detail::fetch(None, None, &e));
            return Ok(Vec::new());
        }
    };

    let mut ids = Vec::new();
    for raw in &listing {
        if CourseRecord::is_restricted(raw) {
            continue;
        }
        let Some(course) = CourseRecord::from_canvas(raw) else {
            continue;
        };
        match ctx.store.upsert_course(user_id, &course).await {
            Ok(_) => {
                ctx.hooks.run(&IndexDocument::course(user_id, &course)).await;
                ids.push(course.canvas_id);
            }
            Err(e) => {
                warn!(user_id, course_id = course.canvas_id, error = %e, "course upsert failed");
                result
                    .details
                    .push(Detail::error(Some(course.canvas_id), None, e.to_string()));
            }
        }
    }
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

/// Outcome of one orchestrator inside [`run_all`].
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum StageOutcome {
    Completed(ImportResult),
    Failed(serde_json::Value),
}

/// Run every orchestrator in dependency order: courses, assignments,
/// grades, announcements, then pages and files.
///
/// A startup failure of the courses stage is returned as is. Later stages
/// that fail are recorded under their name and the remaining stages still
/// run.
pub async fn run_all(
    ctx: &ImportContext,
    user_id: &str,
) -> ImportOutcome<BTreeMap<&'static str, StageOutcome>> {
    let mut out = BTreeMap::new();
    out.insert(
        "courses",
        StageOutcome::Completed(courses::import_courses(ctx, user_id).await?),
    );

    let stages = [
        ("assignments", assignments::import_assignments(ctx, user_id).await),
        ("grades", grades::import_grades(ctx, user_id).await),
        ("announcements", announcements::import_announcements(ctx, user_id).await),
        ("content", content::import_content(ctx, user_id).await),
    ];
    for (name, outcome) in stages {
        let stage = match outcome {
            Ok(result) => StageOutcome::Completed(result),
            Err(e) => {
                warn!(user_id, stage = name, error = %e, "import stage failed");
                StageOutcome::Failed(e.to_json())
            }
        };
        out.insert(name, stage);
    }
    Ok(out)
}
