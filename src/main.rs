//! # DuNorth Sync CLI (`dunorth`)
//!
//! ```bash
//! dunorth --config ./config/dunorth.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dunorth init` | Create the SQLite database and run schema migrations |
//! | `dunorth session set` | Store a Canvas session for a user |
//! | `dunorth sync <entity> --user <id>` | Run an import and print its JSON result |
//! | `dunorth cursor list --user <id>` | Show the user's sync cursors |
//!
//! Results go to stdout as JSON; logs go to stderr and honor `RUST_LOG`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use dunorth_sync::config::{self, Config};
use dunorth_sync::cursor::list_cursors;
use dunorth_sync::error::ImportOutcome;
use dunorth_sync::import::{
    announcements, assignments, content, courses, grades, run_all, ImportContext,
};
use dunorth_sync::session::save_session;
use dunorth_sync::{db, migrate};

#[derive(Parser)]
#[command(
    name = "dunorth",
    about = "DuNorth Canvas sync: import courses, assignments, grades, announcements, pages and files",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dunorth.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Manage stored Canvas sessions.
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Import one entity kind, or everything, for a user.
    Sync {
        entity: Entity,

        #[arg(long)]
        user: String,
    },

    /// Inspect sync cursors.
    Cursor {
        #[command(subcommand)]
        action: CursorAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Store or refresh the session for a user and Canvas host.
    Set {
        #[arg(long)]
        user: String,

        /// Canvas base URL, e.g. `https://school.instructure.com`.
        #[arg(long)]
        base_url: String,

        /// Session cookie or access token value.
        #[arg(long)]
        cookie: String,

        /// RFC 3339 expiry.
        #[arg(long)]
        expires_at: Option<String>,
    },
}

#[derive(Subcommand)]
enum CursorAction {
    List {
        #[arg(long)]
        user: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Entity {
    Courses,
    Assignments,
    Grades,
    Announcements,
    Content,
    All,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Session {
            action:
                SessionAction::Set {
                    user,
                    base_url,
                    cookie,
                    expires_at,
                },
        } => {
            if let Some(exp) = &expires_at {
                chrono::DateTime::parse_from_rfc3339(exp)
                    .map_err(|e| anyhow::anyhow!("--expires-at must be RFC 3339: {}", e))?;
            }
            let pool = db::connect(&cfg).await?;
            migrate::apply(&pool).await?;
            save_session(&pool, &user, &base_url, &cookie, expires_at.as_deref()).await?;
            println!("Session stored for {}.", user);
        }
        Commands::Sync { entity, user } => {
            let ok = run_sync(cfg, entity, &user).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Cursor {
            action: CursorAction::List { user },
        } => {
            let pool = db::connect(&cfg).await?;
            let cursors: Vec<_> = list_cursors(&pool, &user)
                .await?
                .into_iter()
                .map(|(base_url, cursor)| {
                    json!({
                        "baseUrl": base_url,
                        "endpoint": cursor.endpoint,
                        "etag": cursor.etag,
                        "lastSync": cursor.last_sync,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&cursors)?);
        }
    }

    Ok(())
}

/// Print the run's JSON result. Returns false when the run could not start.
async fn run_sync(cfg: Config, entity: Entity, user: &str) -> anyhow::Result<bool> {
    let pool = db::connect(&cfg).await?;
    migrate::apply(&pool).await?;
    let ctx = ImportContext::new(cfg, pool);

    let outcome: ImportOutcome<serde_json::Value> = match entity {
        Entity::Courses => courses::import_courses(&ctx, user).await.map(|r| json!(r)),
        Entity::Assignments => assignments::import_assignments(&ctx, user)
            .await
            .map(|r| json!(r)),
        Entity::Grades => grades::import_grades(&ctx, user).await.map(|r| json!(r)),
        Entity::Announcements => announcements::import_announcements(&ctx, user)
            .await
            .map(|r| json!(r)),
        Entity::Content => content::import_content(&ctx, user).await.map(|r| json!(r)),
        Entity::All => run_all(&ctx, user).await.map(|r| json!(r)),
    };

    let (value, ok) = match outcome {
        Ok(value) => (value, true),
        Err(e) => (e.to_json(), false),
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(ok)
}
