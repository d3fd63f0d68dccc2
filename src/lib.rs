//! # DuNorth Sync
//!
//! Canvas LMS ingestion for DuNorth. Pages through the Canvas REST API on a
//! student's behalf, normalizes courses, assignments, submissions, pages,
//! files, and announcements into SQLite with idempotent upserts, extracts
//! plain text from course documents, and feeds a local retrieval index.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌────────────┐   ┌──────────┐
//! │ Session  │──▶│ CanvasClient│──▶│ Orchestrator│──▶│  Store   │
//! │ Resolver │   │ auth+paging │   │  per entity │   │ (SQLite) │
//! └──────────┘   └─────────────┘   └─────┬──────┘   └────┬─────┘
//!                                        │               │
//!                                        ▼               ▼
//!                                  ┌──────────┐   ┌─────────────┐
//!                                  │ Extract  │   │ Post-commit │
//!                                  │ PDF/OOXML│   │ index hooks │
//!                                  └──────────┘   └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dunorth init
//! dunorth session set --user u1 --base-url https://school.instructure.com --cookie "$COOKIE"
//! dunorth sync all --user u1
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`error`] | Fetch and import error types |
//! | [`models`] | Normalized Canvas records |
//! | [`canvas`] | Canvas HTTP client |
//! | [`extract`] | Document text extraction |
//! | [`store`] | Entity upserts |
//! | [`session`] | Stored Canvas sessions |
//! | [`cursor`] | Per-endpoint sync cursors |
//! | [`chunk`] | Text chunking |
//! | [`sink`] | Retrieval-index sinks and post-commit hooks |
//! | [`import`] | Import orchestrators |

pub mod canvas;
pub mod chunk;
pub mod config;
pub mod cursor;
pub mod db;
pub mod error;
pub mod extract;
pub mod import;
pub mod migrate;
pub mod models;
pub mod session;
pub mod sink;
pub mod store;
