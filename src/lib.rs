//! # poster-snapshot
//!
//! Visual regression testing for map-poster rendering services.
//!
//! A fixed matrix of poster parameter combinations is rendered by the
//! services under test. `snapshot` stores the results as baselines; `compare`
//! renders the same matrix again, diffs every poster against its baseline
//! and publishes an HTML report of everything that changed.
//!
//! ## Pipeline Overview
//!
//! ```text
//! services
//!  │
//!  ├─ 1. Matrix     axis groups × locations, `only` filter
//!  ├─ 2. Fetch      HTTP with retry/backoff, bounded concurrency
//!  ├─ 3. Normalize  png/jpg/svg/pdf → png (image, resvg, pdfium)
//!  ├─ 4. Baseline   store (snapshot) or retrieve with placeholder (compare)
//!  ├─ 5. Diff       pixel count + red overlay
//!  └─ 6. Report     report.html + diff images under temp/{build_id}/
//! ```
//!
//! When the key layout changes, [`migrate`] renames stored baselines in
//! place (copy, then delete).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use poster_snapshot::{Orchestrator, RunConfig, Service, Target};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RunConfig::builder()
//!         .services(vec![Service::Tile])
//!         .target(Target::Local)
//!         .snapshot_dir("images")
//!         .build()?;
//!     let summary = Orchestrator::from_config(config)?.compare().await?;
//!     println!("{} of {} posters differ", summary.differing_count(), summary.total);
//!     if let Some(report) = summary.report_location {
//!         println!("report: {}", report);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `poster-snapshot` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! PDF posters are rasterised with pdfium, loaded at runtime from
//! `PDFIUM_LIB_PATH`, the working directory or the system library path.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod matrix;
pub mod migrate;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod poster;
pub mod progress;
pub mod report;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{RunConfig, RunConfigBuilder, ServiceEndpoints, StorageSettings, Target};
pub use error::{PosterError, SnapshotError};
pub use matrix::{generate, generate_all, MatrixOptions, PosterFilter};
pub use migrate::{KeyMigration, KeyMove, KeyRename, MigrationSummary};
pub use orchestrator::{Orchestrator, RunState};
pub use output::{DiffRecord, RunReport, RunSummary, ServiceSummary, Workflow};
pub use pipeline::diff::DiffOptions;
pub use pipeline::retry::RetryPolicy;
pub use poster::{Orientation, PosterDescriptor, PosterFormat, Service};
pub use progress::{NoopProgress, PosterProgress, ProgressCallback};
pub use store::{BaselineStore, HttpObjectStore, LocalStore, MemoryStore, ObjectStore};
