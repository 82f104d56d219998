//! Error types for the poster-snapshot library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`SnapshotError`] is **fatal**: the run cannot proceed at all (unknown
//!   service or location in the matrix definition, bad configuration, the
//!   final report could not be uploaded). Returned as `Err(SnapshotError)`
//!   from the top-level [`crate::orchestrator::Orchestrator`] workflows.
//!
//! * [`PosterError`] is **non-fatal**: a single poster failed (flaky render
//!   service, wrong content type, rasterisation glitch) but every other poster
//!   is fine. Caught at the per-poster task boundary, logged and counted in
//!   [`crate::output::RunSummary`].
//!
//! A few poster errors are still fatal for the whole run (a storage write
//! rejected for credentials will fail for every poster); those are reported
//! by [`PosterError::is_fatal`] and turn into [`SnapshotError::Aborted`].

use crate::poster::PosterFormat;
use thiserror::Error;

/// All fatal errors returned by the poster-snapshot library.
#[derive(Debug, Error)]
pub enum SnapshotError {
    // ── Matrix definition errors ──────────────────────────────────────────
    /// Service name is not one of the known rendering services.
    #[error("Unknown service '{name}'\nKnown services: render, render-map, tile, placement, test-report")]
    UnknownService { name: String },

    /// A location id referenced by the matrix is missing from the catalog.
    #[error("Location not found with id: '{id}'")]
    UnknownLocation { id: String },

    /// Size token is neither a named paper size nor `<W>x<H>(cm|inch)`.
    #[error("Size should be a named paper size or match <W>x<H>(cm|inch), got '{size}'")]
    InvalidSizeFormat { size: String },

    /// An `only` filter pattern could not be parsed.
    #[error("Invalid filter '{pattern}': {reason}")]
    InvalidFilter { pattern: String, reason: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Finalizing errors ─────────────────────────────────────────────────
    /// The report or one of its artifacts could not be uploaded.
    #[error("Failed to upload report artifact '{key}': {reason}")]
    ReportUpload { key: String, reason: String },

    /// A poster hit a non-recoverable condition and the run was cancelled.
    #[error("Run aborted after {completed}/{total} posters: {reason}")]
    Aborted {
        completed: usize,
        total: usize,
        reason: String,
    },

    // ── Key migration errors ──────────────────────────────────────────────
    /// Listing, copying or deleting an object during a key migration failed,
    /// or the rename rule would make two objects collide.
    #[error("Key migration failed at '{key}': {reason}")]
    KeyMigration { key: String, reason: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SnapshotError {
    /// `true` for errors that mean the matrix definition itself is wrong.
    ///
    /// These abort the run before any network I/O starts.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SnapshotError::UnknownService { .. }
                | SnapshotError::UnknownLocation { .. }
                | SnapshotError::InvalidSizeFormat { .. }
                | SnapshotError::InvalidFilter { .. }
                | SnapshotError::InvalidConfig(_)
        )
    }
}

/// A non-fatal error for a single poster.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PosterError {
    /// Network failure, timeout or 4xx/5xx response from a rendering service.
    #[error("Fetching '{url}' failed: {reason}")]
    TransientFetch {
        url: String,
        status: Option<u16>,
        reason: String,
    },

    /// The object store has nothing under this key.
    #[error("No object stored under '{key}'")]
    NotFound { key: String },

    /// Service answered with content that is not the format we asked for.
    #[error("Requested {declared} but the response looks like {detected}")]
    FormatMismatch {
        declared: PosterFormat,
        detected: String,
    },

    /// Rasterising an SVG or PDF response failed.
    #[error("Converting {format} to PNG failed: {detail}")]
    Conversion { format: PosterFormat, detail: String },

    /// Decoding, resizing or encoding a raster image failed.
    #[error("Image processing failed: {0}")]
    Image(String),

    /// Object-store read or write failed.
    #[error("Storage error for '{key}': {reason}")]
    Storage { key: String, reason: String },

    /// Object store rejected our credentials; every later write would fail too.
    #[error("Storage rejected credentials for '{key}' (HTTP {status})")]
    StorageCredentials { key: String, status: u16 },

    /// Task could not be joined (panicked or cancelled).
    #[error("Poster task failed: {0}")]
    Task(String),
}

impl PosterError {
    /// Whether a retry policy may try the same call again.
    ///
    /// Conversion and format errors are permanent: the service already
    /// answered and asking again returns the same bytes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PosterError::TransientFetch { .. } | PosterError::Storage { .. }
        )
    }

    /// Whether this error must cancel the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PosterError::StorageCredentials { .. })
    }
}

impl From<image::ImageError> for PosterError {
    fn from(e: image::ImageError) -> Self {
        PosterError::Image(e.to_string())
    }
}
