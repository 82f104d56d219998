//! Progress-callback trait for per-poster events.
//!
//! Inject an [`Arc<dyn PosterProgress>`] via
//! [`crate::config::RunConfigBuilder::progress_callback`] to receive events
//! as the orchestrator works through the matrix. The binary drives an
//! `indicatif` bar from it; tests count events.
//!
//! # Example
//!
//! ```rust
//! use poster_snapshot::{PosterProgress, RunConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl PosterProgress for Counter {
//!     fn on_poster_complete(&self, key: &str, index: usize, total: usize) {
//!         let done = self.0.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{key}: {done}/{total}");
//!     }
//! }
//!
//! let config = RunConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the orchestrator as it processes each poster.
///
/// Posters are processed concurrently, so the per-poster methods may be
/// called from several tasks at once. All methods default to no-ops.
pub trait PosterProgress: Send + Sync {
    /// Once, after the matrix is built and before any request is sent.
    fn on_run_start(&self, total_posters: usize) {
        let _ = total_posters;
    }

    /// Just before the poster is fetched. `index` is its 0-based matrix position.
    fn on_poster_start(&self, key: &str, index: usize, total: usize) {
        let _ = (key, index, total);
    }

    /// The poster was stored (snapshot) or diffed (compare).
    fn on_poster_complete(&self, key: &str, index: usize, total: usize) {
        let _ = (key, index, total);
    }

    /// The poster failed after all retries.
    fn on_poster_error(&self, key: &str, index: usize, total: usize, error: &str) {
        let _ = (key, index, total, error);
    }

    /// Once, after every poster was attempted.
    fn on_run_complete(&self, total_posters: usize, succeeded: usize) {
        let _ = (total_posters, succeeded);
    }
}

/// Default when no callback is configured.
pub struct NoopProgress;

impl PosterProgress for NoopProgress {}

/// Type stored in [`crate::config::RunConfig`].
pub type ProgressCallback = Arc<dyn PosterProgress>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        succeeded: AtomicUsize,
    }

    impl PosterProgress for Tracking {
        fn on_poster_start(&self, _key: &str, _index: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_poster_complete(&self, _key: &str, _index: usize, _total: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_poster_error(&self, _key: &str, _index: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_run_complete(&self, _total: usize, succeeded: usize) {
            self.succeeded.store(succeeded, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_does_not_panic() {
        let cb: ProgressCallback = Arc::new(NoopProgress);
        cb.on_run_start(3);
        cb.on_poster_start("a.png", 0, 3);
        cb.on_poster_error("a.png", 0, 3, "HTTP 502");
        cb.on_run_complete(3, 2);
    }

    #[test]
    fn tracking_receives_events() {
        let t = Tracking::default();
        t.on_poster_start("a.png", 0, 2);
        t.on_poster_complete("a.png", 0, 2);
        t.on_poster_start("b.png", 1, 2);
        t.on_poster_error("b.png", 1, 2, "timeout");
        t.on_run_complete(2, 1);

        assert_eq!(t.starts.load(Ordering::SeqCst), 2);
        assert_eq!(t.completes.load(Ordering::SeqCst), 1);
        assert_eq!(t.errors.load(Ordering::SeqCst), 1);
        assert_eq!(t.succeeded.load(Ordering::SeqCst), 1);
    }
}
