//! Snapshot and compare workflows.
//!
//! ```text
//! Idle ──▶ MatrixBuilt ──▶ Processing ──▶ Finalizing ──▶ Done
//!                            │
//!                            └─ up to `concurrency` posters in flight:
//!                               snapshot: fetch ─▶ resize ─▶ store baseline
//!                               compare:  fetch ┐
//!                                         baseline ┴▶ resize ─▶ diff ─▶ upload diff image
//! ```
//!
//! A failing poster is logged and counted; the run continues. A fatal
//! poster error (rejected storage credentials) stops new posters from
//! starting and the run returns [`SnapshotError::Aborted`] without a report.
//! Results are collected by a single writer after the stream drains, so the
//! report order never depends on completion order.

use crate::config::RunConfig;
use crate::error::{PosterError, SnapshotError};
use crate::matrix;
use crate::matrix::geo::PixelDimensions;
use crate::output::{DiffRecord, PosterFailure, RunReport, RunSummary, Workflow};
use crate::pipeline::diff::{self, DiffOptions, DiffOutcome};
use crate::pipeline::fetch::Fetcher;
use crate::pipeline::normalize::{decode_png, png_dimensions, resize_bounded, resize_exact};
use crate::poster::PosterDescriptor;
use crate::progress::{NoopProgress, PosterProgress};
use crate::report::{self, ReportOptions};
use crate::store::{self, BaselineStore, ObjectStore};
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Name of the report inside the run's temp prefix.
pub const REPORT_FILE_NAME: &str = "report.html";

/// Lifecycle of one orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    MatrixBuilt,
    Processing,
    Finalizing,
    Done,
}

/// Outcome of one poster inside the processing stage.
enum PosterOutcome<T> {
    Done(T),
    Failed(PosterError),
    /// Not started because the run was aborting.
    Skipped,
}

/// Drives a snapshot or compare run over the poster matrix.
pub struct Orchestrator {
    config: RunConfig,
    fetcher: Fetcher,
    baselines: BaselineStore,
    state: RunState,
}

impl Orchestrator {
    /// Orchestrator writing to `objects`.
    pub fn new(config: RunConfig, objects: Arc<dyn ObjectStore>) -> Result<Self, SnapshotError> {
        let fetcher = Fetcher::new(&config)?;
        let baselines = BaselineStore::new(objects, config.baseline_retry, &config.build_id);
        Ok(Self {
            config,
            fetcher,
            baselines,
            state: RunState::Idle,
        })
    }

    /// Orchestrator writing to the store selected by `config.target`.
    pub fn from_config(config: RunConfig) -> Result<Self, SnapshotError> {
        let objects = store::from_config(&config)?;
        Self::new(config, objects)
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// The filtered matrix this run will process.
    pub fn posters(&self) -> Result<Vec<PosterDescriptor>, SnapshotError> {
        matrix::generate_all(&self.config.services, &self.config.matrix, &self.config.only)
    }

    /// Fetch every poster and overwrite its baseline.
    pub async fn snapshot(&mut self) -> Result<RunSummary, SnapshotError> {
        let started = Instant::now();
        let posters = self.build_matrix()?;
        info!(
            "Snapshotting {} posters to {} (concurrency {})",
            posters.len(),
            self.baselines.location(""),
            self.config.concurrency
        );

        self.transition(RunState::Processing);
        let this = &*self;
        let outcomes = this.process(&posters, |p| this.snapshot_one(p)).await;

        self.transition(RunState::Finalizing);
        let (summary, _) = self.collect(Workflow::Snapshot, &posters, outcomes)?;
        Ok(self.finish(summary, started))
    }

    /// Fetch every poster, diff it against its baseline and publish a
    /// report when anything differs.
    pub async fn compare(&mut self) -> Result<RunSummary, SnapshotError> {
        let started = Instant::now();
        let posters = self.build_matrix()?;
        info!(
            "Comparing {} posters against {} (concurrency {})",
            posters.len(),
            self.baselines.location(""),
            self.config.concurrency
        );

        self.transition(RunState::Processing);
        let this = &*self;
        let outcomes = this.process(&posters, |p| this.compare_one(p)).await;

        self.transition(RunState::Finalizing);
        let (mut summary, records) = self.collect(Workflow::Compare, &posters, outcomes)?;

        let report = RunReport::new(records, &self.config.build_id, self.baselines.temp_prefix());
        if report.has_differences() {
            let location = self.upload_report(&report).await?;
            info!("Report uploaded to {}", location);
            summary.report_location = Some(location);
        } else {
            info!("No differences, no report uploaded");
        }
        summary.records = report.records;

        Ok(self.finish(summary, started))
    }

    // ── Stages ───────────────────────────────────────────────────────────

    fn build_matrix(&mut self) -> Result<Vec<PosterDescriptor>, SnapshotError> {
        self.state = RunState::Idle;
        let posters = self.posters()?;
        self.transition(RunState::MatrixBuilt);
        Ok(posters)
    }

    fn transition(&mut self, next: RunState) {
        debug!("Run state {:?} → {:?}", self.state, next);
        self.state = next;
    }

    /// Run `work` over `posters` with bounded concurrency.
    ///
    /// Outcomes come back in matrix order.
    async fn process<'p, T, F, Fut>(
        &self,
        posters: &'p [PosterDescriptor],
        work: F,
    ) -> Vec<PosterOutcome<T>>
    where
        F: Fn(&'p PosterDescriptor) -> Fut,
        Fut: Future<Output = Result<T, PosterError>>,
    {
        let total = posters.len();
        let progress: &dyn PosterProgress = self
            .config
            .progress_callback
            .as_deref()
            .unwrap_or(&NoopProgress);
        progress.on_run_start(total);

        let aborting = AtomicBool::new(false);
        let aborting = &aborting;
        let work = &work;

        let mut outcomes: Vec<(usize, PosterOutcome<T>)> =
            stream::iter(posters.iter().enumerate().map(|(index, poster)| async move {
                if aborting.load(Ordering::SeqCst) {
                    return (index, PosterOutcome::Skipped);
                }
                let key = poster.storage_key();
                progress.on_poster_start(&key, index, total);

                match work(poster).await {
                    Ok(value) => {
                        progress.on_poster_complete(&key, index, total);
                        (index, PosterOutcome::Done(value))
                    }
                    Err(e) => {
                        if e.is_fatal() {
                            error!("{}: {}; aborting run", key, e);
                            aborting.store(true, Ordering::SeqCst);
                        } else {
                            warn!("{} failed: {}", key, e);
                        }
                        progress.on_poster_error(&key, index, total, &e.to_string());
                        (index, PosterOutcome::Failed(e))
                    }
                }
            }))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        outcomes.sort_by_key(|(index, _)| *index);
        let outcomes: Vec<PosterOutcome<T>> = outcomes.into_iter().map(|(_, o)| o).collect();

        let succeeded = outcomes
            .iter()
            .filter(|o| matches!(o, PosterOutcome::Done(_)))
            .count();
        progress.on_run_complete(total, succeeded);
        outcomes
    }

    async fn snapshot_one(&self, poster: &PosterDescriptor) -> Result<String, PosterError> {
        let fetched = self.fetcher.fetch(poster).await?;

        let png = if self.config.originals {
            fetched.bytes
        } else {
            let max = self.config.max_dimension;
            let bytes = fetched.bytes;
            tokio::task::spawn_blocking(move || resize_bounded(&bytes, max))
                .await
                .map_err(|e| PosterError::Task(e.to_string()))??
        };

        self.baselines.store(poster, png).await
    }

    async fn compare_one(&self, poster: &PosterDescriptor) -> Result<DiffRecord, PosterError> {
        let (render, baseline) = tokio::join!(
            self.fetcher.fetch(poster),
            self.baselines.retrieve(poster)
        );
        let render = render?;
        let baseline = baseline?;

        let max = self.config.max_dimension;
        let review_max = self.config.review_max_dimension;
        let options = self.config.diff;
        let (render_png, baseline_png) = (render.bytes, baseline.bytes);
        let compared = tokio::task::spawn_blocking(move || {
            compare_images(&render_png, &baseline_png, max, review_max, options)
        })
        .await
        .map_err(|e| PosterError::Task(e.to_string()))??;

        let outcome = compared.outcome;
        debug!(
            "{}: {} of {} pixels differ",
            poster.storage_key(),
            outcome.difference_count,
            outcome.total_pixels
        );

        let mut record = DiffRecord {
            descriptor: poster.clone(),
            difference_count: outcome.difference_count,
            total_pixels: outcome.total_pixels,
            passed: outcome.passed,
            diff_image_ref: None,
            diff_image_location: None,
            diff_dimensions: PixelDimensions {
                width: outcome.width,
                height: outcome.height,
            },
            review_dimensions: None,
            render_source: render.source,
            baseline_source: baseline.source,
            baseline_origin: baseline.origin,
        };

        if let Some((png, dims)) = compared.review {
            let name = poster.storage_key();
            let location = self
                .baselines
                .store_report_artifact(&name, png, "image/png")
                .await?;
            record.diff_image_ref = Some(name);
            record.diff_image_location = Some(location);
            record.review_dimensions = Some(dims);
        }

        Ok(record)
    }

    /// Fold outcomes into a summary. Returns the diff records of `Done`
    /// outcomes, or `Aborted` when a fatal error cut the run short.
    fn collect<T>(
        &self,
        workflow: Workflow,
        posters: &[PosterDescriptor],
        outcomes: Vec<PosterOutcome<T>>,
    ) -> Result<(RunSummary, Vec<T>), SnapshotError> {
        let mut summary = RunSummary::new(workflow, &self.config.build_id);
        let mut values = Vec::new();
        let mut fatal: Option<String> = None;
        let mut skipped = 0;

        for (poster, outcome) in posters.iter().zip(outcomes) {
            match outcome {
                PosterOutcome::Done(value) => {
                    summary.record_success(poster.service);
                    values.push(value);
                }
                PosterOutcome::Failed(error) => {
                    if error.is_fatal() && fatal.is_none() {
                        fatal = Some(error.to_string());
                    }
                    summary.record_failure(PosterFailure {
                        storage_key: poster.storage_key(),
                        service: poster.service,
                        url: self.fetcher.url_for(poster).to_string(),
                        error,
                    });
                }
                PosterOutcome::Skipped => skipped += 1,
            }
        }

        if let Some(reason) = fatal {
            return Err(SnapshotError::Aborted {
                completed: summary.total,
                total: summary.total + skipped,
                reason,
            });
        }
        Ok((summary, values))
    }

    async fn upload_report(&self, report: &RunReport) -> Result<String, SnapshotError> {
        let options = ReportOptions {
            preview_base_url: self.config.preview_base_url.clone(),
            max_image_dimension: self.config.review_max_dimension,
        };
        let html = report::build(report, &options);

        self.baselines
            .store_report_artifact(REPORT_FILE_NAME, html, "text/html; charset=utf-8")
            .await
            .map_err(|e| SnapshotError::ReportUpload {
                key: format!("{}{}", self.baselines.temp_prefix(), REPORT_FILE_NAME),
                reason: e.to_string(),
            })
    }

    fn finish(&mut self, mut summary: RunSummary, started: Instant) -> RunSummary {
        summary.duration_ms = started.elapsed().as_millis() as u64;
        self.transition(RunState::Done);
        info!(
            "{:?} finished: {}/{} posters succeeded in {}ms",
            summary.workflow, summary.succeeded, summary.total, summary.duration_ms
        );
        summary
    }
}

/// Diff result plus the review-size diff image when anything differs.
struct Compared {
    outcome: DiffOutcome,
    review: Option<(Vec<u8>, PixelDimensions)>,
}

/// Bring both images to `max_dimension`, force the baseline to the
/// render's size if they still disagree, then diff. Blocking.
fn compare_images(
    render_png: &[u8],
    baseline_png: &[u8],
    max_dimension: u32,
    review_max_dimension: u32,
    options: DiffOptions,
) -> Result<Compared, PosterError> {
    let current = decode_png(&resize_bounded(render_png, max_dimension)?)?;
    let mut baseline = decode_png(&resize_bounded(baseline_png, max_dimension)?)?;

    if (baseline.width(), baseline.height()) != (current.width(), current.height()) {
        debug!(
            "Baseline is {}x{}, render is {}x{}; resizing baseline",
            baseline.width(),
            baseline.height(),
            current.width(),
            current.height()
        );
        baseline = resize_exact(&baseline, current.width(), current.height());
    }

    let outcome = diff::diff(&baseline, &current, options)?;

    let review = if outcome.difference_count > 0 {
        let png = resize_bounded(&outcome.diff_image, review_max_dimension)?;
        let (width, height) = png_dimensions(&png)?;
        Some((png, PixelDimensions { width, height }))
    } else {
        None
    };

    Ok(Compared { outcome, review })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::normalize::encode_png;
    use image::{DynamicImage, Rgb, RgbImage};

    fn solid(width: u32, height: u32, value: u8) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([value, value, value]));
        encode_png(&DynamicImage::ImageRgb8(img)).unwrap()
    }

    #[test]
    fn identical_images_have_no_review_copy() {
        let png = solid(40, 30, 200);
        let c = compare_images(&png, &png, 2000, 1200, DiffOptions::default()).unwrap();
        assert_eq!(c.outcome.difference_count, 0);
        assert!(c.review.is_none());
    }

    #[test]
    fn baseline_is_resized_to_render_size() {
        let render = solid(40, 30, 0);
        let baseline = solid(80, 60, 255);
        let c = compare_images(&render, &baseline, 2000, 1200, DiffOptions::default()).unwrap();
        assert_eq!((c.outcome.width, c.outcome.height), (40, 30));
        assert_eq!(c.outcome.difference_count, 1200);
    }

    #[test]
    fn review_copy_is_bounded() {
        let render = solid(400, 200, 0);
        let baseline = solid(400, 200, 255);
        let c = compare_images(&render, &baseline, 2000, 100, DiffOptions::default()).unwrap();
        let (_, dims) = c.review.unwrap();
        assert_eq!((dims.width, dims.height), (100, 50));
    }

    #[test]
    fn both_sides_are_bounded_before_diffing() {
        let render = solid(300, 150, 10);
        let baseline = solid(300, 150, 10);
        let c = compare_images(&render, &baseline, 100, 100, DiffOptions::default()).unwrap();
        assert_eq!((c.outcome.width, c.outcome.height), (100, 50));
    }
}
