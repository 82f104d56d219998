//! Results of a run.
//!
//! [`DiffRecord`]s are produced one per compared poster and collected into a
//! [`RunReport`], which is the only input of the report builder. Every run,
//! snapshot or compare, also yields a [`RunSummary`] with per-service counts.

use crate::error::PosterError;
use crate::matrix::geo::PixelDimensions;
use crate::pipeline::fetch::FetchOrigin;
use crate::poster::{PosterDescriptor, Service};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Outcome of comparing one poster against its baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffRecord {
    pub descriptor: PosterDescriptor,
    pub difference_count: u64,
    pub total_pixels: u64,
    /// Within the configured threshold.
    pub passed: bool,
    /// Storage key of the uploaded diff image; only set when
    /// `difference_count > 0`.
    pub diff_image_ref: Option<String>,
    /// Public location of the diff image.
    pub diff_image_location: Option<String>,
    /// Size the two images were compared at.
    pub diff_dimensions: PixelDimensions,
    /// Size of the uploaded review copy of the diff image.
    pub review_dimensions: Option<PixelDimensions>,
    pub render_source: String,
    pub baseline_source: String,
    pub baseline_origin: FetchOrigin,
}

impl DiffRecord {
    /// Differing share of the image, `0.0..=1.0`.
    pub fn severity(&self) -> f64 {
        if self.total_pixels == 0 {
            0.0
        } else {
            self.difference_count as f64 / self.total_pixels as f64
        }
    }

    pub fn storage_key(&self) -> String {
        self.descriptor.storage_key()
    }

    /// Most severe first; storage key breaks ties so order never depends
    /// on processing order.
    pub fn severity_order(a: &DiffRecord, b: &DiffRecord) -> Ordering {
        b.severity()
            .total_cmp(&a.severity())
            .then_with(|| b.difference_count.cmp(&a.difference_count))
            .then_with(|| a.storage_key().cmp(&b.storage_key()))
    }
}

/// Everything the report builder needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Sorted with [`DiffRecord::severity_order`].
    pub records: Vec<DiffRecord>,
    pub generated_at: DateTime<Utc>,
    pub build_id: String,
    /// `temp/{build_id}/`
    pub temp_prefix: String,
}

impl RunReport {
    pub fn new(mut records: Vec<DiffRecord>, build_id: &str, temp_prefix: &str) -> Self {
        records.sort_by(DiffRecord::severity_order);
        Self {
            records,
            generated_at: Utc::now(),
            build_id: build_id.to_string(),
            temp_prefix: temp_prefix.to_string(),
        }
    }

    pub fn has_differences(&self) -> bool {
        self.records.iter().any(|r| r.difference_count > 0)
    }

    /// Records that belong in the report.
    pub fn differing(&self) -> impl Iterator<Item = &DiffRecord> {
        self.records.iter().filter(|r| r.difference_count > 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Workflow {
    Snapshot,
    Compare,
}

/// Counts for one service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// A poster that could not be processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PosterFailure {
    pub storage_key: String,
    pub service: Service,
    pub url: String,
    pub error: PosterError,
}

/// What a run did.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub workflow: Workflow,
    pub build_id: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub services: BTreeMap<Service, ServiceSummary>,
    pub failures: Vec<PosterFailure>,
    /// Compare only: every diffed poster, most severe first.
    pub records: Vec<DiffRecord>,
    /// Compare only: uploaded report, when any poster differed.
    pub report_location: Option<String>,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn new(workflow: Workflow, build_id: &str) -> Self {
        Self {
            workflow,
            build_id: build_id.to_string(),
            total: 0,
            succeeded: 0,
            failed: 0,
            services: BTreeMap::new(),
            failures: Vec::new(),
            records: Vec::new(),
            report_location: None,
            duration_ms: 0,
        }
    }

    pub fn record_success(&mut self, service: Service) {
        self.total += 1;
        self.succeeded += 1;
        let s = self.services.entry(service).or_default();
        s.total += 1;
        s.succeeded += 1;
    }

    pub fn record_failure(&mut self, failure: PosterFailure) {
        self.total += 1;
        self.failed += 1;
        let s = self.services.entry(failure.service).or_default();
        s.total += 1;
        s.failed += 1;
        self.failures.push(failure);
    }

    /// Some service had posters and every one of them failed.
    pub fn has_fully_failed_service(&self) -> bool {
        self.services
            .values()
            .any(|s| s.total > 0 && s.succeeded == 0)
    }

    pub fn differing_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.difference_count > 0)
            .count()
    }
}

/// `1234` → `1.2K`, `2_500_000_000` → `2.5 billion`.
pub fn humanize_count(n: u64) -> String {
    const UNITS: [&str; 7] = ["", "K", "M", " billion", " tera", " peta", " exa"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit + 1 < UNITS.len() {
        value /= 1000.0;
        unit += 1;
    }
    // 999_950 rounds to 1000.0K, which reads better as 1M
    let mut rounded = (value * 10.0).round() / 10.0;
    if rounded >= 1000.0 && unit + 1 < UNITS.len() {
        rounded /= 1000.0;
        unit += 1;
    }
    let text = format!("{:.1}", rounded);
    let text = text.strip_suffix(".0").unwrap_or(&text);
    format!("{}{}", text, UNITS[unit])
}
