//! Run configuration.
//!
//! All options have sensible defaults; override them with the builder:
//!
//! ```rust
//! use poster_snapshot::{RunConfig, Service};
//!
//! let config = RunConfig::builder()
//!     .services(vec![Service::Tile])
//!     .concurrency(4)
//!     .render_url("https://render.example.com")
//!     .build()
//!     .unwrap();
//! assert_eq!(config.concurrency, 4);
//! ```

use crate::error::SnapshotError;
use crate::matrix::{MatrixOptions, PosterFilter};
use crate::pipeline::diff::DiffOptions;
use crate::pipeline::retry::RetryPolicy;
use crate::poster::Service;
use crate::progress::ProgressCallback;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Complete configuration of one snapshot or compare run.
#[derive(Clone)]
pub struct RunConfig {
    /// Posters processed at once. Each in-flight poster holds up to two
    /// full-size rasters in memory.
    ///
    /// Default: 2. Minimum: 1.
    pub concurrency: usize,

    /// Where baselines live.
    pub target: Target,

    /// Store baselines at the size the service returned.
    pub originals: bool,

    /// Longer side of stored baselines and of images before diffing.
    ///
    /// Default: 2000.
    pub max_dimension: u32,

    /// Longer side of diff images uploaded for the report.
    ///
    /// Default: 1200.
    pub review_max_dimension: u32,

    pub diff: DiffOptions,

    /// HTTP timeout per request. Renders of large posters take minutes.
    ///
    /// Default: 300 s.
    pub request_timeout: Duration,

    pub render_retry: RetryPolicy,
    pub baseline_retry: RetryPolicy,

    pub endpoints: ServiceEndpoints,
    pub storage: StorageSettings,

    /// Base URL of the poster designer, used for report deep links.
    pub preview_base_url: Url,

    /// Names the per-run `temp/{build_id}/` prefix.
    pub build_id: String,

    /// Write raw service responses here before conversion.
    pub keep_temp_files: Option<PathBuf>,

    pub matrix: MatrixOptions,

    /// `only` filter applied after matrix generation.
    pub only: PosterFilter,

    /// Services whose matrices make up the run.
    ///
    /// Default: `[Service::Render]`.
    pub services: Vec<Service>,

    pub progress_callback: Option<ProgressCallback>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            target: Target::default(),
            originals: false,
            max_dimension: 2000,
            review_max_dimension: 1200,
            diff: DiffOptions::default(),
            request_timeout: Duration::from_secs(300),
            render_retry: RetryPolicy::render_service(),
            baseline_retry: RetryPolicy::baseline_store(),
            endpoints: ServiceEndpoints::default(),
            storage: StorageSettings::default(),
            preview_base_url: DEFAULT_PREVIEW_URL.clone(),
            build_id: default_build_id(),
            keep_temp_files: None,
            matrix: MatrixOptions::default(),
            only: PosterFilter::default(),
            services: vec![Service::Render],
            progress_callback: None,
        }
    }
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("concurrency", &self.concurrency)
            .field("target", &self.target)
            .field("originals", &self.originals)
            .field("max_dimension", &self.max_dimension)
            .field("review_max_dimension", &self.review_max_dimension)
            .field("diff", &self.diff)
            .field("request_timeout", &self.request_timeout)
            .field("endpoints", &self.endpoints)
            .field("storage", &self.storage)
            .field("build_id", &self.build_id)
            .field("matrix", &self.matrix)
            .field("services", &self.services)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PosterProgress>"),
            )
            .finish()
    }
}

impl RunConfig {
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder {
            config: Self::default(),
            render_url: None,
            placement_url: None,
            bucket_url: None,
            upload_url: None,
            preview_url: None,
            only: Vec::new(),
        }
    }

    /// Key prefix for this run's report artifacts.
    pub fn temp_prefix(&self) -> String {
        format!("temp/{}/", self.build_id)
    }
}

fn default_build_id() -> String {
    format!("local-{}", chrono::Utc::now().format("%Y%m%dT%H%M%SZ"))
}

/// Baseline storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// S3-compatible bucket over HTTP.
    #[default]
    S3,
    /// Directory on the local filesystem.
    Local,
}

impl FromStr for Target {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s3" => Ok(Target::S3),
            "local" => Ok(Target::Local),
            other => Err(SnapshotError::InvalidConfig(format!(
                "target must be 's3' or 'local', got '{}'",
                other
            ))),
        }
    }
}

/// Base URLs and keys of the rendering services.
#[derive(Clone)]
pub struct ServiceEndpoints {
    pub render_url: Url,
    pub render_api_key: Option<String>,
    pub placement_url: Url,
    pub placement_api_key: Option<String>,
}

impl ServiceEndpoints {
    /// Base URL and key that serve `service`.
    pub fn for_service(&self, service: Service) -> (&Url, Option<&str>) {
        match service {
            Service::Placement => (&self.placement_url, self.placement_api_key.as_deref()),
            _ => (&self.render_url, self.render_api_key.as_deref()),
        }
    }
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            render_url: DEFAULT_RENDER_URL.clone(),
            render_api_key: None,
            placement_url: DEFAULT_PLACEMENT_URL.clone(),
            placement_api_key: None,
        }
    }
}

/// Build ids name a single path segment of object keys and URLs.
static BUILD_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").unwrap());

static DEFAULT_RENDER_URL: Lazy<Url> =
    Lazy::new(|| Url::parse("http://localhost:8001/").unwrap());
static DEFAULT_PLACEMENT_URL: Lazy<Url> =
    Lazy::new(|| Url::parse("http://localhost:8002/").unwrap());
static DEFAULT_PREVIEW_URL: Lazy<Url> =
    Lazy::new(|| Url::parse("https://design.alvarcarto.com/").unwrap());
static DEFAULT_BUCKET_URL: Lazy<Url> = Lazy::new(|| {
    Url::parse("https://alvarcarto-render-snapshots.s3-eu-west-1.amazonaws.com/").unwrap()
});

impl fmt::Debug for ServiceEndpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |k: &Option<String>| k.as_ref().map(|_| "<redacted>");
        f.debug_struct("ServiceEndpoints")
            .field("render_url", &self.render_url.as_str())
            .field("render_api_key", &redact(&self.render_api_key))
            .field("placement_url", &self.placement_url.as_str())
            .field("placement_api_key", &redact(&self.placement_api_key))
            .finish()
    }
}

/// Where baselines are read from and written to.
#[derive(Clone)]
pub struct StorageSettings {
    /// Public read URL of the bucket (`target = s3`).
    pub bucket_url: Url,
    /// Write URL; defaults to `bucket_url`.
    pub upload_url: Option<Url>,
    /// Bearer token for writes.
    pub upload_token: Option<String>,
    /// Root directory (`target = local`).
    pub snapshot_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            bucket_url: DEFAULT_BUCKET_URL.clone(),
            upload_url: None,
            upload_token: None,
            snapshot_dir: PathBuf::from("images"),
        }
    }
}

impl fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageSettings")
            .field("bucket_url", &self.bucket_url.as_str())
            .field("upload_url", &self.upload_url.as_ref().map(Url::as_str))
            .field("upload_token", &self.upload_token.as_ref().map(|_| "<redacted>"))
            .field("snapshot_dir", &self.snapshot_dir)
            .finish()
    }
}

/// Fluent builder for [`RunConfig`].
#[derive(Debug)]
pub struct RunConfigBuilder {
    config: RunConfig,
    render_url: Option<String>,
    placement_url: Option<String>,
    bucket_url: Option<String>,
    upload_url: Option<String>,
    preview_url: Option<String>,
    only: Vec<String>,
}

impl RunConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn target(mut self, target: Target) -> Self {
        self.config.target = target;
        self
    }

    pub fn originals(mut self, v: bool) -> Self {
        self.config.originals = v;
        self
    }

    pub fn max_dimension(mut self, px: u32) -> Self {
        self.config.max_dimension = px.max(16);
        self
    }

    pub fn review_max_dimension(mut self, px: u32) -> Self {
        self.config.review_max_dimension = px.max(16);
        self
    }

    pub fn threshold_percent(mut self, pct: f64) -> Self {
        self.config.diff.threshold_percent = pct.clamp(0.0, 100.0);
        self
    }

    pub fn pixel_tolerance(mut self, tolerance: u8) -> Self {
        self.config.diff.pixel_tolerance = tolerance;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn render_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.render_retry = policy;
        self
    }

    pub fn baseline_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.baseline_retry = policy;
        self
    }

    pub fn render_url(mut self, url: impl Into<String>) -> Self {
        self.render_url = Some(url.into());
        self
    }

    pub fn render_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.endpoints.render_api_key = Some(key.into());
        self
    }

    pub fn placement_url(mut self, url: impl Into<String>) -> Self {
        self.placement_url = Some(url.into());
        self
    }

    pub fn placement_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.endpoints.placement_api_key = Some(key.into());
        self
    }

    pub fn bucket_url(mut self, url: impl Into<String>) -> Self {
        self.bucket_url = Some(url.into());
        self
    }

    pub fn upload_url(mut self, url: impl Into<String>) -> Self {
        self.upload_url = Some(url.into());
        self
    }

    pub fn upload_token(mut self, token: impl Into<String>) -> Self {
        self.config.storage.upload_token = Some(token.into());
        self
    }

    pub fn snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage.snapshot_dir = dir.into();
        self
    }

    pub fn preview_base_url(mut self, url: impl Into<String>) -> Self {
        self.preview_url = Some(url.into());
        self
    }

    pub fn build_id(mut self, id: impl Into<String>) -> Self {
        self.config.build_id = id.into();
        self
    }

    pub fn keep_temp_files(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.keep_temp_files = Some(dir.into());
        self
    }

    pub fn main_location_id(mut self, id: impl Into<String>) -> Self {
        self.config.matrix.main_location_id = id.into();
        self
    }

    /// Add one `only` pattern. Patterns combine with AND.
    pub fn only(mut self, pattern: impl Into<String>) -> Self {
        self.only.push(pattern.into());
        self
    }

    /// Services to run, in order. Repeats are dropped.
    pub fn services(mut self, services: Vec<Service>) -> Self {
        let mut unique = Vec::with_capacity(services.len());
        for service in services {
            if !unique.contains(&service) {
                unique.push(service);
            }
        }
        self.config.services = unique;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Validate and build.
    pub fn build(mut self) -> Result<RunConfig, SnapshotError> {
        if let Some(url) = &self.render_url {
            self.config.endpoints.render_url = parse_base_url("render URL", url)?;
        }
        if let Some(url) = &self.placement_url {
            self.config.endpoints.placement_url = parse_base_url("placement URL", url)?;
        }
        if let Some(url) = &self.bucket_url {
            self.config.storage.bucket_url = parse_base_url("bucket URL", url)?;
        }
        if let Some(url) = &self.upload_url {
            self.config.storage.upload_url = Some(parse_base_url("upload URL", url)?);
        }
        if let Some(url) = &self.preview_url {
            self.config.preview_base_url = parse_base_url("preview URL", url)?;
        }
        self.config.only = PosterFilter::parse(&self.only)?;

        let c = &self.config;
        if c.services.is_empty() {
            return Err(SnapshotError::InvalidConfig(
                "At least one service is required".into(),
            ));
        }
        if !BUILD_ID_RE.is_match(&c.build_id) || matches!(c.build_id.as_str(), "." | "..") {
            return Err(SnapshotError::InvalidConfig(format!(
                "Build id may only contain letters, digits, '.', '_' and '-' (and must not be '.' or '..'), got '{}'",
                c.build_id
            )));
        }
        if c.target == Target::Local && c.storage.snapshot_dir.as_os_str().is_empty() {
            return Err(SnapshotError::InvalidConfig(
                "target=local needs a snapshot directory".into(),
            ));
        }
        Ok(self.config)
    }
}

fn parse_base_url(what: &str, raw: &str) -> Result<Url, SnapshotError> {
    let url = Url::parse(raw)
        .map_err(|e| SnapshotError::InvalidConfig(format!("Invalid {} '{}': {}", what, raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(SnapshotError::InvalidConfig(format!(
            "{} must be an http(s) URL, got '{}'",
            what, raw
        )));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> RunConfigBuilder {
        RunConfig::builder()
            .target(Target::Local)
            .snapshot_dir("images")
    }

    #[test]
    fn defaults() {
        let c = local().build().unwrap();
        assert_eq!(c.concurrency, 2);
        assert_eq!(c.max_dimension, 2000);
        assert_eq!(c.request_timeout, Duration::from_secs(300));
        assert_eq!(c.render_retry.max_attempts, 15);
        assert_eq!(c.baseline_retry.max_attempts, 3);
        assert_eq!(c.services, vec![Service::Render]);
        assert_eq!(c.matrix.main_location_id, "tokyo_c");
        assert!(c.build_id.starts_with("local-"));
        assert_eq!(c.endpoints.render_url.as_str(), "http://localhost:8001/");
    }

    #[test]
    fn concurrency_is_clamped() {
        assert_eq!(local().concurrency(0).build().unwrap().concurrency, 1);
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let err = local().render_url("not a url").build().unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidConfig(_)));
        let err = local().render_url("ftp://render").build().unwrap_err();
        assert!(err.to_string().contains("http(s)"));
    }

    #[test]
    fn s3_is_the_default_target() {
        let c = RunConfig::builder()
            .bucket_url("https://bucket.example.com/snapshots/")
            .build()
            .unwrap();
        assert_eq!(c.target, Target::S3);
        assert_eq!(c.storage.bucket_url.path(), "/snapshots/");
        assert!(c.storage.upload_url.is_none());
    }

    #[test]
    fn only_patterns_are_validated() {
        let err = local().only("nosuchfield:x").build().unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidFilter { .. }));
        assert!(!local().only("mapStyle:bw").build().unwrap().only.is_empty());
    }

    #[test]
    fn temp_prefix_uses_build_id() {
        let c = local().build_id("1234").build().unwrap();
        assert_eq!(c.temp_prefix(), "temp/1234/");
        assert!(local().build_id("a/b").build().is_err());
    }

    #[test]
    fn build_id_is_a_single_safe_segment() {
        for ok in ["42", "ci-1.2_rc", "local-20260101T000000Z", "..x"] {
            assert!(local().build_id(ok).build().is_ok(), "{ok} should pass");
        }
        for bad in ["", ".", "..", "#42", "?x", "a b", "a\\b", "%2F", "ä"] {
            let err = local().build_id(bad).build().unwrap_err();
            assert!(matches!(err, SnapshotError::InvalidConfig(_)), "{bad}");
        }
    }

    #[test]
    fn repeated_services_are_dropped_in_order() {
        let c = local()
            .services(vec![Service::Tile, Service::Render, Service::Tile])
            .build()
            .unwrap();
        assert_eq!(c.services, vec![Service::Tile, Service::Render]);
    }

    #[test]
    fn target_parses() {
        assert_eq!("LOCAL".parse::<Target>().unwrap(), Target::Local);
        assert!("gcs".parse::<Target>().is_err());
    }

    #[test]
    fn debug_redacts_secrets() {
        let c = local()
            .render_api_key("secret-key")
            .upload_token("secret-token")
            .build()
            .unwrap();
        let dbg = format!("{:?}", c);
        assert!(!dbg.contains("secret"));
    }
}
