//! Snapshot and compare runs against mocked rendering services.
//!
//! The render service is a `wiremock` server and baselines live in an
//! in-process `MemoryStore` (or a temp directory for the local target), so
//! these tests need neither network access nor libpdfium.

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use poster_snapshot::pipeline::fetch::{FetchOrigin, Fetcher};
use poster_snapshot::pipeline::normalize::{encode_png, png_dimensions};
use poster_snapshot::{
    generate_all, LocalStore, MemoryStore, Orchestrator, PosterFormat, PosterProgress,
    RetryPolicy, RunConfig, RunConfigBuilder, RunState, Service, SnapshotError,
};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Route library logs to the test harness; `RUST_LOG=debug` shows retries.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn solid_png(width: u32, height: u32, value: u8) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([value, value, value]));
    encode_png(&DynamicImage::ImageRgb8(img)).unwrap()
}

/// Left half black, right half white.
fn half_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgb([0, 0, 0])
        } else {
            Rgb([255, 255, 255])
        }
    });
    encode_png(&DynamicImage::ImageRgb8(img)).unwrap()
}

fn png_response(bytes: Vec<u8>) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "image/png")
        .set_body_bytes(bytes)
}

fn fast_retry(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(5))
}

fn tile_config(server: &MockServer) -> RunConfigBuilder {
    RunConfig::builder()
        .services(vec![Service::Tile])
        .render_url(server.uri())
        .render_api_key("test-key")
        .build_id("ci-1")
        .render_retry(fast_retry(3))
        .baseline_retry(RetryPolicy::none())
}

fn tile_keys() -> Vec<String> {
    let config = RunConfig::builder()
        .services(vec![Service::Tile])
        .build()
        .unwrap();
    generate_all(&config.services, &config.matrix, &config.only)
        .unwrap()
        .iter()
        .map(|p| p.storage_key())
        .collect()
}

/// Memory store holding a white 40x30 baseline for every tile poster.
fn seeded_store(store: MemoryStore) -> Arc<MemoryStore> {
    for key in tile_keys() {
        store.insert(key, solid_png(40, 30, 255));
    }
    Arc::new(store)
}

async fn serve_black(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/raster/render"))
        .respond_with(png_response(solid_png(40, 30, 0)))
        .mount(server)
        .await;
}

#[derive(Default)]
struct CountingProgress {
    started: AtomicUsize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    run_total: AtomicUsize,
}

impl PosterProgress for CountingProgress {
    fn on_run_start(&self, total: usize) {
        self.run_total.store(total, Ordering::SeqCst);
    }
    fn on_poster_start(&self, _key: &str, _index: usize, _total: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_poster_complete(&self, _key: &str, _index: usize, _total: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_poster_error(&self, _key: &str, _index: usize, _total: usize, _error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Compare ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn compare_uploads_report_and_diff_images() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/raster/render"))
        .and(query_param("useTileRender", "true"))
        .and(query_param("apiKey", "test-key"))
        .respond_with(png_response(solid_png(40, 30, 0)))
        .expect(4)
        .mount(&server)
        .await;

    let store = seeded_store(MemoryStore::new());
    let mut orchestrator = Orchestrator::new(tile_config(&server).build().unwrap(), store.clone()).unwrap();
    let summary = orchestrator.compare().await.unwrap();

    assert_eq!(orchestrator.state(), RunState::Done);
    assert_eq!((summary.total, summary.succeeded, summary.failed), (4, 4, 0));
    assert_eq!(summary.records.len(), 4);
    assert!(summary
        .records
        .iter()
        .all(|r| r.difference_count == 1200 && !r.passed));
    assert_eq!(
        summary.report_location.as_deref(),
        Some("memory://temp/ci-1/report.html")
    );

    let html = String::from_utf8(store.object("temp/ci-1/report.html").unwrap()).unwrap();
    assert!(html.contains("Visual diff report for build ci-1"));
    assert!(store
        .content_type("temp/ci-1/report.html")
        .unwrap()
        .starts_with("text/html"));

    for key in tile_keys() {
        let artifact = format!("temp/ci-1/{}", key);
        assert!(store.object(&artifact).is_some(), "missing {artifact}");
        assert!(html.contains(&format!("src=\"{}\"", key)));
    }
}

#[tokio::test]
async fn identical_posters_produce_no_report() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/raster/render"))
        .respond_with(png_response(solid_png(40, 30, 255)))
        .mount(&server)
        .await;

    let store = seeded_store(MemoryStore::new());
    let before = store.keys();
    let summary = Orchestrator::new(tile_config(&server).build().unwrap(), store.clone())
        .unwrap()
        .compare()
        .await
        .unwrap();

    assert!(summary.report_location.is_none());
    assert_eq!(summary.differing_count(), 0);
    assert!(summary.records.iter().all(|r| r.passed));
    assert_eq!(store.keys(), before);
}

#[tokio::test]
async fn report_order_does_not_depend_on_concurrency() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("mapStyle", "petrol"))
        .respond_with(png_response(half_png(40, 30)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("mapStyle", "black"))
        .respond_with(png_response(solid_png(40, 30, 255)))
        .mount(&server)
        .await;
    serve_black(&server).await;

    let mut runs = Vec::new();
    for concurrency in [1, 8] {
        let store = seeded_store(MemoryStore::new());
        let config = tile_config(&server).concurrency(concurrency).build().unwrap();
        let summary = Orchestrator::new(config, store).unwrap().compare().await.unwrap();
        let order: Vec<(String, u64)> = summary
            .records
            .iter()
            .map(|r| (r.storage_key(), r.difference_count))
            .collect();
        runs.push(order);
    }

    assert_eq!(runs[0], runs[1]);
    // solid black renders first, then the half-black one, then the unchanged one
    let counts: Vec<u64> = runs[0].iter().map(|(_, c)| *c).collect();
    assert_eq!(counts, [1200, 1200, 600, 0]);
}

#[tokio::test]
async fn missing_baseline_is_diffed_against_placeholder() {
    let server = MockServer::start().await;
    serve_black(&server).await;

    let config = tile_config(&server).max_dimension(64).build().unwrap();
    let summary = Orchestrator::new(config, Arc::new(MemoryStore::new()))
        .unwrap()
        .compare()
        .await
        .unwrap();

    assert_eq!(summary.records.len(), tile_keys().len());
    assert_eq!(summary.records.len(), 4);
    for record in &summary.records {
        assert_eq!(record.baseline_origin, FetchOrigin::FallbackPlaceholder);
        assert!(record.difference_count > 0, "{}", record.storage_key());
    }
    assert!(summary.report_location.is_some());
}

#[tokio::test]
async fn raw_responses_are_kept_before_conversion() {
    let server = MockServer::start().await;
    let mut jpeg = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(24, 16, Rgb([200, 40, 40])))
        .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
        .unwrap();
    Mock::given(method("GET"))
        .and(path("/api/raster/render"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/jpeg")
                .set_body_bytes(jpeg.clone()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let kept = dir.path().join("raw");
    let config = tile_config(&server).keep_temp_files(&kept).build().unwrap();
    let mut poster = generate_all(&config.services, &config.matrix, &config.only)
        .unwrap()
        .remove(0);
    poster.format = PosterFormat::Jpg;

    let fetched = Fetcher::new(&config).unwrap().fetch(&poster).await.unwrap();

    let raw_path = kept.join(format!("{}-raw.jpg", poster.file_stem()));
    assert_eq!(std::fs::read(&raw_path).unwrap(), jpeg);
    assert_ne!(fetched.bytes, jpeg);
    assert_eq!(png_dimensions(&fetched.bytes).unwrap(), (24, 16));
}

// ── Snapshot ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn snapshot_stores_resized_baselines() {
    let server = MockServer::start().await;
    serve_black(&server).await;

    let store = Arc::new(MemoryStore::new());
    let config = tile_config(&server).max_dimension(20).build().unwrap();
    let summary = Orchestrator::new(config, store.clone())
        .unwrap()
        .snapshot()
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 4);
    assert!(summary.records.is_empty());
    let mut expected = tile_keys();
    expected.sort();
    assert_eq!(store.keys(), expected);
    for key in &expected {
        assert_eq!(png_dimensions(&store.object(key).unwrap()).unwrap(), (20, 15));
    }
}

#[tokio::test]
async fn snapshot_keeps_originals_when_asked() {
    let server = MockServer::start().await;
    serve_black(&server).await;

    let store = Arc::new(MemoryStore::new());
    let config = tile_config(&server)
        .max_dimension(20)
        .originals(true)
        .only("mapStyle:petrol")
        .build()
        .unwrap();
    Orchestrator::new(config, store.clone())
        .unwrap()
        .snapshot()
        .await
        .unwrap();

    let key = &store.keys()[0];
    assert_eq!(png_dimensions(&store.object(key).unwrap()).unwrap(), (40, 30));
}

#[tokio::test]
async fn snapshot_to_local_directory() {
    let server = MockServer::start().await;
    serve_black(&server).await;
    let dir = tempfile::tempdir().unwrap();

    let config = tile_config(&server).build().unwrap();
    let summary = Orchestrator::new(config, Arc::new(LocalStore::new(dir.path())))
        .unwrap()
        .snapshot()
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 4);
    for key in tile_keys() {
        assert!(dir.path().join(&key).exists(), "missing {key}");
    }
}

// ── Failure handling ─────────────────────────────────────────────────────────

#[tokio::test]
async fn transient_errors_are_retried() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    serve_black(&server).await;

    let config = tile_config(&server)
        .only("mapStyle:bw")
        .render_retry(fast_retry(5))
        .build()
        .unwrap();
    let summary = Orchestrator::new(config, Arc::new(MemoryStore::new()))
        .unwrap()
        .snapshot()
        .await
        .unwrap();

    assert_eq!((summary.succeeded, summary.failed), (1, 0));
}

#[tokio::test]
async fn wrong_format_fails_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>busy</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let progress = Arc::new(CountingProgress::default());
    let config = tile_config(&server)
        .only("mapStyle:bw")
        .render_retry(fast_retry(5))
        .progress_callback(progress.clone())
        .build()
        .unwrap();
    let summary = Orchestrator::new(config, Arc::new(MemoryStore::new()))
        .unwrap()
        .snapshot()
        .await
        .unwrap();

    assert_eq!((summary.succeeded, summary.failed), (0, 1));
    assert!(summary.has_fully_failed_service());
    assert!(summary.failures[0].url.contains("/api/raster/render"));
    assert!(!summary.failures[0].url.contains("test-key"));
    assert_eq!(progress.errors.load(Ordering::SeqCst), 1);
    assert_eq!(progress.completed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn one_failing_poster_does_not_stop_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("mapStyle", "black"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    serve_black(&server).await;

    let progress = Arc::new(CountingProgress::default());
    let store = seeded_store(MemoryStore::new());
    let config = tile_config(&server)
        .concurrency(4)
        .progress_callback(progress.clone())
        .build()
        .unwrap();
    let summary = Orchestrator::new(config, store.clone())
        .unwrap()
        .compare()
        .await
        .unwrap();

    assert_eq!((summary.succeeded, summary.failed), (3, 1));
    assert!(!summary.has_fully_failed_service());
    assert_eq!(summary.records.len(), 3);
    assert!(summary.report_location.is_some());
    assert_eq!(progress.run_total.load(Ordering::SeqCst), 4);
    assert_eq!(progress.started.load(Ordering::SeqCst), 4);
    assert_eq!(progress.completed.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn rejected_credentials_abort_the_run() {
    init_tracing();
    let server = MockServer::start().await;
    serve_black(&server).await;

    let store = seeded_store(MemoryStore::read_only());
    let config = tile_config(&server).concurrency(1).build().unwrap();
    let mut orchestrator = Orchestrator::new(config, store.clone()).unwrap();
    let err = orchestrator.compare().await.unwrap_err();

    match err {
        SnapshotError::Aborted {
            completed, total, ..
        } => assert_eq!((completed, total), (1, 4)),
        other => panic!("expected Aborted, got {other:?}"),
    }
    assert_ne!(orchestrator.state(), RunState::Done);
    assert!(store.object("temp/ci-1/report.html").is_none());
    assert_eq!(store.put_attempts(), 1);
}

#[tokio::test]
async fn bad_matrix_fails_before_any_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = tile_config(&server)
        .main_location_id("atlantis")
        .build()
        .unwrap();
    let err = Orchestrator::new(config, Arc::new(MemoryStore::new()))
        .unwrap()
        .snapshot()
        .await
        .unwrap_err();
    assert!(matches!(err, SnapshotError::UnknownLocation { .. }));
    assert!(err.is_configuration());
}
