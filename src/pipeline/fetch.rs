//! Fetching posters from the rendering services.
//!
//! Each service has its own endpoint and a few extra query parameters on
//! top of the descriptor's own; [`poster_url`] is the single place that
//! knows them. A fetch is only successful once the response has been
//! normalised to PNG, so a service returning garbage with HTTP 200 is
//! caught here and not by the differ.

use crate::config::{RunConfig, ServiceEndpoints};
use crate::error::{PosterError, SnapshotError};
use crate::pipeline::normalize;
use crate::pipeline::retry::RetryPolicy;
use crate::poster::{PosterDescriptor, Service};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Where the bytes of a [`FetchResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FetchOrigin {
    FromService,
    FromBaseline,
    /// No baseline was stored; the bytes are the placeholder image.
    FallbackPlaceholder,
}

/// Canonical PNG bytes plus provenance.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub bytes: Vec<u8>,
    pub origin: FetchOrigin,
    /// Request URL without credentials, or the storage location.
    pub source: String,
}

impl FetchResult {
    pub fn is_fallback(&self) -> bool {
        self.origin == FetchOrigin::FallbackPlaceholder
    }
}

/// Request URL of a poster, without the API key.
pub fn poster_url(poster: &PosterDescriptor, endpoints: &ServiceEndpoints, max_dimension: u32) -> Url {
    let (base, _) = endpoints.for_service(poster.service);
    let endpoint = match poster.service {
        Service::Render | Service::Tile | Service::TestReport => "api/raster/render",
        Service::RenderMap => "api/raster/render-map",
        Service::Placement => "api/place-map/no-flowers-in-blue-black-frame",
    };

    let mut url = base.clone();
    url.set_path(&format!("{}/{}", base.path().trim_end_matches('/'), endpoint));
    url.set_query(None);
    {
        let mut query = url.query_pairs_mut();
        query.extend_pairs(poster.query_pairs());
        match poster.service {
            Service::Tile => {
                query.append_pair("useTileRender", "true");
            }
            Service::RenderMap => {
                query.append_pair("width", &poster.width_px.to_string());
                query.append_pair("height", &poster.height_px.to_string());
            }
            Service::Placement => {
                query.append_pair("resizeToWidth", &max_dimension.to_string());
            }
            Service::Render | Service::TestReport => {}
        }
    }
    url
}

/// Downloads posters and normalises them to PNG, with retries.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    endpoints: ServiceEndpoints,
    retry: RetryPolicy,
    max_dimension: u32,
    keep_temp_files: Option<PathBuf>,
}

impl Fetcher {
    pub fn new(config: &RunConfig) -> Result<Self, SnapshotError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SnapshotError::Internal(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoints: config.endpoints.clone(),
            retry: config.render_retry,
            max_dimension: config.max_dimension,
            keep_temp_files: config.keep_temp_files.clone(),
        })
    }

    pub fn url_for(&self, poster: &PosterDescriptor) -> Url {
        poster_url(poster, &self.endpoints, self.max_dimension)
    }

    /// Fetch one poster as canonical PNG.
    ///
    /// Transient HTTP failures are retried; a response that does not convert
    /// fails at once.
    pub async fn fetch(&self, poster: &PosterDescriptor) -> Result<FetchResult, PosterError> {
        let url = self.url_for(poster);
        let (_, api_key) = self.endpoints.for_service(poster.service);
        let what = format!("{} {}", poster.service, poster.storage_key());

        let url_ref = &url;
        let bytes = self
            .retry
            .run(&what, |_| async move {
                let raw = self.download(url_ref, api_key).await?;
                self.keep_raw(poster, &raw).await;

                let format = poster.format;
                tokio::task::spawn_blocking(move || normalize::to_canonical_png(&raw, format))
                    .await
                    .map_err(|e| PosterError::Task(e.to_string()))?
            })
            .await?;

        Ok(FetchResult {
            bytes,
            origin: FetchOrigin::FromService,
            source: url.to_string(),
        })
    }

    async fn download(&self, url: &Url, api_key: Option<&str>) -> Result<Vec<u8>, PosterError> {
        info!("Downloading poster from \"{}\" ..", url);

        let mut request = self.client.get(url.clone());
        if let Some(key) = api_key {
            request = request.header("x-api-key", key).query(&[("apiKey", key)]);
        }

        let transient = |status: Option<u16>, reason: String| PosterError::TransientFetch {
            url: url.to_string(),
            status,
            reason,
        };

        let response = request
            .send()
            .await
            .map_err(|e| transient(None, e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(transient(Some(status.as_u16()), format!("HTTP {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| transient(Some(status.as_u16()), e.to_string()))?;
        info!("Downloaded {} data", format_bytes(body.len() as u64));
        Ok(body.to_vec())
    }

    /// Best effort: a failed write is logged, never fatal.
    async fn keep_raw(&self, poster: &PosterDescriptor, raw: &[u8]) {
        let Some(dir) = &self.keep_temp_files else {
            return;
        };
        let path = dir.join(format!("{}-raw.{}", poster.file_stem(), poster.format));
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!("Cannot create {}: {}", dir.display(), e);
            return;
        }
        match tokio::fs::write(&path, raw).await {
            Ok(()) => debug!("Kept raw response at {}", path.display()),
            Err(e) => warn!("Cannot write {}: {}", path.display(), e),
        }
    }
}

/// `1536` → `1.5 kB`, decimal units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["kB", "MB", "GB", "TB"];
    if bytes < 1000 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for u in UNITS {
        if value < 1000.0 {
            break;
        }
        value /= 1000.0;
        unit = u;
    }
    format!("{:.1} {}", value, unit)
}
