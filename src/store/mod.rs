//! Baseline storage.
//!
//! [`BaselineStore`] owns the baseline semantics (deterministic keys,
//! placeholder fallback, per-run temp namespace) and delegates bytes to an
//! injected [`ObjectStore`]:
//!
//! | Backend | Used for |
//! |---|---|
//! | [`http::HttpObjectStore`] | `target = s3`: public bucket reads, authenticated PUT writes |
//! | [`local::LocalStore`] | `target = local`: a snapshot directory |
//! | [`memory::MemoryStore`] | in-process store for tests and dry runs |
//!
//! `list` and `delete` are only used by key migration ([`crate::migrate`]).

pub mod http;
pub mod local;
pub mod memory;

use crate::config::{RunConfig, Target};
use crate::error::{PosterError, SnapshotError};
use crate::pipeline::fetch::{FetchOrigin, FetchResult};
use crate::pipeline::placeholder;
use crate::pipeline::retry::RetryPolicy;
use crate::poster::PosterDescriptor;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub use http::HttpObjectStore;
pub use local::LocalStore;
pub use memory::MemoryStore;

/// Minimal key/value blob store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object. A missing key is [`PosterError::NotFound`].
    async fn get(&self, key: &str) -> Result<Vec<u8>, PosterError>;

    /// Create or overwrite an object; returns its location.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str)
        -> Result<String, PosterError>;

    /// Keys starting with `prefix`, in lexical order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, PosterError>;

    /// Remove an object. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), PosterError>;

    /// Human-readable location of `key`, for logs and report links.
    fn location(&self, key: &str) -> String;
}

/// Object store selected by `config.target`.
pub fn from_config(config: &RunConfig) -> Result<Arc<dyn ObjectStore>, SnapshotError> {
    Ok(match config.target {
        Target::S3 => Arc::new(HttpObjectStore::new(&config.storage, config.request_timeout)?),
        Target::Local => Arc::new(LocalStore::new(&config.storage.snapshot_dir)),
    })
}

/// Baselines and report artifacts of one run.
#[derive(Clone)]
pub struct BaselineStore {
    objects: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
    temp_prefix: String,
}

impl BaselineStore {
    pub fn new(objects: Arc<dyn ObjectStore>, retry: RetryPolicy, build_id: &str) -> Self {
        Self {
            objects,
            retry,
            temp_prefix: format!("temp/{}/", build_id),
        }
    }

    pub fn temp_prefix(&self) -> &str {
        &self.temp_prefix
    }

    pub fn location(&self, key: &str) -> String {
        self.objects.location(key)
    }

    /// Stored baseline of `poster`, or the missing-baseline placeholder
    /// at the poster's print dimensions.
    pub async fn retrieve(&self, poster: &PosterDescriptor) -> Result<FetchResult, PosterError> {
        let key = poster.storage_key();
        let location = self.objects.location(&key);

        let found = self
            .retry
            .run(&format!("baseline {}", key), |_| self.objects.get(&key))
            .await;

        match found {
            Ok(bytes) => {
                info!("Downloaded baseline {} ({} bytes)", key, bytes.len());
                Ok(FetchResult {
                    bytes,
                    origin: FetchOrigin::FromBaseline,
                    source: location,
                })
            }
            Err(PosterError::NotFound { .. }) => {
                warn!("No baseline for {}, using placeholder", key);
                let (w, h) = (poster.width_px, poster.height_px);
                let bytes =
                    tokio::task::spawn_blocking(move || placeholder::missing_baseline_png(w, h))
                        .await
                        .map_err(|e| PosterError::Task(e.to_string()))??;
                Ok(FetchResult {
                    bytes,
                    origin: FetchOrigin::FallbackPlaceholder,
                    source: location,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Overwrite the baseline of `poster`.
    pub async fn store(&self, poster: &PosterDescriptor, png: Vec<u8>) -> Result<String, PosterError> {
        let key = poster.storage_key();
        let location = self.put_retrying(&key, png, "image/png").await?;
        info!("Stored baseline at {}", location);
        Ok(location)
    }

    /// Write `name` under this run's `temp/{build_id}/` prefix.
    pub async fn store_report_artifact(
        &self,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, PosterError> {
        let key = format!("{}{}", self.temp_prefix, name);
        self.put_retrying(&key, bytes, content_type).await
    }

    async fn put_retrying(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, PosterError> {
        self.retry
            .run(&format!("upload {}", key), |_| {
                self.objects.put(key, bytes.clone(), content_type)
            })
            .await
    }
}
