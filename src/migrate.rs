//! Offline storage key migration.
//!
//! Storage keys are derived from descriptor fields, so changing the key
//! layout orphans every stored baseline. A [`KeyMigration`] moves existing
//! objects to their new keys with a regex rename rule: each object is copied
//! to its new key and only then is the old key deleted. Objects are moved one
//! at a time, so an interrupted migration leaves at worst one object present
//! under both keys.
//!
//! Run artifacts under `temp/` are never touched.

use crate::error::{PosterError, SnapshotError};
use crate::pipeline::retry::RetryPolicy;
use crate::store::ObjectStore;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// Prefix of per-run report artifacts.
pub const TEMP_ROOT: &str = "temp/";

/// Rename rule: the first match of `pattern` is replaced by `replacement`
/// (`$1`, `${name}` refer to capture groups).
#[derive(Debug, Clone)]
pub struct KeyRename {
    pattern: Regex,
    replacement: String,
}

impl KeyRename {
    pub fn new(pattern: &str, replacement: impl Into<String>) -> Result<Self, SnapshotError> {
        let pattern = Regex::new(pattern).map_err(|e| {
            SnapshotError::InvalidConfig(format!("Invalid rename pattern '{}': {}", pattern, e))
        })?;
        Ok(Self {
            pattern,
            replacement: replacement.into(),
        })
    }

    /// New key for `key`, or `None` when the rule leaves it unchanged.
    pub fn apply(&self, key: &str) -> Option<String> {
        let renamed = self.pattern.replace(key, self.replacement.as_str());
        (renamed != key).then(|| renamed.into_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyMove {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSummary {
    /// Objects considered, excluding `temp/`.
    pub scanned: usize,
    /// Planned moves; performed unless `dry_run`.
    pub moves: Vec<KeyMove>,
    pub dry_run: bool,
}

pub struct KeyMigration {
    objects: Arc<dyn ObjectStore>,
    rename: KeyRename,
    retry: RetryPolicy,
}

impl KeyMigration {
    pub fn new(objects: Arc<dyn ObjectStore>, rename: KeyRename, retry: RetryPolicy) -> Self {
        Self {
            objects,
            rename,
            retry,
        }
    }

    /// Moves the rule implies, in key order, plus the number of keys scanned.
    ///
    /// Fails without side effects when a new key is empty, lands under
    /// `temp/`, is shared by two objects or already exists.
    pub async fn plan(&self) -> Result<(usize, Vec<KeyMove>), SnapshotError> {
        let keys = self
            .retry
            .run("list objects", |_| self.objects.list(""))
            .await
            .map_err(|e| step_failed("", e))?;
        let keys: Vec<String> = keys
            .into_iter()
            .filter(|k| !k.starts_with(TEMP_ROOT))
            .collect();
        let existing: HashSet<&str> = keys.iter().map(String::as_str).collect();

        let mut targets = HashSet::new();
        let mut moves = Vec::new();
        for key in &keys {
            let Some(to) = self.rename.apply(key) else {
                continue;
            };
            let conflict = if to.is_empty() || to.ends_with('/') {
                Some("rename produces an empty object name".to_string())
            } else if to.starts_with(TEMP_ROOT) {
                Some(format!("new key '{}' is inside {}", to, TEMP_ROOT))
            } else if existing.contains(to.as_str()) {
                Some(format!("new key '{}' already exists", to))
            } else if !targets.insert(to.clone()) {
                Some(format!("several objects would be renamed to '{}'", to))
            } else {
                None
            };
            if let Some(reason) = conflict {
                return Err(SnapshotError::KeyMigration {
                    key: key.clone(),
                    reason,
                });
            }
            moves.push(KeyMove {
                from: key.clone(),
                to,
            });
        }
        Ok((keys.len(), moves))
    }

    /// Plan, then copy and delete each object unless `dry_run`.
    pub async fn run(&self, dry_run: bool) -> Result<MigrationSummary, SnapshotError> {
        let (scanned, moves) = self.plan().await?;
        info!(
            "{} of {} objects to rename{}",
            moves.len(),
            scanned,
            if dry_run { " (dry run)" } else { "" }
        );

        if !dry_run {
            for (done, m) in moves.iter().enumerate() {
                self.move_object(m).await.map_err(|e| match e {
                    SnapshotError::KeyMigration { key, reason } => SnapshotError::KeyMigration {
                        key,
                        reason: format!("{} ({} of {} moved)", reason, done, moves.len()),
                    },
                    other => other,
                })?;
            }
        }

        Ok(MigrationSummary {
            scanned,
            moves,
            dry_run,
        })
    }

    async fn move_object(&self, m: &KeyMove) -> Result<(), SnapshotError> {
        info!(
            "Copying {} -> {}",
            self.objects.location(&m.from),
            self.objects.location(&m.to)
        );
        let bytes = self
            .retry
            .run(&format!("read {}", m.from), |_| self.objects.get(&m.from))
            .await
            .map_err(|e| step_failed(&m.from, e))?;
        let content_type = content_type_for(&m.to);
        self.retry
            .run(&format!("write {}", m.to), |_| {
                self.objects.put(&m.to, bytes.clone(), content_type)
            })
            .await
            .map_err(|e| step_failed(&m.to, e))?;

        info!("Deleting old object {}", self.objects.location(&m.from));
        self.retry
            .run(&format!("delete {}", m.from), |_| self.objects.delete(&m.from))
            .await
            .map_err(|e| step_failed(&m.from, e))
    }
}

fn step_failed(key: &str, e: PosterError) -> SnapshotError {
    SnapshotError::KeyMigration {
        key: key.to_string(),
        reason: e.to_string(),
    }
}

fn content_type_for(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext) {
        Some("png") => "image/png",
        Some("jpg") => "image/jpeg",
        Some("html") => "text/html; charset=utf-8",
        _ => "application/octet-stream",
    }
}
