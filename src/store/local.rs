//! Snapshot directory on the local filesystem (`target = local`).
//!
//! Keys map to paths below the root, so `temp/{build}/report.html` becomes a
//! nested file and baselines sit directly in the root.

use super::ObjectStore;
use crate::error::PosterError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Inverse of [`Self::path_for`]; keys always use `/`.
    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, PosterError> {
        let path = self.path_for(key);
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => PosterError::NotFound {
                key: key.to_string(),
            },
            _ => PosterError::Storage {
                key: key.to_string(),
                reason: format!("{}: {}", path.display(), e),
            },
        })
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, PosterError> {
        let path = self.path_for(key);
        let storage = |e: std::io::Error| PosterError::Storage {
            key: key.to_string(),
            reason: format!("{}: {}", path.display(), e),
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(storage)?;
        }
        tokio::fs::write(&path, &bytes).await.map_err(storage)?;
        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(path.display().to_string())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, PosterError> {
        let storage = |path: &Path, e: std::io::Error| PosterError::Storage {
            key: prefix.to_string(),
            reason: format!("{}: {}", path.display(), e),
        };

        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(storage(&dir, e)),
            };
            while let Some(entry) = entries.next_entry().await.map_err(|e| storage(&dir, e))? {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(|e| storage(&path, e))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if let Some(key) = self.key_for(&path) {
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), PosterError> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PosterError::Storage {
                key: key.to_string(),
                reason: format!("{}: {}", path.display(), e),
            }),
        }
    }

    fn location(&self, key: &str) -> String {
        self.path_for(key).display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_with_nested_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        let location = store
            .put("temp/b1/report.html", b"<html/>".to_vec(), "text/html")
            .await
            .unwrap();
        assert!(location.ends_with("report.html"));
        assert!(dir.path().join("temp/b1/report.html").exists());
        assert_eq!(store.get("temp/b1/report.html").await.unwrap(), b"<html/>");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalStore::new(dir.path()).get("x.png").await.unwrap_err();
        assert!(matches!(err, PosterError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_walks_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        for key in ["tile-b.png", "tile-a.png", "temp/b1/report.html"] {
            store.put(key, vec![0], "image/png").await.unwrap();
        }

        assert_eq!(
            store.list("").await.unwrap(),
            ["temp/b1/report.html", "tile-a.png", "tile-b.png"]
        );
        assert_eq!(store.list("tile-").await.unwrap(), ["tile-a.png", "tile-b.png"]);

        store.delete("tile-a.png").await.unwrap();
        store.delete("tile-a.png").await.unwrap();
        assert!(!dir.path().join("tile-a.png").exists());
    }

    #[tokio::test]
    async fn missing_root_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("nope"));
        assert!(store.list("").await.unwrap().is_empty());
    }
}
