//! In-process object store.

use super::ObjectStore;
use crate::error::PosterError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, (Vec<u8>, String)>>,
    read_only: bool,
    put_attempts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every write as a credentials failure (HTTP 403).
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    /// Seed an object directly.
    pub fn insert(&self, key: impl Into<String>, bytes: Vec<u8>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(key.into(), (bytes, "image/png".to_string()));
        }
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .ok()
            .and_then(|o| o.get(key).map(|(bytes, _)| bytes.clone()))
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .ok()
            .and_then(|o| o.get(key).map(|(_, ct)| ct.clone()))
    }

    /// Stored keys in lexical order.
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Calls to `put`, successful or not.
    pub fn put_attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }

    fn poisoned(key: &str) -> PosterError {
        PosterError::Storage {
            key: key.to_string(),
            reason: "memory store lock poisoned".into(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, PosterError> {
        let objects = self.objects.lock().map_err(|_| Self::poisoned(key))?;
        objects
            .get(key)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| PosterError::NotFound {
                key: key.to_string(),
            })
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, PosterError> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        if self.read_only {
            return Err(PosterError::StorageCredentials {
                key: key.to_string(),
                status: 403,
            });
        }
        let mut objects = self.objects.lock().map_err(|_| Self::poisoned(key))?;
        objects.insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(self.location(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, PosterError> {
        let objects = self.objects.lock().map_err(|_| Self::poisoned(prefix))?;
        Ok(objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), PosterError> {
        if self.read_only {
            return Err(PosterError::StorageCredentials {
                key: key.to_string(),
                status: 403,
            });
        }
        let mut objects = self.objects.lock().map_err(|_| Self::poisoned(key))?;
        objects.remove(key);
        Ok(())
    }

    fn location(&self, key: &str) -> String {
        format!("memory://{}", key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get("nope.png").await.unwrap_err();
        assert!(matches!(err, PosterError::NotFound { .. }));
    }

    #[tokio::test]
    async fn put_then_get() {
        let store = MemoryStore::new();
        store.put("a.png", vec![7], "image/png").await.unwrap();
        assert_eq!(store.get("a.png").await.unwrap(), vec![7]);
        assert_eq!(store.put_attempts(), 1);
    }

    #[tokio::test]
    async fn list_by_prefix_and_delete() {
        let store = MemoryStore::new();
        store.insert("b.png", vec![1]);
        store.insert("a.png", vec![2]);
        store.insert("temp/1/report.html", vec![3]);

        assert_eq!(store.list("").await.unwrap(), ["a.png", "b.png", "temp/1/report.html"]);
        assert_eq!(store.list("temp/").await.unwrap(), ["temp/1/report.html"]);

        store.delete("a.png").await.unwrap();
        store.delete("a.png").await.unwrap();
        assert_eq!(store.keys(), ["b.png", "temp/1/report.html"]);
    }
}
