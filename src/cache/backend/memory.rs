//! In-memory backend, used for fast-path configurations and tests.
//!
//! Owned by the store instance that constructed it; never a process-wide
//! global, so isolated instances stay isolated.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::{BackendError, BlobBackend};

#[derive(Debug, Default)]
pub struct MemoryBackend {
    blobs: DashMap<String, Bytes>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobBackend for MemoryBackend {
    async fn get(&self, name: &str) -> Result<Option<Bytes>, BackendError> {
        Ok(self.blobs.get(name).map(|entry| entry.value().clone()))
    }

    async fn put(&self, name: &str, bytes: Bytes) -> Result<(), BackendError> {
        self.blobs.insert(name.to_string(), bytes);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, BackendError> {
        Ok(self.blobs.remove(name).is_some())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        let mut names: Vec<String> = self
            .blobs
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn instances_are_isolated() {
        let a = MemoryBackend::new();
        let b = MemoryBackend::new();

        a.put("fetch-cache/k.json", Bytes::from_static(b"1"))
            .await
            .unwrap();

        assert!(a.get("fetch-cache/k.json").await.unwrap().is_some());
        assert!(b.get("fetch-cache/k.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_reports_prior_existence() {
        let backend = MemoryBackend::new();
        backend
            .put("route-cache/k.json", Bytes::new())
            .await
            .unwrap();

        assert!(backend.delete("route-cache/k.json").await.unwrap());
        assert!(!backend.delete("route-cache/k.json").await.unwrap());
    }

    #[tokio::test]
    async fn list_is_sorted_and_prefix_scoped() {
        let backend = MemoryBackend::new();
        backend.put("route-cache/b.json", Bytes::new()).await.unwrap();
        backend.put("route-cache/a.json", Bytes::new()).await.unwrap();
        backend.put("fetch-cache/a.json", Bytes::new()).await.unwrap();

        let listed = backend.list("route-cache/").await.unwrap();
        assert_eq!(listed, vec!["route-cache/a.json", "route-cache/b.json"]);
    }
}
