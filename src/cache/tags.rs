//! Tag index: the inverted mapping from tag to the keys labelled with it.
//!
//! The index lives in a single blob (`tags/tags.json`) shared by both
//! partitions. Every mutation is a whole-blob read-modify-write; two
//! concurrent writers racing on the same tag can drop one another's index
//! entry. The underlying cache entry survives such a race, only its tag
//! membership is lost, and that weakness is accepted (the cache entry is
//! still served, a later revalidation may simply miss it).

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use tracing::warn;

use super::backend::{BackendError, BlobBackend};
use super::keys::TAG_INDEX_BLOB;

type TagMap = BTreeMap<String, Vec<String>>;

pub struct TagIndex {
    backend: Arc<dyn BlobBackend>,
}

impl TagIndex {
    pub fn new(backend: Arc<dyn BlobBackend>) -> Self {
        Self { backend }
    }

    /// Record `key` under each tag and drop it from tags its latest write
    /// no longer declares, then write the whole index back. Membership
    /// reflects the most recent tagged write of a key.
    pub async fn add(&self, key: &str, tags: &[String]) -> Result<(), BackendError> {
        if tags.is_empty() {
            return Ok(());
        }

        let mut map = self.load().await?;
        let mut changed = false;
        map.retain(|tag, keys| {
            if tags.iter().any(|declared| declared == tag) {
                return true;
            }
            let before = keys.len();
            keys.retain(|existing| existing != key);
            if keys.len() != before {
                changed = true;
            }
            !keys.is_empty()
        });
        for tag in tags {
            let keys = map.entry(tag.clone()).or_default();
            if !keys.iter().any(|existing| existing == key) {
                keys.push(key.to_string());
                changed = true;
            }
        }

        if changed {
            self.store(&map).await?;
        }
        Ok(())
    }

    /// Keys currently labelled with `tag`, in insertion order.
    pub async fn keys_for(&self, tag: &str) -> Result<Vec<String>, BackendError> {
        let map = self.load().await?;
        Ok(map.get(tag).cloned().unwrap_or_default())
    }

    /// Remove the given keys from every tag's list in one rewrite, dropping
    /// tags whose lists become empty.
    pub async fn bulk_remove(&self, keys: &HashSet<String>) -> Result<(), BackendError> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut map = self.load().await?;
        let before: usize = map.values().map(Vec::len).sum();
        map.retain(|_, tagged| {
            tagged.retain(|key| !keys.contains(key));
            !tagged.is_empty()
        });
        let after: usize = map.values().map(Vec::len).sum();

        if before != after {
            self.store(&map).await?;
        }
        Ok(())
    }

    /// Current tag → keys snapshot.
    pub async fn snapshot(&self) -> Result<BTreeMap<String, Vec<String>>, BackendError> {
        self.load().await
    }

    async fn load(&self) -> Result<TagMap, BackendError> {
        match self.backend.get(TAG_INDEX_BLOB).await? {
            Some(bytes) => match serde_json::from_slice(&bytes) {
                Ok(map) => Ok(map),
                Err(err) => {
                    // An unreadable index means tag membership is already
                    // lost; start over rather than refuse every mutation.
                    warn!(
                        target = "strato::tags",
                        error = %err,
                        "tag index blob is corrupt, resetting to empty"
                    );
                    Ok(TagMap::new())
                }
            },
            None => {
                // Created lazily on first access. Concurrent creators
                // overwrite each other with the same empty value.
                let empty = TagMap::new();
                self.store(&empty).await?;
                Ok(empty)
            }
        }
    }

    async fn store(&self, map: &TagMap) -> Result<(), BackendError> {
        let bytes = serde_json::to_vec(map)
            .map_err(|err| BackendError::remote(format!("tag index serialization: {err}")))?;
        self.backend.put(TAG_INDEX_BLOB, Bytes::from(bytes)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::MemoryBackend;

    fn index() -> (Arc<MemoryBackend>, TagIndex) {
        let backend = Arc::new(MemoryBackend::new());
        let index = TagIndex::new(backend.clone() as Arc<dyn BlobBackend>);
        (backend, index)
    }

    #[tokio::test]
    async fn first_access_creates_an_empty_index() {
        let (backend, index) = index();

        assert!(index.keys_for("blog").await.unwrap().is_empty());
        let raw = backend.get(TAG_INDEX_BLOB).await.unwrap().expect("blob");
        assert_eq!(&raw[..], b"{}");
    }

    #[tokio::test]
    async fn add_is_idempotent_per_key() {
        let (_backend, index) = index();

        let tags = vec!["blog".to_string(), "news".to_string()];
        index.add("post-1", &tags).await.unwrap();
        index.add("post-1", &tags).await.unwrap();
        index.add("post-2", &tags[..1].to_vec()).await.unwrap();

        assert_eq!(index.keys_for("blog").await.unwrap(), vec!["post-1", "post-2"]);
        assert_eq!(index.keys_for("news").await.unwrap(), vec!["post-1"]);
    }

    #[tokio::test]
    async fn bulk_remove_drops_empty_tags() {
        let (_backend, index) = index();

        index
            .add("post-1", &["blog".to_string(), "news".to_string()])
            .await
            .unwrap();
        index.add("post-2", &["blog".to_string()]).await.unwrap();

        let removed: HashSet<String> = ["post-1".to_string()].into();
        index.bulk_remove(&removed).await.unwrap();

        let snapshot = index.snapshot().await.unwrap();
        assert_eq!(snapshot.get("blog").map(Vec::as_slice), Some(&["post-2".to_string()][..]));
        assert!(!snapshot.contains_key("news"));
    }

    #[tokio::test]
    async fn retagging_a_key_drops_stale_memberships() {
        let (_backend, index) = index();

        index.add("post-1", &["old".to_string()]).await.unwrap();
        index.add("post-1", &["new".to_string()]).await.unwrap();

        assert!(index.keys_for("old").await.unwrap().is_empty());
        assert_eq!(index.keys_for("new").await.unwrap(), vec!["post-1"]);
    }

    #[tokio::test]
    async fn corrupt_index_resets_to_empty() {
        let (backend, index) = index();
        backend
            .put(TAG_INDEX_BLOB, Bytes::from_static(b"not json"))
            .await
            .unwrap();

        assert!(index.keys_for("blog").await.unwrap().is_empty());
        index.add("post-1", &["blog".to_string()]).await.unwrap();
        assert_eq!(index.keys_for("blog").await.unwrap(), vec!["post-1"]);
    }
}
