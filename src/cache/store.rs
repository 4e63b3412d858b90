//! Partitioned cache store.
//!
//! Routes every key to the FETCH or ROUTE partition from its
//! [`StoredValue`] variant and exposes the host-facing operations over a
//! [`BlobBackend`] plus the [`TagIndex`]. Reads return `None` on any miss,
//! corruption, or decode failure; writes are best-effort and never fail the
//! caller's render or fetch path.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::backend::{BackendError, BlobBackend};
use super::codec::{self, CodecError};
use super::edge::EdgeNotifier;
use super::keys::{entry_blob_name, partition_prefix};
use super::payload::{Partition, StoredValue};
use super::tags::TagIndex;

const SOURCE: &str = "strato::store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("cache record serialization failed: {0}")]
    Record(#[from] serde_json::Error),
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl StoreError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// A stored entry as handed back to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub value: StoredValue,
    /// Unix milliseconds, stamped by the store at write time.
    pub last_modified_ms: i64,
    pub tags: Vec<String>,
    /// Host-supplied revalidation policy; `None` means no policy.
    pub revalidate_after_secs: Option<u64>,
}

/// On-blob shape of one entry. The logical key is persisted because blob
/// naming is lossy.
#[derive(Debug, Serialize, Deserialize)]
struct EntryRecord {
    key: String,
    value: serde_json::Value,
    last_modified: i64,
    tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    revalidate: Option<u64>,
}

/// One row of the administrative stats response.
#[derive(Debug, Clone, Serialize)]
pub struct StatsEntry {
    pub key: String,
    pub tags: Vec<String>,
    #[serde(rename = "lastModified")]
    pub last_modified: i64,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub keys: Vec<String>,
    pub entries: Vec<StatsEntry>,
}

/// ROUTE keys exempt from bulk clears: permanently-static content with no
/// revalidation policy, derived from the host's build manifest at clear
/// time. Never persisted cache state.
#[derive(Debug, Default, Clone)]
pub struct StaticRouteSet {
    routes: HashSet<String>,
}

impl StaticRouteSet {
    pub fn new(routes: impl IntoIterator<Item = String>) -> Self {
        Self {
            routes: routes.into_iter().collect(),
        }
    }

    /// Read a manifest file holding a JSON array of route keys. A missing
    /// file yields the empty set; an unreadable one is an error, since
    /// clearing without the exclusion list would delete static content.
    pub async fn load(path: &Path) -> Result<Self, StoreError> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(err) => return Err(StoreError::Backend(BackendError::Io(err))),
        };
        let routes: Vec<String> = serde_json::from_slice(&raw)?;
        Ok(Self::new(routes))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.routes.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// The tag-addressable, partitioned cache store.
pub struct CacheStore {
    backend: Arc<dyn BlobBackend>,
    tags: TagIndex,
    edge: Option<Arc<EdgeNotifier>>,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn BlobBackend>, edge: Option<Arc<EdgeNotifier>>) -> Self {
        let tags = TagIndex::new(Arc::clone(&backend));
        Self {
            backend,
            tags,
            edge,
        }
    }

    pub fn backend(&self) -> &Arc<dyn BlobBackend> {
        &self.backend
    }

    /// Look a key up in the hinted partition only. Every failure mode —
    /// absent blob, unreadable backend, corrupt record, codec failure — is
    /// a miss, never an error.
    pub async fn get(&self, key: &str, hint: Partition) -> Option<CacheEntry> {
        let blob = entry_blob_name(hint, key);
        let bytes = match self.backend.get(&blob).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                counter!("strato_cache_miss_total").increment(1);
                return None;
            }
            Err(err) => {
                debug!(target = SOURCE, key, blob, error = %err, "read failed, treating as miss");
                counter!("strato_cache_miss_total").increment(1);
                return None;
            }
        };

        match Self::decode_entry(hint, &bytes) {
            Ok(entry) => {
                counter!("strato_cache_hit_total").increment(1);
                Some(entry)
            }
            Err(err) => {
                debug!(target = SOURCE, key, blob, error = %err, "undecodable entry, treating as miss");
                counter!("strato_cache_miss_total").increment(1);
                None
            }
        }
    }

    /// Persist an entry. Best-effort: failures are logged and swallowed so
    /// a broken cache never fails the render or fetch that triggered the
    /// write.
    pub async fn set(
        &self,
        key: &str,
        value: StoredValue,
        tags: &[String],
        revalidate_after_secs: Option<u64>,
    ) {
        let partition = value.partition();
        let tags = dedup_tags(tags);

        // A key lives in exactly one partition: drop any entry the other
        // partition still holds before writing (delete-then-write).
        let other = entry_blob_name(partition.other(), key);
        if let Err(err) = self.backend.delete(&other).await {
            warn!(target = SOURCE, key, blob = other, error = %err, "relocation delete failed");
        }

        let record = EntryRecord {
            key: key.to_string(),
            value: codec::to_value(value.payload()),
            last_modified: now_ms(),
            tags: tags.clone(),
            revalidate: revalidate_after_secs,
        };
        let bytes = match serde_json::to_vec(&record) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(target = SOURCE, key, error = %err, "entry serialization failed, skipping write");
                counter!("strato_cache_write_error_total").increment(1);
                return;
            }
        };

        let blob = entry_blob_name(partition, key);
        if let Err(err) = self.backend.put(&blob, Bytes::from(bytes)).await {
            warn!(target = SOURCE, key, blob, error = %err, "cache write failed, proceeding uncached");
            counter!("strato_cache_write_error_total").increment(1);
            return;
        }

        if !tags.is_empty() {
            if let Err(err) = self.tags.add(key, &tags).await {
                warn!(target = SOURCE, key, error = %err, "tag index update failed");
            }
        }
    }

    /// Remove a single key from whichever partition holds it. Returns
    /// whether an entry was actually deleted.
    pub async fn delete(&self, key: &str) -> bool {
        let deleted = self.delete_entry(key).await;
        if deleted {
            let removed: HashSet<String> = [key.to_string()].into();
            if let Err(err) = self.tags.bulk_remove(&removed).await {
                warn!(target = SOURCE, key, error = %err, "tag index cleanup failed");
            }
        }
        deleted
    }

    /// Invalidate every key labelled with any of the given tags. Returns
    /// the number of keys actually deleted. The index does not record
    /// partitions, so each key is tried against FETCH first, then ROUTE.
    pub async fn revalidate_tags(&self, tags: &[String]) -> usize {
        let mut seen: HashSet<String> = HashSet::new();
        let mut deleted: Vec<String> = Vec::new();

        for tag in tags {
            let keys = match self.tags.keys_for(tag).await {
                Ok(keys) => keys,
                Err(err) => {
                    warn!(target = SOURCE, tag, error = %err, "tag lookup failed");
                    continue;
                }
            };

            for key in keys {
                if !seen.insert(key.clone()) {
                    continue;
                }
                if self.delete_entry(&key).await {
                    deleted.push(key);
                }
            }
        }

        if !deleted.is_empty() {
            // One bulk rewrite for all tags, not one per key.
            let removed: HashSet<String> = deleted.iter().cloned().collect();
            if let Err(err) = self.tags.bulk_remove(&removed).await {
                warn!(target = SOURCE, error = %err, "tag index cleanup failed");
            }

            counter!("strato_cache_revalidated_keys_total").increment(deleted.len() as u64);
            if let Some(edge) = &self.edge {
                edge.spawn_purge_keys(deleted.clone());
            }
        }

        debug!(
            target = SOURCE,
            tags = ?tags,
            deleted = deleted.len(),
            "tag revalidation completed"
        );
        deleted.len()
    }

    /// Clear both partitions, preserving ROUTE keys named in the static
    /// route set. Returns the number of entries removed; calling it twice
    /// in a row clears nothing the second time.
    pub async fn clear_all(&self, static_routes: &StaticRouteSet) -> usize {
        let mut removed_keys: HashSet<String> = HashSet::new();
        let mut cleared = 0usize;

        for partition in [Partition::Fetch, Partition::Route] {
            let blobs = match self.backend.list(&partition_prefix(partition)).await {
                Ok(blobs) => blobs,
                Err(err) => {
                    warn!(target = SOURCE, partition = partition.label(), error = %err, "partition listing failed");
                    continue;
                }
            };

            for blob in blobs {
                let key = self.logical_key(&blob).await;
                if partition == Partition::Route {
                    if let Some(key) = &key {
                        if static_routes.contains(key) {
                            continue;
                        }
                    }
                }

                match self.backend.delete(&blob).await {
                    Ok(true) => {
                        cleared += 1;
                        if let Some(key) = key {
                            removed_keys.insert(key);
                        }
                    }
                    Ok(false) => {}
                    Err(err) => {
                        warn!(target = SOURCE, blob, error = %err, "clear delete failed");
                    }
                }
            }
        }

        if let Err(err) = self.tags.bulk_remove(&removed_keys).await {
            warn!(target = SOURCE, error = %err, "tag index cleanup failed");
        }

        cleared
    }

    /// Enumerate both partitions for the administrative stats surface.
    /// Undecodable blobs are skipped.
    pub async fn stats(&self) -> CacheStats {
        let mut entries = Vec::new();

        for partition in [Partition::Fetch, Partition::Route] {
            let blobs = match self.backend.list(&partition_prefix(partition)).await {
                Ok(blobs) => blobs,
                Err(err) => {
                    warn!(target = SOURCE, partition = partition.label(), error = %err, "partition listing failed");
                    continue;
                }
            };

            for blob in blobs {
                let Ok(Some(bytes)) = self.backend.get(&blob).await else {
                    continue;
                };
                let Ok(record) = serde_json::from_slice::<EntryRecord>(&bytes) else {
                    debug!(target = SOURCE, blob, "skipping undecodable entry in stats");
                    continue;
                };
                entries.push(StatsEntry {
                    key: record.key,
                    tags: record.tags,
                    last_modified: record.last_modified,
                    kind: partition.label(),
                });
            }
        }

        let keys = entries.iter().map(|entry| entry.key.clone()).collect();
        CacheStats {
            size: entries.len(),
            keys,
            entries,
        }
    }

    /// Documented no-op for durable backends; exists to satisfy the host's
    /// handler contract, which calls it between requests.
    pub fn reset_request_cache(&self) {
        debug!(target = SOURCE, "reset_request_cache is a no-op for durable backends");
    }

    /// Try FETCH, then ROUTE. Returns whether a blob was actually removed;
    /// backend failures are logged and count as "not deleted".
    async fn delete_entry(&self, key: &str) -> bool {
        for partition in [Partition::Fetch, Partition::Route] {
            let blob = entry_blob_name(partition, key);
            match self.backend.delete(&blob).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(err) => {
                    warn!(target = SOURCE, key, blob, error = %err, "delete failed");
                }
            }
        }
        false
    }

    /// Recover the logical key stored inside a blob, for index cleanup and
    /// static-route comparison. `None` when the record cannot be read.
    async fn logical_key(&self, blob: &str) -> Option<String> {
        let bytes = self.backend.get(blob).await.ok().flatten()?;
        let record: EntryRecord = serde_json::from_slice(&bytes).ok()?;
        Some(record.key)
    }

    fn decode_entry(partition: Partition, bytes: &[u8]) -> Result<CacheEntry, StoreError> {
        let record: EntryRecord = serde_json::from_slice(bytes)?;
        let payload = codec::from_value(record.value)?;
        Ok(CacheEntry {
            key: record.key,
            value: StoredValue::from_parts(partition, payload),
            last_modified_ms: record.last_modified,
            tags: record.tags,
            revalidate_after_secs: record.revalidate,
        })
    }
}

fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn dedup_tags(tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.iter()
        .filter(|tag| seen.insert(tag.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::MemoryBackend;
    use crate::cache::payload::Payload;

    fn store() -> CacheStore {
        CacheStore::new(Arc::new(MemoryBackend::new()), None)
    }

    fn route(text: &str) -> StoredValue {
        StoredValue::Route(Payload::text(text))
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let store = store();
        assert!(store.get("page", Partition::Route).await.is_none());

        store.set("page", route("<html>"), &["pages".to_string()], None).await;

        let entry = store.get("page", Partition::Route).await.expect("hit");
        assert_eq!(entry.key, "page");
        assert_eq!(entry.value, route("<html>"));
        assert_eq!(entry.tags, vec!["pages"]);
        assert!(entry.last_modified_ms > 0);
    }

    #[tokio::test]
    async fn get_never_searches_the_other_partition() {
        let store = store();
        store.set("k", StoredValue::Fetch(Payload::Null), &[], None).await;

        assert!(store.get("k", Partition::Fetch).await.is_some());
        assert!(store.get("k", Partition::Route).await.is_none());
    }

    #[tokio::test]
    async fn overwrite_relocates_between_partitions() {
        let store = store();
        store.set("k", StoredValue::Fetch(Payload::Null), &[], None).await;
        store.set("k", route("now a route"), &[], None).await;

        assert!(store.get("k", Partition::Fetch).await.is_none());
        assert!(store.get("k", Partition::Route).await.is_some());
        assert_eq!(store.stats().await.size, 1);
    }

    #[tokio::test]
    async fn overwrite_replaces_tags_wholesale() {
        let store = store();
        store.set("k", route("v1"), &["old".to_string()], None).await;
        store.set("k", route("v2"), &["new".to_string()], None).await;

        let entry = store.get("k", Partition::Route).await.expect("hit");
        assert_eq!(entry.tags, vec!["new"]);
    }

    #[tokio::test]
    async fn revalidate_tag_deletes_only_its_keys() {
        let store = store();
        store.set("k1", route("a"), &["t".to_string()], None).await;
        store.set("k2", StoredValue::Fetch(Payload::Null), &["t".to_string()], None).await;
        store.set("k3", route("c"), &["u".to_string()], None).await;

        let count = store.revalidate_tags(&["t".to_string()]).await;
        assert_eq!(count, 2);

        assert!(store.get("k1", Partition::Route).await.is_none());
        assert!(store.get("k2", Partition::Fetch).await.is_none());
        assert!(store.get("k3", Partition::Route).await.is_some());

        // Index entry for "t" is gone: a second revalidation is a no-op.
        assert_eq!(store.revalidate_tags(&["t".to_string()]).await, 0);
    }

    #[tokio::test]
    async fn delete_removes_the_entry_and_its_index_memberships() {
        let store = store();
        store.set("k", route("v"), &["t".to_string()], None).await;
        store.set("other", route("w"), &["t".to_string()], None).await;

        assert!(store.delete("k").await);
        assert!(store.get("k", Partition::Route).await.is_none());

        // The index blob no longer references "k".
        let raw = store
            .backend()
            .get(crate::cache::keys::TAG_INDEX_BLOB)
            .await
            .unwrap()
            .expect("index blob");
        let index: std::collections::BTreeMap<String, Vec<String>> =
            serde_json::from_slice(&raw).unwrap();
        assert_eq!(index.get("t").map(Vec::as_slice), Some(&["other".to_string()][..]));

        // Revalidating the shared tag only touches the surviving key.
        assert_eq!(store.revalidate_tags(&["t".to_string()]).await, 1);
        assert!(store.get("other", Partition::Route).await.is_none());

        // Deleting an absent key reports false.
        assert!(!store.delete("k").await);
    }

    #[tokio::test]
    async fn retagged_key_is_not_invalidated_by_its_old_tag() {
        let store = store();
        store.set("k", route("v1"), &["old".to_string()], None).await;
        store.set("k", route("v2"), &["new".to_string()], None).await;

        assert_eq!(store.revalidate_tags(&["old".to_string()]).await, 0);
        assert!(store.get("k", Partition::Route).await.is_some());
        assert_eq!(store.revalidate_tags(&["new".to_string()]).await, 1);
    }

    #[tokio::test]
    async fn revalidate_counts_each_key_once_across_tags() {
        let store = store();
        store
            .set("k", route("a"), &["t".to_string(), "u".to_string()], None)
            .await;

        let count = store
            .revalidate_tags(&["t".to_string(), "u".to_string()])
            .await;
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn revalidate_tolerates_index_entries_without_blobs() {
        let store = store();
        store.set("k", route("a"), &["t".to_string()], None).await;
        assert!(store.delete_entry("k").await);

        // The index still references "k"; revalidation must not error and
        // must not count the ghost.
        assert_eq!(store.revalidate_tags(&["t".to_string()]).await, 0);
    }

    #[tokio::test]
    async fn corrupt_blob_reads_as_miss() {
        let store = store();
        store
            .backend()
            .put("route-cache/bad.json", Bytes::from_static(b"{oops"))
            .await
            .unwrap();

        assert!(store.get("bad", Partition::Route).await.is_none());
    }

    #[tokio::test]
    async fn clear_all_preserves_static_routes_and_is_idempotent() {
        let store = store();
        store.set("static-page", route("s"), &[], None).await;
        store.set("dynamic-page", route("d"), &[], None).await;
        store.set("api-result", StoredValue::Fetch(Payload::Null), &[], None).await;

        let statics = StaticRouteSet::new(["static-page".to_string()]);
        assert_eq!(store.clear_all(&statics).await, 2);

        assert!(store.get("static-page", Partition::Route).await.is_some());
        assert!(store.get("dynamic-page", Partition::Route).await.is_none());
        assert!(store.get("api-result", Partition::Fetch).await.is_none());

        assert_eq!(store.clear_all(&statics).await, 0);
    }

    #[tokio::test]
    async fn stats_reports_both_partitions() {
        let store = store();
        store.set("r", route("x"), &["t".to_string()], None).await;
        store.set("f", StoredValue::Fetch(Payload::Null), &[], None).await;

        let stats = store.stats().await;
        assert_eq!(stats.size, 2);
        assert!(stats.keys.contains(&"r".to_string()));
        assert!(stats.keys.contains(&"f".to_string()));

        let fetch_entry = stats.entries.iter().find(|e| e.key == "f").expect("f");
        assert_eq!(fetch_entry.kind, "fetch");
        let route_entry = stats.entries.iter().find(|e| e.key == "r").expect("r");
        assert_eq!(route_entry.kind, "route");
        assert_eq!(route_entry.tags, vec!["t"]);
    }

    #[tokio::test]
    async fn duplicate_tags_are_deduplicated() {
        let store = store();
        store
            .set(
                "k",
                route("v"),
                &["t".to_string(), "t".to_string(), "u".to_string()],
                None,
            )
            .await;

        let entry = store.get("k", Partition::Route).await.expect("hit");
        assert_eq!(entry.tags, vec!["t", "u"]);
    }

    #[tokio::test]
    async fn concrete_blog_scenario() {
        let store = store();
        let mut body = std::collections::BTreeMap::new();
        body.insert("kind".to_string(), Payload::text("FETCH"));
        body.insert("body".to_string(), Payload::bytes(&b"hello"[..]));
        let value = StoredValue::Fetch(Payload::Object(body));

        store.set("post-1", value.clone(), &["blog".to_string()], None).await;

        let entry = store.get("post-1", Partition::Fetch).await.expect("hit");
        assert_eq!(entry.value, value);
        assert_eq!(entry.tags, vec!["blog"]);

        assert_eq!(store.revalidate_tags(&["blog".to_string()]).await, 1);
        assert!(store.get("post-1", Partition::Fetch).await.is_none());
    }
}
