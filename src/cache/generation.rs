//! Build-generation guard.
//!
//! On startup, compares the persisted build identity against the current
//! one. A changed identity means the ROUTE partition was rendered by a
//! previous build and must go; FETCH entries are upstream data and survive
//! redeployments untouched. The check runs at most once per process and is
//! skipped entirely while the host is in its build phase, where parallel
//! workers would race on the metadata record.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, warn};

use super::backend::BlobBackend;
use super::edge::EdgeNotifier;
use super::keys::{BUILD_META_BLOB, partition_prefix};
use super::payload::Partition;
use super::store::StoreError;

const SOURCE: &str = "strato::generation";

/// Persisted build identity, stored outside the partitions so cache clears
/// leave it intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildMeta {
    pub build_id: String,
    pub timestamp_ms: i64,
}

/// What the guard found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildCheck {
    /// No persisted identity existed; the current one was recorded.
    FirstRun,
    /// Persisted identity matches the current build.
    Unchanged,
    /// Identity changed; the ROUTE partition was evicted.
    Evicted { routes_removed: usize },
    /// The guard already ran in this process.
    AlreadyChecked,
}

pub struct BuildGuard {
    backend: Arc<dyn BlobBackend>,
    edge: Option<Arc<EdgeNotifier>>,
    current_build_id: String,
    checked: AtomicBool,
}

impl BuildGuard {
    pub fn new(
        backend: Arc<dyn BlobBackend>,
        edge: Option<Arc<EdgeNotifier>>,
        current_build_id: String,
    ) -> Self {
        Self {
            backend,
            edge,
            current_build_id,
            checked: AtomicBool::new(false),
        }
    }

    /// Compare the persisted identity with the current one and evict the
    /// ROUTE partition when they differ. Idempotent per process.
    pub async fn ensure_current(&self) -> Result<BuildCheck, StoreError> {
        if self.checked.swap(true, Ordering::SeqCst) {
            return Ok(BuildCheck::AlreadyChecked);
        }

        let stored = self.read_meta().await?;
        match stored {
            None => {
                self.write_meta().await?;
                info!(
                    target = SOURCE,
                    build_id = %self.current_build_id,
                    "first run, recorded build identity"
                );
                Ok(BuildCheck::FirstRun)
            }
            Some(meta) if meta.build_id == self.current_build_id => Ok(BuildCheck::Unchanged),
            Some(meta) => {
                info!(
                    target = SOURCE,
                    previous = %meta.build_id,
                    current = %self.current_build_id,
                    "build identity changed, evicting route partition"
                );
                let routes_removed = self.evict_routes().await;
                self.write_meta().await?;

                if let Some(edge) = &self.edge {
                    edge.spawn_purge_all();
                }
                Ok(BuildCheck::Evicted { routes_removed })
            }
        }
    }

    async fn read_meta(&self) -> Result<Option<BuildMeta>, StoreError> {
        let Some(bytes) = self.backend.get(BUILD_META_BLOB).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(meta) => Ok(Some(meta)),
            Err(err) => {
                // An unreadable record gives no usable identity; treat it
                // as a changed build so stale routes cannot survive.
                warn!(
                    target = SOURCE,
                    error = %err,
                    "build metadata is corrupt, treating as a build change"
                );
                Ok(Some(BuildMeta {
                    build_id: String::new(),
                    timestamp_ms: 0,
                }))
            }
        }
    }

    async fn write_meta(&self) -> Result<(), StoreError> {
        let meta = BuildMeta {
            build_id: self.current_build_id.clone(),
            timestamp_ms: (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
        };
        let bytes = serde_json::to_vec(&meta)?;
        self.backend.put(BUILD_META_BLOB, Bytes::from(bytes)).await?;
        Ok(())
    }

    /// Bulk, unordered, best-effort: a failed delete leaves a stale route
    /// entry behind, which is then treated as an ordinary cache entry.
    async fn evict_routes(&self) -> usize {
        let blobs = match self
            .backend
            .list(&partition_prefix(Partition::Route))
            .await
        {
            Ok(blobs) => blobs,
            Err(err) => {
                warn!(target = SOURCE, error = %err, "route partition listing failed");
                return 0;
            }
        };

        let mut removed = 0usize;
        for blob in blobs {
            match self.backend.delete(&blob).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(target = SOURCE, blob, error = %err, "route eviction delete failed");
                }
            }
        }
        removed
    }
}
