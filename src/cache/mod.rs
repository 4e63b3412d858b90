//! Strato cache engine.
//!
//! A tag-addressable, partitioned cache store:
//!
//! - **FETCH partition**: remote-fetch results, which survive redeploys
//! - **ROUTE partition**: render/route outputs, evicted on a build change
//!
//! Values are structured [`Payload`] trees (including raw byte buffers and
//! order-stable map containers) carried losslessly through a JSON medium by
//! the [`codec`]. Durable bytes live behind a pluggable [`BlobBackend`];
//! tag bookkeeping lives in the [`TagIndex`]; redeploys are handled by the
//! [`BuildGuard`]; an optional [`EdgeNotifier`] propagates invalidations to
//! an external purge endpoint.

pub mod backend;
pub mod codec;
mod edge;
mod generation;
mod keys;
mod payload;
mod store;
mod tags;

pub use backend::{BackendError, BlobBackend, FsBackend, MemoryBackend, S3Backend};
pub use codec::CodecError;
pub use edge::{EdgeError, EdgeNotifier, PurgeOutcome};
pub use generation::{BuildCheck, BuildGuard, BuildMeta};
pub use keys::{entry_blob_name, partition_prefix, sanitize_key};
pub use payload::{Partition, Payload, StoredValue};
pub use store::{CacheEntry, CacheStats, CacheStore, StaticRouteSet, StatsEntry, StoreError};
pub use tags::TagIndex;
