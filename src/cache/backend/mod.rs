//! Storage backends.
//!
//! A backend stores named byte blobs. Each operation is atomic per blob;
//! nothing here offers cross-blob transactions, so higher layers tolerate
//! partial completion of multi-blob work.

mod fs;
mod memory;
mod s3;

pub use fs::FsBackend;
pub use memory::MemoryBackend;
pub use s3::S3Backend;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid blob name: {name}")]
    InvalidName { name: String },
    #[error("remote storage error: {message}")]
    Remote { message: String },
}

impl BackendError {
    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidName { name: name.into() }
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }
}

/// Uniform contract over named byte blobs.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Fetch a blob's bytes, or `None` when it does not exist.
    async fn get(&self, name: &str) -> Result<Option<Bytes>, BackendError>;

    /// Write a blob, replacing any previous contents atomically.
    async fn put(&self, name: &str, bytes: Bytes) -> Result<(), BackendError>;

    /// Remove a blob. Returns `false` when it was already absent; absence
    /// is never an error.
    async fn delete(&self, name: &str) -> Result<bool, BackendError>;

    /// List blob names under a prefix. Eventual consistency is acceptable;
    /// callers only use this for partition iteration and counting.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, BackendError>;
}
