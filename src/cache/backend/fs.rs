//! Local-filesystem backend: one file per blob under a root directory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use uuid::Uuid;

use super::{BackendError, BlobBackend};

/// Filesystem-backed blob storage.
///
/// Writes go through a unique temp file in the destination directory and
/// are published with a rename, so readers never observe a torn blob.
#[derive(Debug)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    /// Initialise storage rooted at the provided directory, creating it if
    /// necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a blob name beneath the root, rejecting absolute paths and
    /// parent-directory traversal.
    fn resolve(&self, name: &str) -> Result<PathBuf, BackendError> {
        let relative = Path::new(name);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(BackendError::invalid_name(name));
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobBackend for FsBackend {
    async fn get(&self, name: &str) -> Result<Option<Bytes>, BackendError> {
        let path = self.resolve(name)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(BackendError::Io(err)),
        }
    }

    async fn put(&self, name: &str, bytes: Bytes) -> Result<(), BackendError> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
        fs::write(&temp, &bytes).await?;
        match fs::rename(&temp, &path).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = fs::remove_file(&temp).await;
                Err(BackendError::Io(err))
            }
        }
    }

    async fn delete(&self, name: &str) -> Result<bool, BackendError> {
        let path = self.resolve(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(BackendError::Io(err)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        // Blob names are flat within a namespace directory, so a prefix
        // splits into a directory part and a leading filename fragment.
        let (dir, fragment) = match prefix.rfind('/') {
            Some(pos) => (&prefix[..pos], &prefix[pos + 1..]),
            None => ("", prefix),
        };
        let dir_path = self.resolve(dir)?;

        let mut reader = match fs::read_dir(&dir_path).await {
            Ok(reader) => reader,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(BackendError::Io(err)),
        };

        let mut names = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(file_name) = entry.file_name().into_string() else {
                continue;
            };
            if !file_name.starts_with(fragment) {
                continue;
            }
            if dir.is_empty() {
                names.push(file_name);
            } else {
                names.push(format!("{dir}/{file_name}"));
            }
        }

        names.sort();
        Ok(names)
    }
}
