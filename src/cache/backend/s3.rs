//! Remote object-storage backend: one object per blob in an S3 bucket.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;

use super::{BackendError, BlobBackend};

/// S3-backed blob storage.
///
/// Credentials and region come from the ambient AWS environment. An
/// optional key prefix scopes every blob, so several stores can share one
/// bucket.
#[derive(Debug)]
pub struct S3Backend {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: Option<String>,
}

impl S3Backend {
    /// Connect using the default credential/region chain.
    pub async fn connect(bucket: String, prefix: Option<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::with_client(aws_sdk_s3::Client::new(&config), bucket, prefix)
    }

    pub fn with_client(client: aws_sdk_s3::Client, bucket: String, prefix: Option<String>) -> Self {
        let prefix = prefix
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());
        Self {
            client,
            bucket,
            prefix,
        }
    }

    fn object_key(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{name}"),
            None => name.to_string(),
        }
    }

    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        match &self.prefix {
            Some(prefix) => key
                .strip_prefix(prefix.as_str())
                .map(|rest| rest.trim_start_matches('/'))
                .unwrap_or(key),
            None => key,
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let service = err.into_service_error();
                if service.is_not_found() {
                    Ok(false)
                } else {
                    Err(BackendError::remote(service.to_string()))
                }
            }
        }
    }
}

#[async_trait]
impl BlobBackend for S3Backend {
    async fn get(&self, name: &str) -> Result<Option<Bytes>, BackendError> {
        let key = self.object_key(name);
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(object) => {
                let data = object
                    .body
                    .collect()
                    .await
                    .map_err(|err| BackendError::remote(err.to_string()))?;
                Ok(Some(data.into_bytes()))
            }
            Err(err) => {
                let service = err.into_service_error();
                if service.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(BackendError::remote(service.to_string()))
                }
            }
        }
    }

    async fn put(&self, name: &str, bytes: Bytes) -> Result<(), BackendError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(name))
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|err| BackendError::remote(err.into_service_error().to_string()))?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, BackendError> {
        // S3 deletes are silent about prior existence, and the store counts
        // keys it actually removed. A head-then-delete probe races with
        // concurrent writers, which the contract accepts.
        let key = self.object_key(name);
        let existed = self.exists(&key).await?;
        if !existed {
            return Ok(false);
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|err| BackendError::remote(err.into_service_error().to_string()))?;
        Ok(true)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        let mut names = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(self.object_key(prefix))
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| BackendError::remote(err.to_string()))?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    names.push(self.strip_prefix(key).to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }
}
