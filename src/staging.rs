//! Staging transport
//!
//! Uploads batch files to the staging area the lakehouse bulk-loads from,
//! and removes them once loaded.

use crate::config::{StagingConfig, StorageBackend};
use crate::error::{SinkError, SinkResult};
use async_trait::async_trait;
use chrono::Utc;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// A batch file placed in the staging area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedObject {
    /// Key relative to the staging root
    pub key: String,
    /// Location the lakehouse engine reads from (e.g. "s3a://bucket/key")
    pub location: String,
}

/// Upload/delete of staged batch files
#[async_trait]
pub trait StagingTransport: Send + Sync {
    /// Upload a batch file; every call yields a fresh key
    async fn upload(&self, file: &Path, stream: &str) -> SinkResult<StagedObject>;

    /// Delete a staged object
    async fn delete(&self, object: &StagedObject) -> SinkResult<()>;
}

/// Build the staging key of an upload
pub fn staging_key(prefix: &str, stream: &str, file_name: &str) -> String {
    let timestamp = Utc::now().format("%Y%m%d-%H%M%S-%6f");
    format!("{}{}_{}_{}", prefix, stream, timestamp, file_name)
}

/// Staging transport backed by `object_store`
pub struct ObjectStoreStaging {
    store: Arc<dyn ObjectStore>,
    key_prefix: String,
    location_root: String,
}

impl ObjectStoreStaging {
    pub fn new(store: Arc<dyn ObjectStore>, key_prefix: String, location_root: String) -> Self {
        Self {
            store,
            key_prefix,
            location_root,
        }
    }

    /// Build the transport for the configured storage backend
    pub async fn from_config(config: &StagingConfig) -> SinkResult<Self> {
        match config.storage_backend {
            StorageBackend::S3 => {
                let bucket = config
                    .s3_bucket
                    .clone()
                    .ok_or_else(|| SinkError::config("s3_bucket is required for S3 staging"))?;

                // AWS credentials from environment (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY)
                let mut builder = AmazonS3Builder::from_env().with_bucket_name(&bucket);

                if let Some(region) = &config.s3_region {
                    builder = builder.with_region(region);
                }

                // Custom endpoint for MinIO or S3-compatible storage
                if let Some(endpoint) = &config.s3_endpoint {
                    builder = builder
                        .with_endpoint(endpoint)
                        .with_virtual_hosted_style_request(false);
                }

                if config.s3_allow_http {
                    builder = builder.with_allow_http(true);
                }

                let store = builder.build().map_err(|e| {
                    SinkError::staging_with_source("Failed to configure S3 staging", e)
                })?;

                info!("Using S3 staging bucket: {}", bucket);
                Ok(Self::new(
                    Arc::new(store),
                    config.s3_key_prefix.clone(),
                    format!("s3a://{}", bucket),
                ))
            }
            StorageBackend::Local => {
                let root = config
                    .local_path
                    .clone()
                    .ok_or_else(|| SinkError::config("local_path is required for local staging"))?;

                tokio::fs::create_dir_all(&root).await?;
                let root = tokio::fs::canonicalize(&root).await?;

                let store = LocalFileSystem::new_with_prefix(&root).map_err(|e| {
                    SinkError::staging_with_source("Failed to configure local staging", e)
                })?;

                info!("Using local staging directory: {}", root.display());
                Ok(Self::new(
                    Arc::new(store),
                    config.s3_key_prefix.clone(),
                    format!("file://{}", root.display()),
                ))
            }
        }
    }
}

#[async_trait]
impl StagingTransport for ObjectStoreStaging {
    async fn upload(&self, file: &Path, stream: &str) -> SinkResult<StagedObject> {
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| SinkError::staging(format!("Not a file: {}", file.display())))?;

        let key = staging_key(&self.key_prefix, stream, &file_name);
        let bytes = tokio::fs::read(file).await?;
        let size = bytes.len();

        self.store
            .put(&ObjectPath::from(key.as_str()), PutPayload::from(bytes))
            .await
            .map_err(|e| {
                SinkError::staging_with_source(format!("Failed to upload {} to staging", key), e)
            })?;

        debug!(
            "Uploaded {} ({} bytes) to staging key {}",
            file.display(),
            size,
            key
        );

        Ok(StagedObject {
            location: format!("{}/{}", self.location_root.trim_end_matches('/'), key),
            key,
        })
    }

    async fn delete(&self, object: &StagedObject) -> SinkResult<()> {
        self.store
            .delete(&ObjectPath::from(object.key.as_str()))
            .await
            .map_err(|e| {
                SinkError::staging_with_source(
                    format!("Failed to delete {} from staging", object.key),
                    e,
                )
            })
    }
}
