use std::path::{Path, PathBuf};
use std::sync::Arc;

use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::ObjectStore;
use tracing::info;

use docproc_core::config::{AwsConfig, StorageConfig};

use crate::error::StorageError;

/// Where uploads physically live.
pub enum StorageBackend {
    Local(LocalBackend),
    S3(S3Backend),
    Memory(Arc<dyn ObjectStore>),
}

impl StorageBackend {
    /// S3 when AWS credentials and a bucket are configured, local disk otherwise.
    pub fn from_config(storage: &StorageConfig, aws: &AwsConfig) -> Result<Self, StorageError> {
        if aws.is_configured() {
            Ok(StorageBackend::S3(S3Backend::new(aws)?))
        } else {
            Ok(StorageBackend::Local(LocalBackend::new(&storage.upload_dir)?))
        }
    }

    pub fn in_memory() -> Self {
        StorageBackend::Memory(Arc::new(InMemory::new()))
    }

    pub fn store_arc(&self) -> Arc<dyn ObjectStore> {
        match self {
            StorageBackend::Local(b) => b.store.clone(),
            StorageBackend::S3(b) => b.store.clone(),
            StorageBackend::Memory(store) => store.clone(),
        }
    }

    /// Key prefix under which uploads are written.
    pub fn prefix(&self) -> &str {
        match self {
            StorageBackend::S3(b) => &b.prefix,
            _ => "",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StorageBackend::Local(_) => "local",
            StorageBackend::S3(_) => "s3",
            StorageBackend::Memory(_) => "memory",
        }
    }
}

/// Local filesystem backend rooted at the upload directory.
pub struct LocalBackend {
    pub store: Arc<dyn ObjectStore>,
    pub root: PathBuf,
}

impl LocalBackend {
    pub fn new(upload_dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(upload_dir)?;
        let canonical = std::fs::canonicalize(upload_dir)?;
        let store = LocalFileSystem::new_with_prefix(&canonical)?;
        info!("Uploads: local backend at {}", canonical.display());
        Ok(Self {
            store: Arc::new(store),
            root: canonical,
        })
    }
}

/// S3 backend.
pub struct S3Backend {
    pub store: Arc<dyn ObjectStore>,
    pub bucket: String,
    pub prefix: String,
}

impl S3Backend {
    pub fn new(aws: &AwsConfig) -> Result<Self, StorageError> {
        let bucket = aws
            .s3_bucket
            .as_deref()
            .ok_or_else(|| StorageError::NotConfigured("S3_BUCKET not set".into()))?;

        let mut builder = AmazonS3Builder::new()
            .with_region(&aws.region)
            .with_bucket_name(bucket);

        if let Some(ref key) = aws.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(ref secret) = aws.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(ref token) = aws.session_token {
            builder = builder.with_token(token);
        }
        if let Some(ref endpoint) = aws.endpoint_url {
            // object_store requires an absolute URL
            let endpoint_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                endpoint.clone()
            } else {
                format!("https://{}", endpoint)
            };
            builder = builder
                .with_endpoint(&endpoint_url)
                .with_allow_http(endpoint_url.starts_with("http://"));
        }

        let store = builder.build()?;
        let prefix = aws
            .s3_prefix
            .as_deref()
            .unwrap_or("uploads")
            .trim_matches('/')
            .to_string();

        info!("Uploads: S3 backend s3://{}/{} (region: {})", bucket, prefix, aws.region);

        Ok(Self {
            store: Arc::new(store),
            bucket: bucket.to_string(),
            prefix,
        })
    }
}
