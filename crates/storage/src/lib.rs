//! Transient storage for uploaded documents.
//!
//! Uploads live only until their task finishes extraction. The orchestrator
//! persists the bytes on submission, reads them back once admitted, and
//! deletes them on every exit path.

pub mod backend;
pub mod error;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use docproc_core::FileInfo;

pub use backend::{LocalBackend, S3Backend, StorageBackend};
pub use error::StorageError;

/// Opaque reference to a stored upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadHandle(String);

impl UploadHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UploadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait UploadStore: Send + Sync {
    async fn persist(&self, bytes: Bytes, file: &FileInfo) -> Result<UploadHandle, StorageError>;

    async fn read(&self, handle: &UploadHandle) -> Result<Bytes, StorageError>;

    /// Remove an upload. Deleting a missing upload succeeds.
    async fn delete(&self, handle: &UploadHandle) -> Result<(), StorageError>;

    async fn health(&self) -> bool;
}

/// [`UploadStore`] over any `object_store` backend.
pub struct ObjectUploadStore {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    label: &'static str,
}

impl ObjectUploadStore {
    pub fn new(backend: &StorageBackend) -> Self {
        Self {
            store: backend.store_arc(),
            prefix: backend.prefix().to_string(),
            label: backend.label(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(&StorageBackend::in_memory())
    }

    pub fn backend_label(&self) -> &'static str {
        self.label
    }

    fn object_path(&self, name: &str) -> ObjectPath {
        if self.prefix.is_empty() {
            ObjectPath::from(name)
        } else {
            ObjectPath::from(format!("{}/{}", self.prefix, name))
        }
    }

    fn prefix_path(&self) -> Option<ObjectPath> {
        (!self.prefix.is_empty()).then(|| ObjectPath::from(self.prefix.as_str()))
    }

    /// Delete uploads last modified before `cutoff`. Run at startup to clear
    /// files orphaned by a crash mid-task.
    pub async fn sweep_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let prefix = self.prefix_path();
        let stale: Vec<ObjectPath> = self
            .store
            .list(prefix.as_ref())
            .try_filter(|meta| futures::future::ready(meta.last_modified < cutoff))
            .map_ok(|meta| meta.location)
            .try_collect()
            .await?;

        let mut removed = 0usize;
        for location in stale {
            match self.store.delete(&location).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %location, error = %e, "failed to delete stale upload"),
            }
        }
        if removed > 0 {
            info!(removed, "removed stale uploads");
        }
        Ok(removed)
    }
}

#[async_trait]
impl UploadStore for ObjectUploadStore {
    async fn persist(&self, bytes: Bytes, file: &FileInfo) -> Result<UploadHandle, StorageError> {
        let ext = file.extension();
        let name = if ext.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            format!("{}.{}", Uuid::new_v4(), ext)
        };
        let path = self.object_path(&name);
        let size = bytes.len();
        self.store.put(&path, bytes.into()).await?;
        debug!(handle = %path, size, "upload persisted");
        Ok(UploadHandle(path.to_string()))
    }

    async fn read(&self, handle: &UploadHandle) -> Result<Bytes, StorageError> {
        let path = ObjectPath::from(handle.as_str());
        let result = self
            .store
            .get(&path)
            .await
            .map_err(|e| StorageError::from_store(e, handle.as_str()))?;
        Ok(result.bytes().await?)
    }

    async fn delete(&self, handle: &UploadHandle) -> Result<(), StorageError> {
        let path = ObjectPath::from(handle.as_str());
        match self.store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {
                debug!(handle = %handle, "upload deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn health(&self) -> bool {
        let prefix = self.prefix_path();
        self.store.list_with_delimiter(prefix.as_ref()).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf(size: u64) -> FileInfo {
        FileInfo::new("report.pdf", size, "application/pdf")
    }

    #[tokio::test]
    async fn persist_read_delete_in_memory() {
        let store = ObjectUploadStore::in_memory();
        let handle = store.persist(Bytes::from_static(b"%PDF-1.4"), &pdf(8)).await.unwrap();
        assert!(handle.as_str().ends_with(".pdf"));

        assert_eq!(store.read(&handle).await.unwrap(), Bytes::from_static(b"%PDF-1.4"));

        store.delete(&handle).await.unwrap();
        let err = store.read(&handle).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));

        // second delete is a no-op
        store.delete(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn handles_are_unique() {
        let store = ObjectUploadStore::in_memory();
        let a = store.persist(Bytes::from_static(b"a"), &pdf(1)).await.unwrap();
        let b = store.persist(Bytes::from_static(b"a"), &pdf(1)).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn local_backend_round_trips_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = StorageBackend::Local(LocalBackend::new(tmp.path()).unwrap());
        let store = ObjectUploadStore::new(&backend);

        let handle = store
            .persist(Bytes::from_static(b"hello"), &FileInfo::new("a.txt", 5, "text/plain"))
            .await
            .unwrap();
        assert!(tmp.path().join(handle.as_str()).exists());
        assert!(store.health().await);

        store.delete(&handle).await.unwrap();
        assert!(!tmp.path().join(handle.as_str()).exists());
    }

    #[tokio::test]
    async fn sweep_removes_only_old_uploads() {
        let store = ObjectUploadStore::in_memory();
        let handle = store.persist(Bytes::from_static(b"x"), &pdf(1)).await.unwrap();

        let removed = store
            .sweep_older_than(Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(removed, 0);

        let removed = store
            .sweep_older_than(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.read(&handle).await.is_err());
    }
}
