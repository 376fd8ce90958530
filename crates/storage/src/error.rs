use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload not found: {0}")]
    NotFound(String),

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("{0}")]
    Other(String),
}

impl StorageError {
    /// Map object_store's not-found into [`StorageError::NotFound`].
    pub(crate) fn from_store(err: object_store::Error, handle: &str) -> Self {
        match err {
            object_store::Error::NotFound { .. } => StorageError::NotFound(handle.to_string()),
            other => StorageError::ObjectStore(other),
        }
    }
}
