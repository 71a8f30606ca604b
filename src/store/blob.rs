use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::PersistenceError;

/// Content-addressed storage for attachment payloads.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` and return its reference. Storing the same bytes twice
    /// returns the same reference.
    async fn put(&self, data: &[u8]) -> Result<String, PersistenceError>;

    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>, PersistenceError>;
}

/// SHA256 hex digest, used as the blob reference
pub fn content_ref(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Blobs as files under `root/<first two hex chars>/<sha256>`.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn blob_path(&self, blob_ref: &str) -> PathBuf {
        let shard = blob_ref.get(..2).unwrap_or("xx");
        self.root.join(shard).join(blob_ref)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, data: &[u8]) -> Result<String, PersistenceError> {
        let blob_ref = content_ref(data);
        let path = self.blob_path(&blob_ref);

        if tokio::fs::try_exists(&path).await? {
            return Ok(blob_ref);
        }

        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        // Readers never see a partially written blob
        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!("Stored blob {} ({} bytes)", blob_ref, data.len());
        Ok(blob_ref)
    }

    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>, PersistenceError> {
        match tokio::fs::read(self.blob_path(blob_ref)).await {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(PersistenceError::MissingBlob(blob_ref.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}
