use crate::app::ports::BlobStorePort;
use crate::domain::{artifact_metadata, marker_metadata, BlobMetadata, ExternalFileId, FetchedContent};
use crate::error::Result;
use std::sync::Arc;

/// Cached workshop artifacts, keyed `{id}.{extension}`.
#[derive(Clone)]
pub struct ContentStore {
    blobs: Arc<dyn BlobStorePort>,
    extension: String,
}

impl ContentStore {
    pub fn new(blobs: Arc<dyn BlobStorePort>, extension: impl Into<String>) -> Self {
        Self { blobs, extension: extension.into() }
    }

    pub fn key(&self, id: &ExternalFileId) -> String {
        id.artifact_key(&self.extension)
    }

    pub async fn exists(&self, id: &ExternalFileId) -> Result<bool> {
        self.blobs.exists(&self.key(id)).await
    }

    /// Write-once is the caller's job: delete first when replacing.
    pub async fn put(&self, id: &ExternalFileId, content: FetchedContent) -> Result<String> {
        let key = self.key(id);
        let metadata = artifact_metadata(id, &content);
        self.blobs.put(&key, content.bytes, metadata).await?;
        Ok(key)
    }

    pub async fn delete(&self, id: &ExternalFileId) -> Result<()> {
        self.blobs.delete(&self.key(id)).await
    }

    pub async fn metadata(&self, id: &ExternalFileId) -> Result<Option<BlobMetadata>> {
        self.blobs.metadata(&self.key(id)).await
    }

    pub fn locator(&self, id: &ExternalFileId) -> String {
        self.blobs.locator(&self.key(id))
    }
}

/// Markers for items known to be unobtainable, keyed `{id}.missing`.
#[derive(Clone)]
pub struct NegativeCache {
    blobs: Arc<dyn BlobStorePort>,
}

impl NegativeCache {
    pub fn new(blobs: Arc<dyn BlobStorePort>) -> Self {
        Self { blobs }
    }

    pub async fn exists(&self, id: &ExternalFileId) -> Result<bool> {
        self.blobs.exists(&id.missing_key()).await
    }

    pub async fn mark(&self, id: &ExternalFileId) -> Result<()> {
        self.blobs.put(&id.missing_key(), Vec::new(), marker_metadata(id)).await
    }

    pub async fn clear(&self, id: &ExternalFileId) -> Result<()> {
        self.blobs.delete(&id.missing_key()).await
    }
}
