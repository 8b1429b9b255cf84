use crate::app::ports::BlobStorePort;
use crate::domain::BlobMetadata;
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const META_SUFFIX: &str = ".meta.json";

/// Blob store backed by a local directory.
///
/// Layout: `<root>/<container>/<key>` plus a `<key>.meta.json` sidecar holding
/// the metadata tags. Locator: `<public_base_url>/<container>/<key>`.
pub struct FsBlobStore {
    dir: PathBuf,
    container: String,
    public_base_url: String,
}

impl FsBlobStore {
    pub fn new(root: &Path, container: &str, public_base_url: &str) -> Self {
        Self {
            dir: root.join(container),
            container: container.to_string(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}{}", key, META_SUFFIX))
    }
}

async fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Write `bytes` next to `path` and rename into place so readers never see a
/// partial file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
    fs::write(&tmp, bytes).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

#[async_trait]
impl BlobStorePort for FsBlobStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        fs::try_exists(self.blob_path(key))
            .await
            .map_err(|e| IngestError::store(key, e))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, metadata: BlobMetadata) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| IngestError::store(key, e))?;
        let meta_json = serde_json::to_vec_pretty(&metadata)?;
        // Metadata first: a blob without its sidecar would look untagged.
        write_atomic(&self.meta_path(key), &meta_json)
            .await
            .map_err(|e| IngestError::store(key, e))?;
        write_atomic(&self.blob_path(key), &bytes)
            .await
            .map_err(|e| IngestError::store(key, e))?;
        debug!(key = %key, container = %self.container, size = bytes.len(), "fs blob written");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        remove_if_present(&self.blob_path(key))
            .await
            .map_err(|e| IngestError::store(key, e))?;
        remove_if_present(&self.meta_path(key))
            .await
            .map_err(|e| IngestError::store(key, e))?;
        Ok(())
    }

    async fn metadata(&self, key: &str) -> Result<Option<BlobMetadata>> {
        if !self.exists(key).await? {
            return Ok(None);
        }
        match fs::read(self.meta_path(key)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Some(BlobMetadata::new())),
            Err(e) => Err(IngestError::store(key, e)),
        }
    }

    fn locator(&self, key: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, self.container, key)
    }
}
