use crate::app::ports::BlobStorePort;
use crate::domain::BlobMetadata;
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-memory blob store for development and tests.
pub struct MemoryBlobStore {
    base_url: String,
    blobs: Mutex<HashMap<String, (Vec<u8>, BlobMetadata)>>,
    writes: AtomicUsize,
    deletes: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            blobs: Mutex::new(HashMap::new()),
            writes: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Number of successful `put` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().get(key).map(|(bytes, _)| bytes.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Make every subsequent operation fail with `StoreUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (Vec<u8>, BlobMetadata)>> {
        self.blobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self, key: &str) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(IngestError::store(key, "memory store marked unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStorePort for MemoryBlobStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        self.check(key)?;
        Ok(self.lock().contains_key(key))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, metadata: BlobMetadata) -> Result<()> {
        self.check(key)?;
        self.lock().insert(key.to_string(), (bytes, metadata));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check(key)?;
        if self.lock().remove(key).is_some() {
            self.deletes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn metadata(&self, key: &str) -> Result<Option<BlobMetadata>> {
        self.check(key)?;
        Ok(self.lock().get(key).map(|(_, meta)| meta.clone()))
    }

    fn locator(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }
}
