use crate::domain::{AnalyzeRequest, BlobMetadata, ExternalFileId, FetchResult, LinkableRecord};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Key/value blob storage for one container.
#[async_trait]
pub trait BlobStorePort: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;
    /// Overwrites any existing blob at `key`.
    async fn put(&self, key: &str, bytes: Vec<u8>, metadata: BlobMetadata) -> Result<()>;
    /// Succeeds when `key` is absent.
    async fn delete(&self, key: &str) -> Result<()>;
    async fn metadata(&self, key: &str) -> Result<Option<BlobMetadata>>;
    /// Externally resolvable URL of `key`. Does not check existence.
    fn locator(&self, key: &str) -> String;
}

/// Downloads workshop content from upstream.
///
/// `Ok(FetchResult::NotFound)` is a permanent answer; transport problems are
/// `Err(IngestError::TransientFetch)`.
#[async_trait]
pub trait FetcherPort: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch(&self, id: &ExternalFileId) -> Result<FetchResult>;
}

/// Access to the one field the pipeline owns on externally managed records.
#[async_trait]
pub trait RecordStorePort: Send + Sync {
    /// Every record referencing `id`, linked or not.
    async fn find_records(&self, id: &ExternalFileId) -> Result<Vec<LinkableRecord>>;
    /// Sets the content URL on every record referencing `id` whose URL differs;
    /// returns rows changed.
    async fn set_content_url(&self, id: &ExternalFileId, locator: &str) -> Result<usize>;
}

/// Time source for the reconciler's wait loop.
#[async_trait]
pub trait ClockPort: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    async fn sleep(&self, duration: Duration);
}

/// Downstream queue for analysis requests.
#[async_trait]
pub trait AnalyzeSinkPort: Send + Sync {
    async fn emit(&self, request: AnalyzeRequest) -> Result<()>;
}
