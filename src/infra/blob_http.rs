use crate::app::ports::BlobStorePort;
use crate::domain::BlobMetadata;
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

const METADATA_HEADER: &str = "x-metadata";

/// Blob store backed by an object-storage REST API (Supabase-compatible).
///
/// Objects live at `{url}/storage/v1/object/{bucket}/{key}` and are written with
/// `x-upsert: true`; metadata tags travel as JSON in the `x-metadata` header.
pub struct HttpBlobStore {
    client: reqwest::Client,
    url: String,
    bucket: String,
    service_key: String,
    public_base_url: String,
}

impl HttpBlobStore {
    pub fn new(url: &str, bucket: &str, service_key: &str, public_base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            service_key: service_key.to_string(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, key: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.url, self.bucket, key)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("Authorization", format!("Bearer {}", self.service_key))
            .header("apikey", self.service_key.clone())
    }
}

/// Maps a HEAD status to presence. The storage API answers 400 for unknown
/// objects in some buckets, so it counts as absent alongside 404.
fn head_presence(key: &str, status: StatusCode) -> Result<bool> {
    match status {
        s if s.is_success() => Ok(true),
        StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => Ok(false),
        s => Err(IngestError::store(key, format!("HEAD returned {}", s))),
    }
}

#[async_trait]
impl BlobStorePort for HttpBlobStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let resp = self
            .authed(self.client.head(self.endpoint(key)))
            .send()
            .await
            .map_err(|e| IngestError::store(key, e))?;
        head_presence(key, resp.status())
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, metadata: BlobMetadata) -> Result<()> {
        let size = bytes.len();
        let resp = self
            .authed(self.client.put(self.endpoint(key)))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header("x-upsert", "true")
            .header(METADATA_HEADER, serde_json::to_string(&metadata)?)
            .body(bytes)
            .send()
            .await
            .map_err(|e| IngestError::store(key, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IngestError::store(key, format!("upload failed: {} - {}", status, body)));
        }
        debug!(key = %key, bucket = %self.bucket, size, "object uploaded");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let resp = self
            .authed(self.client.delete(self.endpoint(key)))
            .send()
            .await
            .map_err(|e| IngestError::store(key, e))?;
        match resp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => Ok(()),
            s => Err(IngestError::store(key, format!("DELETE returned {}", s))),
        }
    }

    async fn metadata(&self, key: &str) -> Result<Option<BlobMetadata>> {
        let resp = self
            .authed(self.client.head(self.endpoint(key)))
            .send()
            .await
            .map_err(|e| IngestError::store(key, e))?;
        if !head_presence(key, resp.status())? {
            return Ok(None);
        }
        let meta = resp
            .headers()
            .get(METADATA_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(serde_json::from_str::<BlobMetadata>)
            .transpose()?
            .unwrap_or_default();
        Ok(Some(meta))
    }

    fn locator(&self, key: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, self.bucket, key)
    }
}
