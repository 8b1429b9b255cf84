//! Message contracts and value types for the workshop ingestion pipeline.

use crate::constants::{MISSING_EXTENSION, TAG_DISPLAY_NAME, TAG_EXTERNAL_FILE_ID, TAG_SHA256};
use crate::error::{IngestError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Metadata tags stored next to a blob.
pub type BlobMetadata = BTreeMap<String, String>;

/// Identifier assigned by the upstream platform to a workshop item.
///
/// Accepted on the wire as either a JSON number or a string and always
/// serialized as a string. Because it becomes part of storage keys, path
/// separators and `..` are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ExternalFileId(String);

impl ExternalFileId {
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IngestError::InvalidId("empty id".to_string()));
        }
        if trimmed.contains('/') || trimmed.contains('\\') || trimmed.contains("..") {
            return Err(IngestError::InvalidId(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `{id}.{ext}`, the key of the cached artifact.
    pub fn artifact_key(&self, extension: &str) -> String {
        format!("{}.{}", self.0, extension)
    }

    /// `{id}.missing`, the key of the negative marker.
    pub fn missing_key(&self) -> String {
        format!("{}.{}", self.0, MISSING_EXTENSION)
    }
}

impl fmt::Display for ExternalFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for ExternalFileId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for ExternalFileId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(i64),
            Text(String),
        }
        let raw = match Raw::deserialize(deserializer)? {
            Raw::Num(n) => n.to_string(),
            Raw::Text(s) => s,
        };
        ExternalFileId::parse(raw).map_err(serde::de::Error::custom)
    }
}

/// Inbound message: fetch (or re-fetch) one workshop file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub external_file_id: ExternalFileId,
    #[serde(default)]
    pub force: bool,
}

impl FetchRequest {
    pub fn new(external_file_id: ExternalFileId, force: bool) -> Self {
        Self { external_file_id, force }
    }
}

/// Outbound message: analyze the cached artifact at `artifact_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub artifact_key: String,
    #[serde(default)]
    pub force: bool,
}

/// Bytes and display name returned by a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedContent {
    pub bytes: Vec<u8>,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    Found(FetchedContent),
    /// Upstream has no such item. Permanent until a forced retry.
    NotFound,
}

/// A domain row that references a workshop file and carries its resolved URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkableRecord {
    pub external_file_id: ExternalFileId,
    pub content_url: Option<String>,
}

/// Metadata written alongside a freshly fetched artifact.
pub fn artifact_metadata(id: &ExternalFileId, content: &FetchedContent) -> BlobMetadata {
    let mut meta = marker_metadata(id);
    meta.insert(TAG_DISPLAY_NAME.to_string(), content.display_name.clone());
    meta.insert(TAG_SHA256.to_string(), sha256_hex(&content.bytes));
    meta
}

/// Metadata written on a negative marker.
pub fn marker_metadata(id: &ExternalFileId) -> BlobMetadata {
    let mut meta = BlobMetadata::new();
    meta.insert(TAG_EXTERNAL_FILE_ID.to_string(), id.to_string());
    meta
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
