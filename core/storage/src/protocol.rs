//! Wire types for the per-provider `/api/{provider}/...` HTTP contract.
//!
//! Field names are snake_case on the wire. Servers are lenient about empty
//! values (`null` arrays, `""` page tokens), so decoding normalizes those.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use ossportable_common::{Credentials, Provider, Result};

/// Content type used when neither the caller nor the file name says otherwise.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.filter(|s| !s.is_empty()))
}

/// The bucket an object operation is addressed to.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketTarget {
    pub provider: Provider,
    pub bucket: String,
    pub credentials: Credentials,
}

impl BucketTarget {
    pub fn new(provider: Provider, bucket: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            provider,
            bucket: bucket.into(),
            credentials,
        }
    }
}

/// One row of a browse listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BucketEntry {
    /// Common prefix (folder-like grouping).
    Dir {
        /// Full prefix, ending in `/`.
        name: String,
        /// Name relative to the browsed prefix.
        #[serde(default)]
        display: String,
    },
    /// Stored object.
    File {
        /// Full object key.
        name: String,
        /// Key relative to the browsed prefix.
        #[serde(default)]
        display: String,
        #[serde(default)]
        size: u64,
        #[serde(default)]
        updated: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        etag: Option<String>,
    },
}

impl BucketEntry {
    /// Full key or prefix.
    pub fn name(&self) -> &str {
        match self {
            BucketEntry::Dir { name, .. } | BucketEntry::File { name, .. } => name,
        }
    }

    /// Name relative to the browsed prefix.
    pub fn display(&self) -> &str {
        match self {
            BucketEntry::Dir { display, .. } | BucketEntry::File { display, .. } => display,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, BucketEntry::Dir { .. })
    }

    /// Object size; `None` for prefixes.
    pub fn size(&self) -> Option<u64> {
        match self {
            BucketEntry::File { size, .. } => Some(*size),
            BucketEntry::Dir { .. } => None,
        }
    }
}

/// One page of a hierarchical listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrowsePage {
    #[serde(default)]
    pub prefix: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub entries: Vec<BucketEntry>,
    /// Cursor for the next page; `None` once the listing is exhausted.
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub next_page_token: Option<String>,
}

/// Aggregate bucket statistics.
///
/// When `truncated` is set the provider stopped counting early and both
/// numbers are lower bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketStats {
    #[serde(default)]
    pub object_count: u64,
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub truncated: bool,
}

/// Full metadata record of a single object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub cache_control: String,
    /// User metadata.
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub etag: String,
    /// Content hash; not every provider reports one for every object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
}

/// Merge-patch for object metadata. Unset fields are left alone server-side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    /// Replacement user metadata map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl MetadataPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_type(mut self, value: impl Into<String>) -> Self {
        self.content_type = Some(value.into());
        self
    }

    pub fn cache_control(mut self, value: impl Into<String>) -> Self {
        self.cache_control = Some(value.into());
        self
    }

    pub fn metadata(mut self, value: BTreeMap<String, String>) -> Self {
        self.metadata = Some(value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.content_type.is_none() && self.cache_control.is_none() && self.metadata.is_none()
    }
}

/// Entry of the flat (compatibility) listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Bounded, single-page flat listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectListing {
    #[serde(default, deserialize_with = "null_as_default")]
    pub objects: Vec<ObjectSummary>,
    #[serde(default)]
    pub truncated: bool,
}

/// A file to upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// File name; the object key becomes `prefix + name`.
    pub name: String,
    pub data: Bytes,
    pub content_type: Option<String>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Read a file from disk, naming it after its final path component.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                ossportable_common::Error::InvalidInput(format!(
                    "Not a file path: {}",
                    path.display()
                ))
            })?;
        let data = tokio::fs::read(path).await?;
        Ok(Self::new(name, data))
    }

    /// Explicit content type, else a guess from the file name.
    pub fn resolved_content_type(&self) -> String {
        self.content_type.clone().unwrap_or_else(|| {
            mime_guess::from_path(&self.name)
                .first_raw()
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string()
        })
    }
}

/// Body of `POST /test` and of the bucket-scoped calls that need nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketRequest {
    pub bucket: String,
    pub credentials: Credentials,
}

/// Body of `POST /bucket/browse`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowseRequest {
    pub bucket: String,
    pub credentials: Credentials,
    pub prefix: String,
    /// Empty string requests the first page.
    pub page_token: String,
}

/// Body of the single-object calls (download, delete, metadata).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRequest {
    pub bucket: String,
    pub credentials: Credentials,
    pub object: String,
}

/// Body of `POST /bucket/copy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyRequest {
    pub bucket: String,
    pub credentials: Credentials,
    pub source: String,
    pub destination: String,
    pub delete_source: bool,
}

/// Body of `POST /bucket/metadata/update`: the object address plus the patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataUpdateRequest {
    pub bucket: String,
    pub credentials: Credentials,
    pub object: String,
    #[serde(flatten)]
    pub patch: MetadataPatch,
}

/// Response of `POST /bucket/download`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadUrlResponse {
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_browse_page_empty_token_means_end() {
        let page: BrowsePage = serde_json::from_value(json!({
            "prefix": "a/",
            "entries": [
                {"type": "dir", "name": "a/b/", "display": "b"},
                {"type": "file", "name": "a/c.txt", "display": "c.txt", "size": 3,
                 "updated": "2024-05-01T10:00:00Z"}
            ],
            "next_page_token": ""
        }))
        .unwrap();

        assert_eq!(page.next_page_token, None);
        assert_eq!(page.entries.len(), 2);
        assert!(page.entries[0].is_dir());
        assert_eq!(page.entries[1].size(), Some(3));
        assert_eq!(page.entries[1].display(), "c.txt");
    }

    #[test]
    fn test_browse_page_null_entries_and_missing_token() {
        let page: BrowsePage =
            serde_json::from_value(json!({"prefix": "", "entries": null})).unwrap();
        assert!(page.entries.is_empty());
        assert_eq!(page.next_page_token, None);

        let page: BrowsePage = serde_json::from_value(json!({
            "prefix": "", "entries": [], "next_page_token": "tok-2"
        }))
        .unwrap();
        assert_eq!(page.next_page_token.as_deref(), Some("tok-2"));
    }

    #[test]
    fn test_metadata_md5_is_optional() {
        let meta: ObjectMetadata = serde_json::from_value(json!({
            "content_type": "text/plain",
            "cache_control": "",
            "metadata": null,
            "size": 12,
            "updated": "2024-05-01T10:00:00Z",
            "etag": "abc"
        }))
        .unwrap();
        assert_eq!(meta.md5, None);
        assert!(meta.metadata.is_empty());
        assert_eq!(meta.size, 12);
    }

    #[test]
    fn test_metadata_update_body_omits_unset_fields() {
        let body = MetadataUpdateRequest {
            bucket: "b".to_string(),
            credentials: Credentials::new("c"),
            object: "o".to_string(),
            patch: MetadataPatch::new().cache_control("no-cache"),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"bucket": "b", "credentials": "c", "object": "o", "cache_control": "no-cache"})
        );
    }

    #[test]
    fn test_upload_content_type_guess() {
        assert_eq!(UploadFile::new("a.json", b"{}".to_vec()).resolved_content_type(), "application/json");
        assert_eq!(UploadFile::new("blob", b"x".to_vec()).resolved_content_type(), DEFAULT_CONTENT_TYPE);
        assert_eq!(
            UploadFile::new("a.json", b"{}".to_vec())
                .with_content_type("text/plain")
                .resolved_content_type(),
            "text/plain"
        );
    }
}
