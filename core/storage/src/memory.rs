//! In-memory storage backend for testing.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use ossportable_common::{ConnectionId, Credentials, Error, Provider, Result};

use crate::api::StorageApi;
use crate::connection::{Connection, ConnectionForm};
use crate::protocol::{
    BrowsePage, BucketEntry, BucketStats, BucketTarget, MetadataPatch, ObjectListing,
    ObjectMetadata, ObjectSummary, UploadFile,
};

/// Failure a provider (or a single upload) can be told to produce.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Answer with a non-2xx status and this body.
    Status { status: u16, body: String },
    /// Fail before any response, with this message.
    Transport(String),
}

impl Fault {
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Fault::Status {
            status,
            body: body.into(),
        }
    }

    fn to_error(&self) -> Error {
        match self {
            Fault::Status { status, body } => Error::status(*status, body.clone()),
            Fault::Transport(message) => Error::Transport(message.clone()),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    cache_control: String,
    metadata: BTreeMap<String, String>,
    updated: DateTime<Utc>,
    etag: String,
}

impl StoredObject {
    fn new(data: Bytes, content_type: String) -> Self {
        Self {
            data,
            content_type,
            cache_control: String::new(),
            metadata: BTreeMap::new(),
            updated: Utc::now(),
            etag: Uuid::new_v4().simple().to_string(),
        }
    }

    fn touch(&mut self) {
        self.updated = Utc::now();
        self.etag = Uuid::new_v4().simple().to_string();
    }
}

type BucketKey = (Provider, String);

#[derive(Default)]
struct State {
    connections: HashMap<Provider, Vec<Map<String, Value>>>,
    next_id: i64,
    buckets: HashMap<BucketKey, BTreeMap<String, StoredObject>>,
    faults: HashMap<Provider, Fault>,
    upload_faults: HashMap<String, Fault>,
    delays: HashMap<Provider, Duration>,
    malformed: HashSet<Provider>,
}

impl State {
    fn bucket(&self, target: &BucketTarget) -> Result<&BTreeMap<String, StoredObject>> {
        self.buckets
            .get(&(target.provider, target.bucket.clone()))
            .ok_or_else(|| Error::status(404, format!("bucket not found: {}", target.bucket)))
    }

    fn bucket_mut(&mut self, target: &BucketTarget) -> Result<&mut BTreeMap<String, StoredObject>> {
        self.buckets
            .get_mut(&(target.provider, target.bucket.clone()))
            .ok_or_else(|| Error::status(404, format!("bucket not found: {}", target.bucket)))
    }

    fn check_bucket(&self, provider: Provider, bucket: &str) -> Result<()> {
        if self.buckets.contains_key(&(provider, bucket.to_string())) {
            Ok(())
        } else {
            Err(Error::status(400, format!("bucket not found: {}", bucket)))
        }
    }
}

fn object_not_found(key: &str) -> Error {
    Error::status(404, format!("object not found: {}", key))
}

fn form_record(form: &ConnectionForm) -> Result<Map<String, Value>> {
    match serde_json::to_value(form)? {
        Value::Object(map) => Ok(map),
        _ => Err(Error::Serialization("connection form is not an object".to_string())),
    }
}

/// In-memory stand-in for the per-provider API servers.
///
/// Behaves like the real servers (connection rows with integer ids,
/// hierarchical listings paged by cursor, capped stats) and lets tests
/// inject per-provider faults, per-file upload faults and response delays.
pub struct MemoryBackend {
    state: Mutex<State>,
    page_size: usize,
    list_cap: usize,
    stats_cap: usize,
}

impl MemoryBackend {
    /// Create an empty backend with server-like page sizes and caps.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 1,
                ..State::default()
            }),
            page_size: 200,
            list_cap: 1000,
            stats_cap: 10_000,
        }
    }

    /// Entries per browse page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Limits of the flat listing and of stats enumeration.
    pub fn with_caps(mut self, list_cap: usize, stats_cap: usize) -> Self {
        self.list_cap = list_cap;
        self.stats_cap = stats_cap;
        self
    }

    /// Create an empty bucket.
    pub async fn create_bucket(&self, provider: Provider, bucket: &str) {
        self.state
            .lock()
            .await
            .buckets
            .entry((provider, bucket.to_string()))
            .or_default();
    }

    /// Store an object directly, creating the bucket if needed.
    pub async fn put_object(&self, provider: Provider, bucket: &str, key: &str, data: impl Into<Bytes>) {
        let object = StoredObject::new(data.into(), "application/octet-stream".to_string());
        self.state
            .lock()
            .await
            .buckets
            .entry((provider, bucket.to_string()))
            .or_default()
            .insert(key.to_string(), object);
    }

    /// Keys currently stored in a bucket, in key order.
    pub async fn object_keys(&self, provider: Provider, bucket: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .buckets
            .get(&(provider, bucket.to_string()))
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Insert a raw connection row, assigning an id if it has none.
    pub async fn seed_connection(&self, provider: Provider, mut record: Map<String, Value>) {
        let mut state = self.state.lock().await;
        if !record.contains_key("id") {
            record.insert("id".to_string(), Value::from(state.next_id));
            state.next_id += 1;
        }
        state.connections.entry(provider).or_default().push(record);
    }

    /// Make every call addressed to `provider` fail, or clear the fault.
    pub async fn set_fault(&self, provider: Provider, fault: Option<Fault>) {
        let mut state = self.state.lock().await;
        match fault {
            Some(fault) => state.faults.insert(provider, fault),
            None => state.faults.remove(&provider),
        };
    }

    /// Make uploads of a file with this name fail.
    pub async fn fail_upload(&self, file_name: &str, fault: Fault) {
        self.state
            .lock()
            .await
            .upload_faults
            .insert(file_name.to_string(), fault);
    }

    /// Delay every response of `provider`.
    pub async fn set_delay(&self, provider: Provider, delay: Duration) {
        self.state.lock().await.delays.insert(provider, delay);
    }

    /// Make `provider`'s connection listing answer 2xx with a body that is not a list.
    pub async fn set_malformed_listing(&self, provider: Provider, malformed: bool) {
        let mut state = self.state.lock().await;
        if malformed {
            state.malformed.insert(provider);
        } else {
            state.malformed.remove(&provider);
        }
    }

    /// Apply the configured delay and fault for a provider.
    async fn gate(&self, provider: Provider) -> Result<()> {
        let (delay, fault) = {
            let state = self.state.lock().await;
            (
                state.delays.get(&provider).copied(),
                state.faults.get(&provider).cloned(),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match fault {
            Some(fault) => Err(fault.to_error()),
            None => Ok(()),
        }
    }

    fn browse_page(
        &self,
        objects: &BTreeMap<String, StoredObject>,
        prefix: &str,
        page_token: Option<&str>,
    ) -> BrowsePage {
        // Children of `prefix`, keyed by full name so prefixes and objects interleave in key order.
        let mut children: BTreeMap<String, BucketEntry> = BTreeMap::new();
        for (key, object) in objects.range(prefix.to_string()..) {
            let Some(rest) = key.strip_prefix(prefix) else {
                break;
            };
            if rest.is_empty() {
                continue;
            }
            match rest.find('/') {
                Some(idx) => {
                    let name = format!("{}{}", prefix, &rest[..=idx]);
                    children.entry(name.clone()).or_insert(BucketEntry::Dir {
                        name,
                        display: rest[..idx].to_string(),
                    });
                }
                None => {
                    children.insert(
                        key.clone(),
                        BucketEntry::File {
                            name: key.clone(),
                            display: rest.to_string(),
                            size: object.data.len() as u64,
                            updated: Some(object.updated),
                            content_type: Some(object.content_type.clone()),
                            etag: Some(object.etag.clone()),
                        },
                    );
                }
            }
        }

        let mut remaining = children
            .into_iter()
            .filter(|(name, _)| page_token.map_or(true, |token| name.as_str() > token))
            .peekable();

        let mut entries = Vec::new();
        let mut last = None;
        while entries.len() < self.page_size {
            match remaining.next() {
                Some((name, entry)) => {
                    last = Some(name);
                    entries.push(entry);
                }
                None => break,
            }
        }

        let next_page_token = if remaining.peek().is_some() { last } else { None };

        BrowsePage {
            prefix: prefix.to_string(),
            entries,
            next_page_token,
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageApi for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn providers(&self) -> Vec<Provider> {
        Provider::ALL.to_vec()
    }

    async fn list_connections(&self, provider: Provider) -> Result<Vec<Connection>> {
        self.gate(provider).await?;
        let state = self.state.lock().await;
        if state.malformed.contains(&provider) {
            return Err(Error::Serialization(
                "Failed to parse response: expected a sequence".to_string(),
            ));
        }
        state
            .connections
            .get(&provider)
            .map(|rows| rows.as_slice())
            .unwrap_or_default()
            .iter()
            .cloned()
            .map(|record| Connection::from_record(provider, record))
            .collect()
    }

    async fn test_connection(
        &self,
        provider: Provider,
        bucket: &str,
        _credentials: &Credentials,
    ) -> Result<()> {
        self.gate(provider).await?;
        self.state.lock().await.check_bucket(provider, bucket)
    }

    async fn create_connection(&self, provider: Provider, form: &ConnectionForm) -> Result<()> {
        self.gate(provider).await?;
        let mut record = form_record(form)?;
        let mut state = self.state.lock().await;
        state.check_bucket(provider, &form.bucket)?;

        record.insert("id".to_string(), Value::from(state.next_id));
        record.insert(
            "created_at".to_string(),
            Value::from(Utc::now().to_rfc3339()),
        );
        state.next_id += 1;
        state.connections.entry(provider).or_default().push(record);
        Ok(())
    }

    async fn update_connection(
        &self,
        provider: Provider,
        id: &ConnectionId,
        form: &ConnectionForm,
    ) -> Result<()> {
        self.gate(provider).await?;
        let fields = form_record(form)?;
        let mut state = self.state.lock().await;
        state.check_bucket(provider, &form.bucket)?;

        let id_value = serde_json::to_value(id)?;
        let row = state
            .connections
            .get_mut(&provider)
            .and_then(|rows| rows.iter_mut().find(|row| row.get("id") == Some(&id_value)))
            .ok_or_else(|| Error::status(404, format!("connection not found: {}", id)))?;
        row.extend(fields);
        Ok(())
    }

    async fn delete_connection(&self, provider: Provider, id: &ConnectionId) -> Result<()> {
        self.gate(provider).await?;
        let id_value = serde_json::to_value(id)?;
        let mut state = self.state.lock().await;
        let rows = state.connections.entry(provider).or_default();
        let before = rows.len();
        rows.retain(|row| row.get("id") != Some(&id_value));
        if rows.len() == before {
            return Err(Error::status(404, format!("connection not found: {}", id)));
        }
        Ok(())
    }

    async fn browse_objects(
        &self,
        target: &BucketTarget,
        prefix: &str,
        page_token: Option<&str>,
    ) -> Result<BrowsePage> {
        self.gate(target.provider).await?;
        let state = self.state.lock().await;
        let objects = state.bucket(target)?;
        let page_token = page_token.filter(|t| !t.is_empty());
        Ok(self.browse_page(objects, prefix, page_token))
    }

    async fn get_download_url(&self, target: &BucketTarget, object: &str) -> Result<String> {
        self.gate(target.provider).await?;
        let state = self.state.lock().await;
        if !state.bucket(target)?.contains_key(object) {
            return Err(object_not_found(object));
        }
        Ok(format!(
            "memory://{}/{}/{}?expires=900",
            target.provider, target.bucket, object
        ))
    }

    async fn delete_object(&self, target: &BucketTarget, object: &str) -> Result<()> {
        self.gate(target.provider).await?;
        let mut state = self.state.lock().await;
        state
            .bucket_mut(target)?
            .remove(object)
            .map(|_| ())
            .ok_or_else(|| object_not_found(object))
    }

    async fn copy_object(
        &self,
        target: &BucketTarget,
        source: &str,
        destination: &str,
        delete_source: bool,
    ) -> Result<()> {
        self.gate(target.provider).await?;
        let mut state = self.state.lock().await;
        let objects = state.bucket_mut(target)?;
        let mut copy = objects
            .get(source)
            .cloned()
            .ok_or_else(|| object_not_found(source))?;
        copy.touch();
        objects.insert(destination.to_string(), copy);
        if delete_source && source != destination {
            objects.remove(source);
        }
        Ok(())
    }

    async fn upload_objects(
        &self,
        target: &BucketTarget,
        prefix: &str,
        files: Vec<UploadFile>,
    ) -> Result<()> {
        let mut first_error = None;
        for file in files {
            let outcome = match self.gate(target.provider).await {
                Ok(()) => {
                    let mut state = self.state.lock().await;
                    match state.upload_faults.get(&file.name).cloned() {
                        Some(fault) => Err(fault.to_error()),
                        None => {
                            let content_type = file.resolved_content_type();
                            state.bucket_mut(target).map(|objects| {
                                objects.insert(
                                    format!("{}{}", prefix, file.name),
                                    StoredObject::new(file.data, content_type),
                                );
                            })
                        }
                    }
                }
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn get_bucket_stats(&self, target: &BucketTarget) -> Result<BucketStats> {
        self.gate(target.provider).await?;
        let state = self.state.lock().await;
        let objects = state.bucket(target)?;
        let counted = objects.values().take(self.stats_cap);
        let (object_count, total_size) = counted.fold((0u64, 0u64), |(count, size), object| {
            (count + 1, size + object.data.len() as u64)
        });
        Ok(BucketStats {
            object_count,
            total_size,
            truncated: objects.len() > self.stats_cap,
        })
    }

    async fn get_object_metadata(
        &self,
        target: &BucketTarget,
        object: &str,
    ) -> Result<ObjectMetadata> {
        self.gate(target.provider).await?;
        let state = self.state.lock().await;
        let stored = state
            .bucket(target)?
            .get(object)
            .ok_or_else(|| object_not_found(object))?;
        Ok(ObjectMetadata {
            content_type: stored.content_type.clone(),
            cache_control: stored.cache_control.clone(),
            metadata: stored.metadata.clone(),
            size: stored.data.len() as u64,
            updated: Some(stored.updated),
            etag: stored.etag.clone(),
            md5: None,
        })
    }

    async fn update_object_metadata(
        &self,
        target: &BucketTarget,
        object: &str,
        patch: &MetadataPatch,
    ) -> Result<()> {
        self.gate(target.provider).await?;
        let mut state = self.state.lock().await;
        let stored = state
            .bucket_mut(target)?
            .get_mut(object)
            .ok_or_else(|| object_not_found(object))?;
        if let Some(content_type) = &patch.content_type {
            stored.content_type = content_type.clone();
        }
        if let Some(cache_control) = &patch.cache_control {
            stored.cache_control = cache_control.clone();
        }
        if let Some(metadata) = &patch.metadata {
            stored.metadata = metadata.clone();
        }
        stored.touch();
        Ok(())
    }

    async fn list_objects(&self, target: &BucketTarget) -> Result<ObjectListing> {
        self.gate(target.provider).await?;
        let state = self.state.lock().await;
        let objects = state.bucket(target)?;
        Ok(ObjectListing {
            objects: objects
                .iter()
                .take(self.list_cap)
                .map(|(name, object)| ObjectSummary {
                    name: name.clone(),
                    size: object.data.len() as u64,
                    updated: Some(object.updated),
                    content_type: Some(object.content_type.clone()),
                })
                .collect(),
            truncated: objects.len() > self.list_cap,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn target(provider: Provider, bucket: &str) -> BucketTarget {
        BucketTarget::new(provider, bucket, Credentials::new("{}"))
    }

    async fn seeded(page_size: usize) -> MemoryBackend {
        let backend = MemoryBackend::new().with_page_size(page_size);
        for key in [
            "a.txt",
            "docs/guide.md",
            "docs/readme.md",
            "docs/img/logo.png",
            "z.bin",
            "photos/2024/1.jpg",
            "photos/2024/2.jpg",
        ] {
            backend.put_object(Provider::Gcp, "b1", key, key.as_bytes().to_vec()).await;
        }
        backend
    }

    #[tokio::test]
    async fn test_browse_groups_prefixes() {
        let backend = seeded(100).await;
        let page = backend
            .browse_objects(&target(Provider::Gcp, "b1"), "", None)
            .await
            .unwrap();

        let names: Vec<&str> = page.entries.iter().map(BucketEntry::name).collect();
        assert_eq!(names, vec!["a.txt", "docs/", "photos/", "z.bin"]);
        assert!(page.entries[1].is_dir());
        assert_eq!(page.entries[1].display(), "docs");
        assert_eq!(page.next_page_token, None);
    }

    #[tokio::test]
    async fn test_browse_under_prefix() {
        let backend = seeded(100).await;
        let page = backend
            .browse_objects(&target(Provider::Gcp, "b1"), "docs/", None)
            .await
            .unwrap();
        let names: Vec<&str> = page.entries.iter().map(BucketEntry::display).collect();
        assert_eq!(names, vec!["guide.md", "img", "readme.md"]);
    }

    #[tokio::test]
    async fn test_pagination_terminates_without_duplicates() {
        let backend = seeded(1).await;
        let target = target(Provider::Gcp, "b1");

        let mut pages = 0;
        let mut token: Option<String> = None;
        let mut names = Vec::new();
        loop {
            let page = backend
                .browse_objects(&target, "", token.as_deref())
                .await
                .unwrap();
            pages += 1;
            names.extend(page.entries.iter().map(|e| e.name().to_string()));
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        assert_eq!(pages, 4);
        let unique: HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());

        let all = backend.browse_all(&target, "").await.unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn test_move_removes_source() {
        let backend = seeded(100).await;
        let target = target(Provider::Gcp, "b1");

        backend.move_object(&target, "a.txt", "b.txt").await.unwrap();
        let keys = backend.object_keys(Provider::Gcp, "b1").await;
        assert!(keys.contains(&"b.txt".to_string()));
        assert!(!keys.contains(&"a.txt".to_string()));

        backend
            .copy_object(&target, "b.txt", "c.txt", false)
            .await
            .unwrap();
        let keys = backend.object_keys(Provider::Gcp, "b1").await;
        assert!(keys.contains(&"b.txt".to_string()));
        assert!(keys.contains(&"c.txt".to_string()));
    }

    #[tokio::test]
    async fn test_copy_missing_source_is_status_error() {
        let backend = seeded(100).await;
        let err = backend
            .copy_object(&target(Provider::Gcp, "b1"), "nope", "x", true)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(404));
        assert_eq!(err.to_string(), "object not found: nope");
    }

    #[tokio::test]
    async fn test_upload_partial_failure_keeps_successes() {
        let backend = MemoryBackend::new();
        backend.create_bucket(Provider::Aws, "b1").await;
        backend.fail_upload("f2", Fault::status(500, "disk full")).await;

        let err = backend
            .upload_objects(
                &target(Provider::Aws, "b1"),
                "prefix/",
                vec![UploadFile::new("f1", b"1".to_vec()), UploadFile::new("f2", b"2".to_vec())],
            )
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "disk full");
        assert_eq!(backend.object_keys(Provider::Aws, "b1").await, vec!["prefix/f1"]);
    }

    #[tokio::test]
    async fn test_stats_truncation_is_lower_bound() {
        let backend = seeded(100).await.with_caps(1000, 5);
        let stats = backend
            .get_bucket_stats(&target(Provider::Gcp, "b1"))
            .await
            .unwrap();
        assert_eq!(stats.object_count, 5);
        assert!(stats.truncated);
    }

    #[tokio::test]
    async fn test_flat_listing_is_capped() {
        let backend = seeded(100).await.with_caps(3, 10_000);
        let listing = backend
            .list_objects(&target(Provider::Gcp, "b1"))
            .await
            .unwrap();
        assert!(listing.truncated);
        let names: Vec<&str> = listing.objects.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "docs/guide.md", "docs/img/logo.png"]);
    }

    #[tokio::test]
    async fn test_metadata_patch_merges() {
        let backend = seeded(100).await;
        let target = target(Provider::Gcp, "b1");

        let mut user = BTreeMap::new();
        user.insert("owner".to_string(), "ops".to_string());
        backend
            .update_object_metadata(
                &target,
                "a.txt",
                &MetadataPatch::new().content_type("text/plain").metadata(user.clone()),
            )
            .await
            .unwrap();
        backend
            .update_object_metadata(&target, "a.txt", &MetadataPatch::new().cache_control("no-store"))
            .await
            .unwrap();

        let meta = backend.get_object_metadata(&target, "a.txt").await.unwrap();
        assert_eq!(meta.content_type, "text/plain");
        assert_eq!(meta.cache_control, "no-store");
        assert_eq!(meta.metadata, user);
        assert_eq!(meta.size, 5);
        assert_eq!(meta.md5, None);
    }

    #[tokio::test]
    async fn test_connection_crud() {
        let backend = MemoryBackend::new();
        backend.create_bucket(Provider::Huawei, "obs-1").await;

        let form = ConnectionForm::new("main", "obs-1", Credentials::new("{}"));
        backend.create_connection(Provider::Huawei, &form).await.unwrap();

        let listed = backend.list_connections(Provider::Huawei).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].provider, Provider::Huawei);
        let id = listed[0].id.clone().unwrap();

        let renamed = ConnectionForm::new("renamed", "obs-1", Credentials::new("{}"));
        backend
            .update_connection(Provider::Huawei, &id, &renamed)
            .await
            .unwrap();
        let listed = backend.list_connections(Provider::Huawei).await.unwrap();
        assert_eq!(listed[0].name(), Some("renamed"));

        backend.delete_connection(Provider::Huawei, &id).await.unwrap();
        assert!(backend.list_connections(Provider::Huawei).await.unwrap().is_empty());
        assert_eq!(
            backend
                .delete_connection(Provider::Huawei, &id)
                .await
                .unwrap_err()
                .status_code(),
            Some(404)
        );
    }

    #[tokio::test]
    async fn test_unknown_bucket_fails_connection_test() {
        let backend = MemoryBackend::new();
        let err = backend
            .test_connection(Provider::Azure, "missing", &Credentials::new("{}"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(400));
    }

    #[tokio::test]
    async fn test_fault_applies_to_one_provider() {
        let backend = MemoryBackend::new();
        backend
            .seed_connection(Provider::Gcp, json!({"bucket": "g"}).as_object().cloned().unwrap())
            .await;
        backend
            .set_fault(Provider::Aws, Some(Fault::Transport("connection refused".to_string())))
            .await;

        assert!(backend.list_connections(Provider::Aws).await.unwrap_err().is_transport());
        assert_eq!(backend.list_connections(Provider::Gcp).await.unwrap().len(), 1);
    }
}
