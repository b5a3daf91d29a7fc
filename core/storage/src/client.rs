//! HTTP implementation of [`StorageApi`] against the `/api/{provider}` servers.

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::{multipart, Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::error::Error as StdError;
use tracing::debug;
use url::Url;

use ossportable_common::{ConnectionId, Credentials, Error, Provider, Result};

use crate::api::StorageApi;
use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionForm};
use crate::protocol::{
    BrowsePage, BrowseRequest, BucketRequest, BucketStats, BucketTarget, CopyRequest,
    DownloadUrlResponse, MetadataPatch, MetadataUpdateRequest, ObjectListing, ObjectMetadata,
    ObjectRequest, UploadFile,
};
use crate::registry::{create_default_registry, ProviderRegistry};

/// Error text followed by its innermost cause (e.g. "Connection refused").
///
/// reqwest's own message only names the request that failed.
fn transport_message(err: &(dyn StdError + 'static)) -> String {
    let message = err.to_string();
    let mut root = match err.source() {
        Some(cause) => cause,
        None => return message,
    };
    while let Some(cause) = root.source() {
        root = cause;
    }
    let cause = root.to_string();
    if message.contains(&cause) {
        message
    } else {
        format!("{}: {}", message, cause)
    }
}

/// Storage client speaking the per-provider HTTP contract.
///
/// Holds no per-call state; one instance can be shared by any number of
/// concurrent callers.
pub struct HttpStorageClient {
    http: Client,
    base_url: Url,
    registry: ProviderRegistry,
}

impl HttpStorageClient {
    /// Create a client addressing every provider under `/api/{code}`.
    ///
    /// # Errors
    /// - The underlying HTTP client cannot be built
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Self::with_registry(config, create_default_registry())
    }

    /// Create a client with a custom provider registry.
    pub fn with_registry(config: &ClientConfig, registry: ProviderRegistry) -> Result<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            registry,
        })
    }

    /// The registry used to resolve provider paths.
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Absolute URL of a provider operation.
    ///
    /// The registry path is appended to the base URL rather than joined,
    /// so a base URL with its own path prefix keeps it.
    fn url(&self, provider: Provider, suffix: &str) -> Result<Url> {
        let path = self.registry.endpoint(provider, suffix);
        let raw = format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path);
        Url::parse(&raw).map_err(|e| Error::InvalidInput(format!("Invalid URL '{}': {}", raw, e)))
    }

    fn connection_url(&self, provider: Provider, id: &ConnectionId) -> Result<Url> {
        let mut url = self.url(provider, "connection")?;
        let shown = url.to_string();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidInput(format!("Base URL cannot carry a path: {}", shown)))?
            .push(&id.to_string());
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(%method, path = url.path(), "storage request");
        self.http.request(method, url)
    }

    /// Send a request and turn non-2xx answers into [`Error::Status`].
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(transport_message(&e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response
                .text()
                .await
                .map_err(|e| Error::Transport(transport_message(&e)))?;
            debug!(status = status.as_u16(), %body, "storage request failed");
            Err(Error::status(status.as_u16(), body))
        }
    }

    /// Decode a successful response body.
    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(transport_message(&e)))?;
        serde_json::from_slice(&body)
            .map_err(|e| Error::Serialization(format!("Failed to parse response: {}", e)))
    }

    async fn post_json<B, T>(&self, provider: Provider, suffix: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned + Send,
    {
        let url = self.url(provider, suffix)?;
        let response = self.send(self.request(Method::POST, url).json(body)).await?;
        Self::decode(response).await
    }

    /// POST whose success body is ignored.
    async fn post_unit<B>(&self, provider: Provider, suffix: &str, body: &B) -> Result<()>
    where
        B: Serialize + Sync,
    {
        let url = self.url(provider, suffix)?;
        self.send(self.request(Method::POST, url).json(body)).await?;
        Ok(())
    }

    fn object_request(target: &BucketTarget, object: &str) -> ObjectRequest {
        ObjectRequest {
            bucket: target.bucket.clone(),
            credentials: target.credentials.clone(),
            object: object.to_string(),
        }
    }

    fn bucket_request(target: &BucketTarget) -> BucketRequest {
        BucketRequest {
            bucket: target.bucket.clone(),
            credentials: target.credentials.clone(),
        }
    }

    async fn upload_one(&self, target: &BucketTarget, prefix: &str, file: UploadFile) -> Result<()> {
        let url = self.url(target.provider, "bucket/upload")?;
        let content_type = file.resolved_content_type();
        let part = multipart::Part::bytes(file.data.to_vec())
            .file_name(file.name.clone())
            .mime_str(&content_type)
            .map_err(|e| {
                Error::InvalidInput(format!("Invalid content type '{}': {}", content_type, e))
            })?;

        let form = multipart::Form::new()
            .text("bucket", target.bucket.clone())
            .text("credentials", target.credentials.as_str().to_string())
            .text("prefix", prefix.to_string())
            .part("file", part);

        self.send(self.request(Method::POST, url).multipart(form))
            .await?;
        debug!(provider = %target.provider, name = %file.name, "uploaded file");
        Ok(())
    }
}

#[async_trait]
impl StorageApi for HttpStorageClient {
    fn name(&self) -> &str {
        "http"
    }

    fn providers(&self) -> Vec<Provider> {
        self.registry.providers()
    }

    async fn list_connections(&self, provider: Provider) -> Result<Vec<Connection>> {
        let url = self.url(provider, "connections")?;
        let response = self.send(self.request(Method::GET, url)).await?;
        let records: Option<Vec<Map<String, Value>>> = Self::decode(response).await?;

        records
            .unwrap_or_default()
            .into_iter()
            .map(|record| Connection::from_record(provider, record))
            .collect()
    }

    async fn test_connection(
        &self,
        provider: Provider,
        bucket: &str,
        credentials: &Credentials,
    ) -> Result<()> {
        let body = BucketRequest {
            bucket: bucket.to_string(),
            credentials: credentials.clone(),
        };
        self.post_unit(provider, "test", &body).await
    }

    async fn create_connection(&self, provider: Provider, form: &ConnectionForm) -> Result<()> {
        self.post_unit(provider, "connection", form).await
    }

    async fn update_connection(
        &self,
        provider: Provider,
        id: &ConnectionId,
        form: &ConnectionForm,
    ) -> Result<()> {
        let url = self.connection_url(provider, id)?;
        self.send(self.request(Method::PUT, url).json(form)).await?;
        Ok(())
    }

    async fn delete_connection(&self, provider: Provider, id: &ConnectionId) -> Result<()> {
        let url = self.connection_url(provider, id)?;
        self.send(self.request(Method::DELETE, url)).await?;
        Ok(())
    }

    async fn browse_objects(
        &self,
        target: &BucketTarget,
        prefix: &str,
        page_token: Option<&str>,
    ) -> Result<BrowsePage> {
        let body = BrowseRequest {
            bucket: target.bucket.clone(),
            credentials: target.credentials.clone(),
            prefix: prefix.to_string(),
            page_token: page_token.unwrap_or_default().to_string(),
        };
        self.post_json(target.provider, "bucket/browse", &body).await
    }

    async fn get_download_url(&self, target: &BucketTarget, object: &str) -> Result<String> {
        let response: DownloadUrlResponse = self
            .post_json(
                target.provider,
                "bucket/download",
                &Self::object_request(target, object),
            )
            .await?;
        Ok(response.url)
    }

    async fn delete_object(&self, target: &BucketTarget, object: &str) -> Result<()> {
        self.post_unit(
            target.provider,
            "bucket/delete",
            &Self::object_request(target, object),
        )
        .await
    }

    async fn copy_object(
        &self,
        target: &BucketTarget,
        source: &str,
        destination: &str,
        delete_source: bool,
    ) -> Result<()> {
        let body = CopyRequest {
            bucket: target.bucket.clone(),
            credentials: target.credentials.clone(),
            source: source.to_string(),
            destination: destination.to_string(),
            delete_source,
        };
        self.post_unit(target.provider, "bucket/copy", &body).await
    }

    async fn upload_objects(
        &self,
        target: &BucketTarget,
        prefix: &str,
        files: Vec<UploadFile>,
    ) -> Result<()> {
        // Every request runs to completion; the first failure in file order wins.
        let results = join_all(
            files
                .into_iter()
                .map(|file| self.upload_one(target, prefix, file)),
        )
        .await;

        results.into_iter().collect()
    }

    async fn get_bucket_stats(&self, target: &BucketTarget) -> Result<BucketStats> {
        self.post_json(target.provider, "bucket/stats", &Self::bucket_request(target))
            .await
    }

    async fn get_object_metadata(
        &self,
        target: &BucketTarget,
        object: &str,
    ) -> Result<ObjectMetadata> {
        self.post_json(
            target.provider,
            "bucket/metadata",
            &Self::object_request(target, object),
        )
        .await
    }

    async fn update_object_metadata(
        &self,
        target: &BucketTarget,
        object: &str,
        patch: &MetadataPatch,
    ) -> Result<()> {
        let body = MetadataUpdateRequest {
            bucket: target.bucket.clone(),
            credentials: target.credentials.clone(),
            object: object.to_string(),
            patch: patch.clone(),
        };
        self.post_unit(target.provider, "bucket/metadata/update", &body)
            .await
    }

    async fn list_objects(&self, target: &BucketTarget) -> Result<ObjectListing> {
        self.post_json(target.provider, "bucket/objects", &Self::bucket_request(target))
            .await
    }
}
