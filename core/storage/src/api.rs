//! Storage API trait definition.

use async_trait::async_trait;
use std::collections::HashSet;
use tracing::debug;

use ossportable_common::{ConnectionId, Credentials, Error, Provider, Result};

use crate::connection::{Connection, ConnectionForm};
use crate::protocol::{
    BrowsePage, BucketEntry, BucketStats, BucketTarget, MetadataPatch, ObjectListing,
    ObjectMetadata, UploadFile,
};

/// Uniform operation set over every supported provider.
///
/// Implementations are stateless from the caller's point of view: nothing
/// here caches results, and every failure is returned to the caller.
/// A non-2xx answer surfaces as [`Error::Status`] carrying the server's
/// text, a transport failure as [`Error::Transport`].
#[async_trait]
pub trait StorageApi: Send + Sync {
    /// Implementation name (e.g., "http", "memory").
    fn name(&self) -> &str;

    /// Providers this backend can address, in fetch order.
    fn providers(&self) -> Vec<Provider>;

    /// List saved connections of one provider, tagged with that provider.
    async fn list_connections(&self, provider: Provider) -> Result<Vec<Connection>>;

    /// Check bucket credentials without persisting anything.
    async fn test_connection(
        &self,
        provider: Provider,
        bucket: &str,
        credentials: &Credentials,
    ) -> Result<()>;

    /// Persist a new connection.
    async fn create_connection(&self, provider: Provider, form: &ConnectionForm) -> Result<()>;

    /// Replace a saved connection's fields.
    async fn update_connection(
        &self,
        provider: Provider,
        id: &ConnectionId,
        form: &ConnectionForm,
    ) -> Result<()>;

    /// Delete a saved connection.
    async fn delete_connection(&self, provider: Provider, id: &ConnectionId) -> Result<()>;

    /// Fetch one page of the listing under `prefix`.
    ///
    /// `None` (or an empty token) requests the first page. The returned
    /// `next_page_token` is `None` once the listing is exhausted. Ordering
    /// is only guaranteed within a page.
    async fn browse_objects(
        &self,
        target: &BucketTarget,
        prefix: &str,
        page_token: Option<&str>,
    ) -> Result<BrowsePage>;

    /// Follow page tokens until the listing is exhausted.
    ///
    /// # Errors
    /// - Any page fails
    /// - The server hands back a token it already returned
    async fn browse_all(&self, target: &BucketTarget, prefix: &str) -> Result<Vec<BucketEntry>> {
        let mut entries = Vec::new();
        let mut seen_tokens = HashSet::new();
        let mut token: Option<String> = None;

        loop {
            let page = self
                .browse_objects(target, prefix, token.as_deref())
                .await?;
            entries.extend(page.entries);

            match page.next_page_token {
                Some(next) => {
                    if !seen_tokens.insert(next.clone()) {
                        return Err(Error::InvalidInput(format!(
                            "Listing did not advance: page token '{}' repeated",
                            next
                        )));
                    }
                    debug!(prefix, pages = seen_tokens.len(), "following page token");
                    token = Some(next);
                }
                None => break,
            }
        }

        Ok(entries)
    }

    /// Get a time-limited direct download URL for an object.
    async fn get_download_url(&self, target: &BucketTarget, object: &str) -> Result<String>;

    /// Delete one object.
    async fn delete_object(&self, target: &BucketTarget, object: &str) -> Result<()>;

    /// Copy an object; with `delete_source` the source is removed afterwards.
    ///
    /// The server runs copy and delete as two steps. A failure does not say
    /// which step failed, so the copy may or may not have happened.
    async fn copy_object(
        &self,
        target: &BucketTarget,
        source: &str,
        destination: &str,
        delete_source: bool,
    ) -> Result<()>;

    /// Move an object: `copy_object` with `delete_source = true`.
    async fn move_object(
        &self,
        target: &BucketTarget,
        source: &str,
        destination: &str,
    ) -> Result<()> {
        self.copy_object(target, source, destination, true).await
    }

    /// Upload files under `prefix`, one concurrent request per file.
    ///
    /// Fails if any file fails. Files whose request succeeded stay
    /// uploaded, so callers re-list the bucket to learn what landed.
    async fn upload_objects(
        &self,
        target: &BucketTarget,
        prefix: &str,
        files: Vec<UploadFile>,
    ) -> Result<()>;

    /// Aggregate object count and size; possibly a lower bound.
    async fn get_bucket_stats(&self, target: &BucketTarget) -> Result<BucketStats>;

    /// Read an object's metadata. Never cached.
    async fn get_object_metadata(&self, target: &BucketTarget, object: &str)
        -> Result<ObjectMetadata>;

    /// Apply a merge-patch to an object's metadata.
    async fn update_object_metadata(
        &self,
        target: &BucketTarget,
        object: &str,
        patch: &MetadataPatch,
    ) -> Result<()>;

    /// Flat, bounded, possibly truncated single-page listing.
    async fn list_objects(&self, target: &BucketTarget) -> Result<ObjectListing>;
}
