//! Client-side mirror of the saved connections of every provider.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use ossportable_common::{ConnectionId, Credentials, Error, Provider};
use ossportable_storage::{Connection, ConnectionForm, StorageApi};

pub const TEST_SUCCEEDED: &str = "Connection test succeeded ✓";
pub const SAVED: &str = "Connection saved ✓";
pub const UPDATED: &str = "Connection updated ✓";
pub const LOAD_FAILED: &str = "Failed to load connections.";

/// Observable store state. Empty `error`/`notice` means no message.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreState {
    pub connections: Vec<Connection>,
    pub loading: bool,
    pub testing: bool,
    pub saving: bool,
    pub error: String,
    pub notice: String,
}

/// Message for a failed connection operation.
///
/// Server rejections keep the operation label and the server's text;
/// anything else is reported as a plain error.
fn failure_message(label: &str, err: &Error) -> String {
    match err {
        Error::Status { body, .. } => format!("{}: {}", label, body),
        other => format!("Error: {}", other),
    }
}

/// Connection list plus lifecycle flags and a message area.
///
/// Operations never return errors: failures land in `error`. Overlapping
/// calls are not serialized, so the last response to settle wins.
pub struct ConnectionStore {
    api: Arc<dyn StorageApi>,
    state: watch::Sender<StoreState>,
}

impl ConnectionStore {
    pub fn new(api: Arc<dyn StorageApi>) -> Self {
        let (state, _) = watch::channel(StoreState::default());
        Self { api, state }
    }

    /// Backend the store talks to.
    pub fn api(&self) -> &Arc<dyn StorageApi> {
        &self.api
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> StoreState {
        self.state.borrow().clone()
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.state.borrow().connections.clone()
    }

    /// Saved connection with this id, optionally restricted to one provider.
    pub fn find(&self, provider: Option<Provider>, id: &ConnectionId) -> Option<Connection> {
        self.state
            .borrow()
            .connections
            .iter()
            .find(|c| c.id.as_ref() == Some(id) && provider.map_or(true, |p| c.provider == p))
            .cloned()
    }

    /// Watch the state; the receiver sees every change.
    pub fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.state.subscribe()
    }

    /// Reset `error` and `notice`.
    pub fn clear_messages(&self) {
        self.state.send_if_modified(|s| {
            let changed = !s.error.is_empty() || !s.notice.is_empty();
            s.error.clear();
            s.notice.clear();
            changed
        });
    }

    fn set_notice(&self, notice: &str) {
        self.state.send_modify(|s| s.notice = notice.to_string());
    }

    fn set_error(&self, error: String) {
        self.state.send_modify(|s| s.error = error);
    }

    /// Reload every provider's connections concurrently.
    ///
    /// Providers that fail to answer contribute nothing; the list is
    /// replaced with the concatenation in registry order.
    pub async fn fetch_connections(&self) {
        self.clear_messages();
        self.reload().await;
    }

    /// Reload without touching messages, so an operation's notice survives.
    async fn reload(&self) {
        self.state.send_modify(|s| s.loading = true);

        let providers = self.api.providers();
        let results = join_all(providers.iter().map(|&provider| {
            let api = Arc::clone(&self.api);
            async move { (provider, api.list_connections(provider).await) }
        }))
        .await;

        let mut connections = Vec::new();
        let mut total_failure = false;
        for (provider, result) in results {
            match result {
                Ok(list) => connections.extend(list),
                Err(Error::Serialization(e)) => {
                    warn!(%provider, error = %e, "unreadable connection listing");
                    total_failure = true;
                }
                Err(e) => warn!(%provider, error = %e, "provider unavailable, treating as empty"),
            }
        }

        self.state.send_modify(|s| {
            if total_failure {
                s.error = LOAD_FAILED.to_string();
            } else {
                s.connections = connections;
            }
            s.loading = false;
        });
    }

    /// Check credentials against a bucket without saving anything.
    pub async fn test_connection(&self, provider: Provider, bucket: &str, credentials: &Credentials) {
        self.clear_messages();
        self.state.send_modify(|s| s.testing = true);

        match self.api.test_connection(provider, bucket, credentials).await {
            Ok(()) => self.set_notice(TEST_SUCCEEDED),
            Err(e) => self.set_error(failure_message("Test failed", &e)),
        }

        self.state.send_modify(|s| s.testing = false);
    }

    /// Create a connection; on success the list is reloaded before returning.
    pub async fn save_connection(&self, provider: Provider, form: &ConnectionForm) -> bool {
        self.clear_messages();
        self.state.send_modify(|s| s.saving = true);

        let saved = match self.api.create_connection(provider, form).await {
            Ok(()) => {
                info!(%provider, name = %form.name, "connection saved");
                self.set_notice(SAVED);
                self.reload().await;
                true
            }
            Err(e) => {
                self.set_error(failure_message("Save failed", &e));
                false
            }
        };

        self.state.send_modify(|s| s.saving = false);
        saved
    }

    /// Replace a connection's fields; on success the list is reloaded before returning.
    pub async fn update_connection(
        &self,
        provider: Provider,
        id: &ConnectionId,
        form: &ConnectionForm,
    ) -> bool {
        self.clear_messages();
        self.state.send_modify(|s| s.saving = true);

        let updated = match self.api.update_connection(provider, id, form).await {
            Ok(()) => {
                info!(%provider, %id, "connection updated");
                self.set_notice(UPDATED);
                self.reload().await;
                true
            }
            Err(e) => {
                self.set_error(failure_message("Update failed", &e));
                false
            }
        };

        self.state.send_modify(|s| s.saving = false);
        updated
    }

    /// Delete a connection. The outcome is only visible through the state.
    pub async fn remove_connection(&self, provider: Provider, id: &ConnectionId) {
        self.clear_messages();

        match self.api.delete_connection(provider, id).await {
            Ok(()) => {
                info!(%provider, %id, "connection removed");
                self.reload().await;
            }
            Err(e) => self.set_error(format!("Delete failed: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ossportable_storage::{Fault, MemoryBackend};
    use serde_json::{json, Map, Value};
    use std::time::Duration;

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn form(name: &str, bucket: &str) -> ConnectionForm {
        ConnectionForm::new(name, bucket, Credentials::new(r#"{"key":"k"}"#))
    }

    async fn backend() -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        for provider in Provider::ALL {
            backend.create_bucket(provider, "b1").await;
        }
        backend
    }

    fn store(backend: &Arc<MemoryBackend>) -> ConnectionStore {
        ConnectionStore::new(backend.clone())
    }

    #[tokio::test]
    async fn test_fetch_tags_every_record() {
        let backend = backend().await;
        backend
            .seed_connection(Provider::Gcp, record(json!({"name": "g", "provider": "aws"})))
            .await;
        backend
            .seed_connection(Provider::Alibaba, record(json!({"name": "a"})))
            .await;

        let store = store(&backend);
        store.fetch_connections().await;

        let state = store.snapshot();
        assert!(!state.loading);
        let tags: Vec<_> = state.connections.iter().map(|c| c.provider).collect();
        assert_eq!(tags, vec![Provider::Gcp, Provider::Alibaba]);
    }

    #[tokio::test]
    async fn test_fetch_order_follows_registry_not_arrival() {
        let backend = backend().await;
        backend.set_delay(Provider::Gcp, Duration::from_millis(60)).await;
        for provider in Provider::ALL {
            backend
                .seed_connection(provider, record(json!({"name": provider.as_str()})))
                .await;
        }

        let store = store(&backend);
        store.fetch_connections().await;

        let tags: Vec<_> = store.connections().iter().map(|c| c.provider).collect();
        assert_eq!(tags, Provider::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_failed_providers_degrade_to_empty() {
        let backend = backend().await;
        for provider in Provider::ALL {
            backend
                .seed_connection(provider, record(json!({"name": provider.as_str()})))
                .await;
        }

        let store = store(&backend);
        store.fetch_connections().await;
        assert_eq!(store.connections().len(), 5);

        backend
            .set_fault(Provider::Aws, Some(Fault::status(502, "bad gateway")))
            .await;
        backend
            .set_fault(Provider::Azure, Some(Fault::Transport("timed out".into())))
            .await;
        store.fetch_connections().await;

        let state = store.snapshot();
        assert!(!state.loading);
        assert!(state.error.is_empty());
        let tags: Vec<_> = state.connections.iter().map(|c| c.provider).collect();
        assert_eq!(tags, vec![Provider::Gcp, Provider::Huawei, Provider::Alibaba]);
    }

    #[tokio::test]
    async fn test_unreadable_listing_is_total_failure() {
        let backend = backend().await;
        backend
            .seed_connection(Provider::Gcp, record(json!({"name": "g"})))
            .await;
        let store = store(&backend);
        store.fetch_connections().await;

        backend.set_malformed_listing(Provider::Huawei, true).await;
        backend
            .seed_connection(Provider::Aws, record(json!({"name": "new"})))
            .await;
        store.fetch_connections().await;

        let state = store.snapshot();
        assert_eq!(state.error, LOAD_FAILED);
        assert!(!state.loading);
        assert_eq!(state.connections.len(), 1);
    }

    #[tokio::test]
    async fn test_save_success_refreshes_and_keeps_notice() {
        let backend = backend().await;
        backend.set_delay(Provider::Gcp, Duration::from_millis(50)).await;
        let store = Arc::new(store(&backend));

        let task = {
            let store = store.clone();
            tokio::spawn(async move { store.save_connection(Provider::Gcp, &form("main", "b1")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.snapshot().saving);

        assert!(task.await.unwrap());
        let state = store.snapshot();
        assert!(!state.saving);
        assert_eq!(state.notice, SAVED);
        assert!(state.error.is_empty());
        assert!(state
            .connections
            .iter()
            .any(|c| c.provider == Provider::Gcp && c.name() == Some("main")));
    }

    #[tokio::test]
    async fn test_save_rejection_reports_server_text() {
        let backend = backend().await;
        backend
            .seed_connection(Provider::Gcp, record(json!({"name": "existing"})))
            .await;
        let store = store(&backend);
        store.fetch_connections().await;
        let before = store.connections();

        backend
            .set_fault(Provider::Gcp, Some(Fault::status(400, "bucket name invalid")))
            .await;
        assert!(!store.save_connection(Provider::Gcp, &form("x", "b1")).await);

        let state = store.snapshot();
        assert_eq!(state.error, "Save failed: bucket name invalid");
        assert!(state.notice.is_empty());
        assert!(!state.saving);
        assert_eq!(state.connections, before);
    }

    #[tokio::test]
    async fn test_save_transport_failure() {
        let backend = backend().await;
        backend
            .set_fault(Provider::Aws, Some(Fault::Transport("connection refused".into())))
            .await;
        let store = store(&backend);

        assert!(!store.save_connection(Provider::Aws, &form("x", "b1")).await);
        assert_eq!(store.snapshot().error, "Error: connection refused");
    }

    #[tokio::test]
    async fn test_store_matches_fresh_fetch_after_mutations() {
        let backend = backend().await;
        let store = store(&backend);

        assert!(store.save_connection(Provider::Huawei, &form("one", "b1")).await);
        assert!(store.save_connection(Provider::Azure, &form("two", "b1")).await);
        let id = store.connections()[0].id.clone().unwrap();
        assert!(
            store
                .update_connection(Provider::Huawei, &id, &form("renamed", "b1"))
                .await
        );
        assert_eq!(store.snapshot().notice, UPDATED);

        let fresh = ConnectionStore::new(backend.clone());
        fresh.fetch_connections().await;
        assert_eq!(store.connections(), fresh.connections());

        store.remove_connection(Provider::Huawei, &id).await;
        assert!(store.snapshot().error.is_empty());
        fresh.fetch_connections().await;
        assert_eq!(store.connections(), fresh.connections());
        assert_eq!(store.connections().len(), 1);
    }

    #[tokio::test]
    async fn test_update_and_remove_failures() {
        let backend = backend().await;
        let store = store(&backend);
        let missing = ConnectionId::from_number(99);

        assert!(
            !store
                .update_connection(Provider::Gcp, &missing, &form("x", "b1"))
                .await
        );
        assert_eq!(
            store.snapshot().error,
            "Update failed: connection not found: 99"
        );

        store.remove_connection(Provider::Gcp, &missing).await;
        assert_eq!(
            store.snapshot().error,
            "Delete failed: connection not found: 99"
        );
    }

    #[tokio::test]
    async fn test_connection_test_does_not_touch_list() {
        let backend = backend().await;
        backend
            .seed_connection(Provider::Gcp, record(json!({"name": "g"})))
            .await;
        let store = store(&backend);
        store.fetch_connections().await;
        let before = store.connections();

        store
            .test_connection(Provider::Gcp, "b1", &Credentials::new("{}"))
            .await;
        let state = store.snapshot();
        assert_eq!(state.notice, TEST_SUCCEEDED);
        assert!(!state.testing);

        store
            .test_connection(Provider::Gcp, "nope", &Credentials::new("{}"))
            .await;
        let state = store.snapshot();
        assert_eq!(state.error, "Test failed: bucket not found: nope");
        assert!(state.notice.is_empty());
        assert_eq!(state.connections, before);
    }

    #[tokio::test]
    async fn test_clear_messages_is_idempotent() {
        let backend = backend().await;
        let store = store(&backend);
        store
            .test_connection(Provider::Gcp, "b1", &Credentials::new("{}"))
            .await;

        let mut rx = store.subscribe();
        let _ = rx.borrow_and_update();
        store.clear_messages();
        assert!(rx.has_changed().unwrap());
        let _ = rx.borrow_and_update();

        store.clear_messages();
        assert!(!rx.has_changed().unwrap());
        assert!(store.snapshot().notice.is_empty());
    }

    #[tokio::test]
    async fn test_find_by_id() {
        let backend = backend().await;
        let store = store(&backend);
        assert!(store.save_connection(Provider::Alibaba, &form("oss", "b1")).await);

        let id = ConnectionId::from_number(1);
        assert_eq!(
            store.find(None, &id).and_then(|c| c.bucket().map(str::to_string)),
            Some("b1".to_string())
        );
        assert!(store.find(Some(Provider::Gcp), &id).is_none());
    }
}
