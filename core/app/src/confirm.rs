//! Single-slot confirmation mediator.

use once_cell::sync::Lazy;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::debug;

/// Title used when `confirm` is given none.
pub const DEFAULT_TITLE: &str = "Are you sure?";

/// The request currently waiting for an answer.
#[derive(Debug)]
pub struct PendingConfirmation {
    pub title: String,
    pub message: String,
    resolver: oneshot::Sender<bool>,
}

/// What a renderer needs to show the pending request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationPrompt {
    pub title: String,
    pub message: String,
}

static GLOBAL: Lazy<ConfirmationGate> = Lazy::new(ConfirmationGate::new);

/// Holds at most one outstanding confirmation request.
///
/// A new `confirm` replaces the pending request. The replaced caller is
/// neither resolved nor failed: its future stays pending forever.
#[derive(Clone)]
pub struct ConfirmationGate {
    slot: Arc<watch::Sender<Option<PendingConfirmation>>>,
}

impl ConfirmationGate {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    /// The process-wide gate.
    pub fn global() -> &'static ConfirmationGate {
        &GLOBAL
    }

    /// Register a request and return the future of its answer.
    ///
    /// The request occupies the slot as soon as this returns, before the
    /// future is first polled.
    pub fn confirm(
        &self,
        message: impl Into<String>,
        title: Option<&str>,
    ) -> impl Future<Output = bool> + Send + 'static {
        let (resolver, answer) = oneshot::channel();
        let pending = PendingConfirmation {
            title: title.unwrap_or(DEFAULT_TITLE).to_string(),
            message: message.into(),
            resolver,
        };
        debug!(title = %pending.title, "confirmation requested");

        if let Some(previous) = self.slot.send_replace(Some(pending)) {
            debug!(message = %previous.message, "pending confirmation abandoned");
        }

        async move {
            match answer.await {
                Ok(outcome) => outcome,
                // Abandoned: the caller never gets an answer.
                Err(_) => std::future::pending().await,
            }
        }
    }

    /// Resolve the pending request, if any, and clear the slot.
    pub fn respond(&self, outcome: bool) {
        let mut taken = None;
        self.slot.send_if_modified(|slot| {
            taken = slot.take();
            taken.is_some()
        });
        if let Some(pending) = taken {
            debug!(outcome, "confirmation answered");
            let _ = pending.resolver.send(outcome);
        }
    }

    /// Title and message of the pending request.
    pub fn pending(&self) -> Option<ConfirmationPrompt> {
        self.slot.borrow().as_ref().map(|p| ConfirmationPrompt {
            title: p.title.clone(),
            message: p.message.clone(),
        })
    }

    /// Watch the slot; fires on every new request and every answer.
    pub fn subscribe(&self) -> watch::Receiver<Option<PendingConfirmation>> {
        self.slot.subscribe()
    }
}

impl Default for ConfirmationGate {
    fn default() -> Self {
        Self::new()
    }
}
