//! Transient notification queue.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::debug;

/// Default lifetime of success and info toasts.
pub const DEFAULT_DURATION: Duration = Duration::from_millis(4000);

/// Default lifetime of error toasts.
pub const ERROR_DURATION: Duration = Duration::from_millis(6000);

/// Toast severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Error,
    Info,
}

/// One queued notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToastEntry {
    pub id: u64,
    pub message: String,
    pub severity: Severity,
}

struct Inner {
    entries: watch::Sender<Vec<ToastEntry>>,
    next_id: AtomicU64,
}

static GLOBAL: Lazy<ToastQueue> = Lazy::new(ToastQueue::new);

/// Ordered queue of notifications with optional expiry.
///
/// Cloning yields another handle to the same queue. Ids are assigned in
/// push order starting at 1 and never reused.
#[derive(Clone)]
pub struct ToastQueue {
    inner: Arc<Inner>,
}

impl ToastQueue {
    /// Create an isolated, empty queue.
    pub fn new() -> Self {
        let (entries, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(Inner {
                entries,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// The process-wide queue.
    pub fn global() -> &'static ToastQueue {
        &GLOBAL
    }

    /// Append a toast and return its id.
    ///
    /// A non-zero `duration` schedules removal on the current tokio
    /// runtime; `Duration::ZERO` keeps the toast until [`remove`](Self::remove).
    /// Outside a runtime there is nothing to run the timer, so the toast
    /// stays until removed explicitly.
    pub fn push(&self, message: impl Into<String>, severity: Severity, duration: Duration) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = ToastEntry {
            id,
            message: message.into(),
            severity,
        };
        debug!(id, ?severity, message = %entry.message, "toast pushed");
        self.inner.entries.send_modify(|entries| entries.push(entry));

        if !duration.is_zero() {
            match Handle::try_current() {
                Ok(handle) => {
                    let queue = self.clone();
                    handle.spawn(async move {
                        tokio::time::sleep(duration).await;
                        queue.remove(id);
                    });
                }
                Err(_) => debug!(id, "no runtime, toast kept until removed"),
            }
        }
        id
    }

    /// Remove a toast. Unknown or already removed ids are ignored.
    pub fn remove(&self, id: u64) {
        self.inner.entries.send_if_modified(|entries| {
            let before = entries.len();
            entries.retain(|entry| entry.id != id);
            entries.len() != before
        });
    }

    pub fn success(&self, message: impl Into<String>) -> u64 {
        self.success_for(message, DEFAULT_DURATION)
    }

    pub fn success_for(&self, message: impl Into<String>, duration: Duration) -> u64 {
        self.push(message, Severity::Success, duration)
    }

    pub fn error(&self, message: impl Into<String>) -> u64 {
        self.error_for(message, ERROR_DURATION)
    }

    pub fn error_for(&self, message: impl Into<String>, duration: Duration) -> u64 {
        self.push(message, Severity::Error, duration)
    }

    pub fn info(&self, message: impl Into<String>) -> u64 {
        self.info_for(message, DEFAULT_DURATION)
    }

    pub fn info_for(&self, message: impl Into<String>, duration: Duration) -> u64 {
        self.push(message, Severity::Info, duration)
    }

    /// Current toasts, oldest first.
    pub fn entries(&self) -> Vec<ToastEntry> {
        self.inner.entries.borrow().clone()
    }

    /// Watch the queue; the receiver sees every change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<ToastEntry>> {
        self.inner.entries.subscribe()
    }
}

impl Default for ToastQueue {
    fn default() -> Self {
        Self::new()
    }
}
