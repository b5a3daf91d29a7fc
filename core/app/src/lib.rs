//! Reactive application state for the storage portal.
//!
//! - [`ConnectionStore`]: saved connections of every provider, with
//!   lifecycle flags and a message area
//! - [`ToastQueue`]: transient notifications with expiry
//! - [`ConfirmationGate`]: single-slot yes/no request channel
//!
//! Every piece publishes its state through a `tokio::sync::watch`
//! channel that renderers subscribe to.

pub mod confirm;
pub mod store;
pub mod toast;

pub use confirm::{ConfirmationGate, ConfirmationPrompt, PendingConfirmation};
pub use store::{ConnectionStore, StoreState};
pub use toast::{Severity, ToastEntry, ToastQueue};
