//! Common utilities and types shared across the ossportable crates.
//!
//! This module provides the error type and the small identifier types
//! (providers, connection ids, credential blobs) that every layer passes around.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ConnectionId, Credentials, Provider};
