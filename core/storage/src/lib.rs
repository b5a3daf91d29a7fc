//! Provider-independent object storage client.
//!
//! Every supported provider exposes the same HTTP surface under
//! `/api/{provider}`. This crate models that surface as the
//! [`StorageApi`] trait, with an HTTP implementation for real servers and
//! an in-memory one for tests.
//!
//! # Design Principles
//! - Provider routing lives in the [`ProviderRegistry`], nowhere else
//! - Stateless calls: nothing is cached between operations
//! - Server error text reaches the caller verbatim

pub mod api;
pub mod client;
pub mod config;
pub mod connection;
pub mod memory;
pub mod protocol;
pub mod registry;

pub use api::StorageApi;
pub use client::HttpStorageClient;
pub use config::{ClientConfig, DEFAULT_BASE_URL};
pub use connection::{Connection, ConnectionForm};
pub use memory::{Fault, MemoryBackend};
pub use protocol::{
    BrowsePage, BucketEntry, BucketStats, BucketTarget, MetadataPatch, ObjectListing,
    ObjectMetadata, ObjectSummary, UploadFile,
};
pub use registry::{create_default_registry, ProviderRegistry};
