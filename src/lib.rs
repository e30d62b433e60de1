//! blobfs library -- a filesystem view of an Azure Blob Storage container.
//!
//! This crate provides the [`Filesystem`] contract, an Azure Blob driver
//! speaking the REST API directly (Shared Key signing, SAS URLs, marker
//! pagination and server-side copy), an in-memory driver, and a registry
//! that builds drivers by name from configuration.

pub mod config;
pub mod errors;
pub mod http;
pub mod metrics;
pub mod mime;
pub mod registry;
pub mod storage;

pub use errors::{FsError, FsResult};
pub use registry::DriverRegistry;
pub use storage::azure::AzureBlobFilesystem;
pub use storage::backend::{Filesystem, ListingEntry, WriteOptions};
pub use storage::memory::MemoryFilesystem;
