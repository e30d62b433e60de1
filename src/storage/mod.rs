//! Storage drivers.
//!
//! The [`backend::Filesystem`] trait abstracts over where bytes
//! physically live.  Implementations are an Azure Blob Storage container
//! and an in-process map.

pub mod azure;
pub mod backend;
pub mod memory;
