//! Named storage drivers.
//!
//! A host application looks drivers up by the name found in its
//! configuration (`storage.driver`).  Each driver is a factory that turns
//! the container settings into a ready [`Filesystem`].

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tracing::info;

use crate::config::{AzureConfig, StorageConfig};
use crate::errors::{FsError, FsResult};
use crate::storage::azure::AzureBlobFilesystem;
use crate::storage::backend::Filesystem;
use crate::storage::memory::MemoryFilesystem;

/// Builds a filesystem from the account, key and container settings.
pub type DriverFactory =
    Arc<dyn Fn(&AzureConfig) -> FsResult<Arc<dyn Filesystem>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, DriverFactory>,
}

impl Debug for DriverRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the `azure` and `memory` drivers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("azure", |config: &AzureConfig| {
            let config = config.clone().resolve_from_env()?;
            let fs = AzureBlobFilesystem::new(&config)?;
            Ok(Arc::new(fs) as Arc<dyn Filesystem>)
        });
        registry.register("memory", |_config: &AzureConfig| {
            Ok(Arc::new(MemoryFilesystem::new()) as Arc<dyn Filesystem>)
        });
        registry
    }

    /// Register `factory` under `name`, replacing any previous driver.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&AzureConfig) -> FsResult<Arc<dyn Filesystem>> + Send + Sync + 'static,
    {
        self.drivers.insert(name.into(), Arc::new(factory));
    }

    pub fn names(&self) -> Vec<&str> {
        self.drivers.keys().map(String::as_str).collect()
    }

    /// Build the driver registered as `name`.
    pub fn create(&self, name: &str, config: &AzureConfig) -> FsResult<Arc<dyn Filesystem>> {
        let factory = self.drivers.get(name).ok_or_else(|| {
            FsError::config(format!(
                "unknown storage driver '{}' (registered: {})",
                name,
                self.names().join(", ")
            ))
        })?;
        let fs = factory(config)?;
        info!("Storage driver '{}' initialized", name);
        Ok(fs)
    }

    /// Build the driver selected by a `storage` configuration section.
    pub fn create_from_config(&self, storage: &StorageConfig) -> FsResult<Arc<dyn Filesystem>> {
        let azure = storage.azure.clone().unwrap_or_default();
        self.create(&storage.driver, &azure)
    }
}
