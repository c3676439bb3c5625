//! Plugin-based component registry
//!
//! The registry allows remote clients and object stores to be registered
//! dynamically at runtime, so hosts build components from configuration
//! without hardcoded if-else chains.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dbrx_core::registry::Registry;
//! use dbrx_core::OperatorConfig;
//!
//! let registry = Registry::with_builtin_stores();
//! dbrx_provider_rest::register(&registry);
//!
//! let config = OperatorConfig::from_env()?;
//! let remote = registry.create_remote_client(&config.remote)?;
//! let store = registry.create_object_store(&config.store).await?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::{RemoteConfig, StoreConfig};
use crate::error::{Error, Result};
use crate::state::{FileObjectStoreFactory, MemoryObjectStoreFactory};
use crate::traits::{ObjectStore, ObjectStoreFactory, RemoteClient, RemoteClientFactory};

/// Registry for plugin-based component creation
///
/// The registry maintains a map of type names to factory objects,
/// allowing dynamic instantiation based on configuration.
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct Registry {
    /// Registered remote client factories
    remote_clients: RwLock<HashMap<String, Box<dyn RemoteClientFactory>>>,

    /// Registered object store factories
    object_stores: RwLock<HashMap<String, Arc<dyn ObjectStoreFactory>>>,
}

// A panic while holding the lock cannot leave a map half-written
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the `memory` and `file` stores registered
    pub fn with_builtin_stores() -> Self {
        let registry = Self::new();
        registry.register_object_store("memory", Box::new(MemoryObjectStoreFactory));
        registry.register_object_store("file", Box::new(FileObjectStoreFactory));
        registry
    }

    /// Register a remote client factory
    ///
    /// # Parameters
    ///
    /// - `name`: Client type name (e.g., "rest")
    /// - `factory`: Factory object for creating client instances
    pub fn register_remote_client(
        &self,
        name: impl Into<String>,
        factory: Box<dyn RemoteClientFactory>,
    ) {
        write(&self.remote_clients).insert(name.into(), factory);
    }

    /// Register an object store factory
    ///
    /// # Parameters
    ///
    /// - `name`: Store type name (e.g., "file", "memory")
    /// - `factory`: Factory object for creating store instances
    pub fn register_object_store(
        &self,
        name: impl Into<String>,
        factory: Box<dyn ObjectStoreFactory>,
    ) {
        write(&self.object_stores).insert(name.into(), Arc::from(factory));
    }

    /// Create a remote client from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn RemoteClient>)`: Created client instance
    /// - `Err(Error)`: If the client type is not registered or creation fails
    pub fn create_remote_client(&self, config: &RemoteConfig) -> Result<Box<dyn RemoteClient>> {
        let client_type = config.type_name();
        let clients = read(&self.remote_clients);

        let factory = clients
            .get(client_type)
            .ok_or_else(|| Error::config(format!("Unknown remote client type: {}", client_type)))?;

        factory.create(config)
    }

    /// Create an object store from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn ObjectStore>)`: Created store instance
    /// - `Err(Error)`: If the store type is not registered or creation fails
    pub async fn create_object_store(&self, config: &StoreConfig) -> Result<Box<dyn ObjectStore>> {
        let store_type = config.type_name();

        // Release the lock before calling async create
        let factory = read(&self.object_stores)
            .get(store_type)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown object store type: {}", store_type)))?;

        factory.create(config).await
    }

    /// List all registered remote client types
    pub fn list_remote_clients(&self) -> Vec<String> {
        read(&self.remote_clients).keys().cloned().collect()
    }

    /// List all registered object store types
    pub fn list_object_stores(&self) -> Vec<String> {
        read(&self.object_stores).keys().cloned().collect()
    }

    /// Check if a remote client type is registered
    pub fn has_remote_client(&self, name: &str) -> bool {
        read(&self.remote_clients).contains_key(name)
    }

    /// Check if an object store type is registered
    pub fn has_object_store(&self, name: &str) -> bool {
        read(&self.object_stores).contains_key(name)
    }
}
