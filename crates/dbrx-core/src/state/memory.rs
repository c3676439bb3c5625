// # Memory Object Store
//
// In-memory implementation of ObjectStore.
//
// ## Purpose
//
// Provides a simple, fast store that doesn't persist across restarts.
// Useful for testing and for hosts that re-declare every object on startup.
//
// ## Crash Behavior
//
// - All objects and statuses are lost on restart/crash
// - Re-declared objects start without a recorded handle; their first pass
//   creates, collides with the existing remote resource and adopts it

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::ObjectTable;
use crate::Error;
use crate::adapters::ResourceSpec;
use crate::config::StoreConfig;
use crate::model::{ManagedObject, ObjectKey, ObjectStatus, ResourceKind};
use crate::traits::{ObjectStore, ObjectStoreFactory};

/// In-memory object store implementation
///
/// This implementation stores all objects in a table protected by a RwLock.
/// Clones share the same table.
///
/// # Example
///
/// ```rust,no_run
/// use dbrx_core::adapters::{FilesystemBlockSpec, ResourceSpec};
/// use dbrx_core::state::MemoryObjectStore;
/// use dbrx_core::{ObjectKey, ObjectStore, ResourceKind};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryObjectStore::new();
///     let key = ObjectKey::new("team-a", "settings");
///
///     let spec = ResourceSpec::FilesystemBlock(FilesystemBlockSpec::new("/conf/a.json", b"{}"));
///     let obj = store.apply(ResourceKind::FilesystemBlock, &key, spec).await?;
///     assert_eq!(obj.generation, 1);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    inner: Arc<RwLock<ObjectTable>>,
}

impl MemoryObjectStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of objects in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn load(&self, kind: ResourceKind, key: &ObjectKey) -> Result<Option<ManagedObject>, Error> {
        Ok(self.inner.read().await.load(kind, key))
    }

    async fn update_status(
        &self,
        kind: ResourceKind,
        key: &ObjectKey,
        expected_version: u64,
        status: &ObjectStatus,
    ) -> Result<u64, Error> {
        self.inner
            .write()
            .await
            .update_status(kind, key, expected_version, status)
    }

    async fn set_finalizer(
        &self,
        kind: ResourceKind,
        key: &ObjectKey,
        expected_version: u64,
        present: bool,
        status: Option<&ObjectStatus>,
    ) -> Result<u64, Error> {
        self.inner
            .write()
            .await
            .set_finalizer(kind, key, expected_version, present, status)
    }

    async fn apply(
        &self,
        kind: ResourceKind,
        key: &ObjectKey,
        spec: ResourceSpec,
    ) -> Result<ManagedObject, Error> {
        self.inner.write().await.apply(kind, key, spec)
    }

    async fn request_deletion(&self, kind: ResourceKind, key: &ObjectKey) -> Result<(), Error> {
        self.inner.write().await.request_deletion(kind, key);
        Ok(())
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<ObjectKey>, Error> {
        Ok(self.inner.read().await.list(kind))
    }
}

/// Factory for [`MemoryObjectStore`]
#[derive(Debug, Default)]
pub struct MemoryObjectStoreFactory;

#[async_trait]
impl ObjectStoreFactory for MemoryObjectStoreFactory {
    async fn create(&self, config: &StoreConfig) -> Result<Box<dyn ObjectStore>, Error> {
        match config {
            StoreConfig::Memory => Ok(Box::new(MemoryObjectStore::new())),
            other => Err(Error::config(format!(
                "memory store factory cannot build a '{}' store",
                other.type_name()
            ))),
        }
    }
}
