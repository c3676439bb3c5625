// # Object Store Trait
//
// Defines the interface to the desired-state store.
//
// ## Purpose
//
// The store persists each ManagedObject (spec, status, generation,
// finalizers) and versions every write. Writers pass the version they
// read; a stale version is rejected with `Error::VersionConflict`, which
// is how concurrent spec edits and duplicate reconcile passes are kept
// from overwriting each other.
//
// ## Implementations
//
// - Memory: `state::MemoryObjectStore`
// - File-based: `state::FileObjectStore` (JSON, atomic writes)

use async_trait::async_trait;

use crate::adapters::ResourceSpec;
use crate::model::{ManagedObject, ObjectKey, ObjectStatus, ResourceKind};

/// Trait for desired-state store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
/// Every successful write increments `resource_version` by one.
///
/// # Ownership
///
/// - `apply` and `request_deletion` are control-plane writes made on behalf
///   of the declaring user or system. They never touch `status`.
/// - `update_status` and `set_finalizer` are made only by the reconciler.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Load an object
    ///
    /// # Returns
    ///
    /// - `Ok(Some(ManagedObject))`: The stored object
    /// - `Ok(None)`: No such object (never created, or fully finalized)
    /// - `Err(Error)`: Storage error
    async fn load(
        &self,
        kind: ResourceKind,
        key: &ObjectKey,
    ) -> Result<Option<ManagedObject>, crate::Error>;

    /// Replace the status sub-record
    ///
    /// # Returns
    ///
    /// - `Ok(u64)`: The new resource version
    /// - `Err(Error::VersionConflict)`: The object changed since `expected_version`
    /// - `Err(Error::NotFound)`: The object no longer exists
    async fn update_status(
        &self,
        kind: ResourceKind,
        key: &ObjectKey,
        expected_version: u64,
        status: &ObjectStatus,
    ) -> Result<u64, crate::Error>;

    /// Add or remove the remote-cleanup finalizer
    ///
    /// When `status` is given it is written in the same versioned write, so
    /// the marker and the recorded handle never disagree. Removing the
    /// marker from an object whose deletion was requested removes the
    /// object permanently.
    ///
    /// # Returns
    ///
    /// - `Ok(u64)`: The new resource version (the last version, if removed)
    /// - `Err(Error::VersionConflict)`: The object changed since `expected_version`
    async fn set_finalizer(
        &self,
        kind: ResourceKind,
        key: &ObjectKey,
        expected_version: u64,
        present: bool,
        status: Option<&ObjectStatus>,
    ) -> Result<u64, crate::Error>;

    /// Create an object or edit its spec
    ///
    /// Generation starts at 1 and increments only when the spec changes.
    ///
    /// # Returns
    ///
    /// - `Ok(ManagedObject)`: The stored object after the write
    /// - `Err(Error::InvalidSpec)`: The spec variant does not match `kind`
    async fn apply(
        &self,
        kind: ResourceKind,
        key: &ObjectKey,
        spec: ResourceSpec,
    ) -> Result<ManagedObject, crate::Error>;

    /// Request deletion
    ///
    /// An object without finalizers is removed immediately; otherwise it
    /// persists with `deletion_requested` set until the finalizer is cleared.
    async fn request_deletion(&self, kind: ResourceKind, key: &ObjectKey)
    -> Result<(), crate::Error>;

    /// List the keys of all objects of a kind
    async fn list(&self, kind: ResourceKind) -> Result<Vec<ObjectKey>, crate::Error>;
}

/// Helper trait for constructing object stores from configuration
#[async_trait]
pub trait ObjectStoreFactory: Send + Sync {
    /// Create an ObjectStore instance from configuration
    async fn create(
        &self,
        config: &crate::config::StoreConfig,
    ) -> Result<Box<dyn ObjectStore>, crate::Error>;
}
