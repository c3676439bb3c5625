// # Object Store Implementations
//
// This module provides implementations of the ObjectStore trait for
// different persistence strategies. Both share `ObjectTable`, which holds
// the versioning, generation and finalizer rules.

pub mod file;
pub mod memory;

pub use file::{FileObjectStore, FileObjectStoreFactory};
pub use memory::{MemoryObjectStore, MemoryObjectStoreFactory};

use std::collections::BTreeMap;

use crate::adapters::ResourceSpec;
use crate::error::{Error, Result};
use crate::model::{ManagedObject, ObjectKey, ObjectStatus, REMOTE_CLEANUP_FINALIZER, ResourceKind};

/// Versioned object table
#[derive(Debug, Clone, Default)]
pub(crate) struct ObjectTable {
    objects: BTreeMap<(ResourceKind, ObjectKey), ManagedObject>,
}

impl ObjectTable {
    pub fn from_objects(objects: Vec<ManagedObject>) -> Self {
        Self {
            objects: objects
                .into_iter()
                .map(|obj| ((obj.kind, obj.key.clone()), obj))
                .collect(),
        }
    }

    pub fn objects(&self) -> Vec<ManagedObject> {
        self.objects.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn load(&self, kind: ResourceKind, key: &ObjectKey) -> Option<ManagedObject> {
        self.objects.get(&(kind, key.clone())).cloned()
    }

    pub fn list(&self, kind: ResourceKind) -> Vec<ObjectKey> {
        self.objects
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, key)| key.clone())
            .collect()
    }

    pub fn apply(
        &mut self,
        kind: ResourceKind,
        key: &ObjectKey,
        spec: ResourceSpec,
    ) -> Result<ManagedObject> {
        if spec.kind() != kind {
            return Err(Error::invalid_spec(format!(
                "{} spec cannot be stored as {}",
                spec.kind(),
                kind
            )));
        }

        let slot = (kind, key.clone());
        if let Some(existing) = self.objects.get_mut(&slot) {
            if existing.deletion_requested {
                return Err(Error::conflict(format!("{} {} is being deleted", kind, key)));
            }
            if existing.spec != spec {
                existing.spec = spec;
                existing.generation += 1;
                existing.resource_version += 1;
            }
            return Ok(existing.clone());
        }

        let obj = ManagedObject {
            key: key.clone(),
            kind,
            spec,
            status: ObjectStatus::default(),
            generation: 1,
            resource_version: 1,
            deletion_requested: false,
            finalizers: Default::default(),
        };
        self.objects.insert(slot, obj.clone());
        Ok(obj)
    }

    pub fn update_status(
        &mut self,
        kind: ResourceKind,
        key: &ObjectKey,
        expected_version: u64,
        status: &ObjectStatus,
    ) -> Result<u64> {
        let obj = self.checked(kind, key, expected_version)?;
        obj.status = status.clone();
        obj.resource_version += 1;
        Ok(obj.resource_version)
    }

    pub fn set_finalizer(
        &mut self,
        kind: ResourceKind,
        key: &ObjectKey,
        expected_version: u64,
        present: bool,
        status: Option<&ObjectStatus>,
    ) -> Result<u64> {
        let obj = self.checked(kind, key, expected_version)?;
        if present {
            obj.finalizers.insert(REMOTE_CLEANUP_FINALIZER.to_string());
        } else {
            obj.finalizers.remove(REMOTE_CLEANUP_FINALIZER);
        }
        if let Some(status) = status {
            obj.status = status.clone();
        }
        obj.resource_version += 1;
        let version = obj.resource_version;

        if obj.deletion_requested && obj.finalizers.is_empty() {
            self.objects.remove(&(kind, key.clone()));
            tracing::debug!(%kind, %key, "Object removed after finalization");
        }
        Ok(version)
    }

    /// Returns whether the table changed
    pub fn request_deletion(&mut self, kind: ResourceKind, key: &ObjectKey) -> bool {
        let slot = (kind, key.clone());
        let Some(obj) = self.objects.get_mut(&slot) else {
            return false;
        };
        if obj.finalizers.is_empty() {
            self.objects.remove(&slot);
            return true;
        }
        if obj.deletion_requested {
            return false;
        }
        obj.deletion_requested = true;
        obj.resource_version += 1;
        true
    }

    fn checked(
        &mut self,
        kind: ResourceKind,
        key: &ObjectKey,
        expected_version: u64,
    ) -> Result<&mut ManagedObject> {
        let obj = self
            .objects
            .get_mut(&(kind, key.clone()))
            .ok_or_else(|| Error::not_found(format!("{} {}", kind, key)))?;
        if obj.resource_version != expected_version {
            return Err(Error::VersionConflict {
                key: key.to_string(),
                expected: expected_version,
                actual: obj.resource_version,
            });
        }
        Ok(obj)
    }
}
