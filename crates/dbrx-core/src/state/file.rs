// # File Object Store
//
// File-based implementation of ObjectStore with crash recovery.
//
// ## Purpose
//
// Persists objects and statuses across restarts, so recorded remote
// handles survive and no resource is re-created after a crash.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good state
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "objects": [
//     {
//       "key": {"namespace": "team-a", "name": "etl"},
//       "kind": "cluster",
//       "spec": {"kind": "cluster", "spec": {"spark_version": "14.3.x-scala2.12", "...": "..."}},
//       "status": {"handle": "0412-abc", "conditions": []},
//       "generation": 1,
//       "resource_version": 4,
//       "finalizers": ["dbrx.io/remote-cleanup"]
//     }
//   ]
// }
// ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use super::ObjectTable;
use crate::Error;
use crate::adapters::ResourceSpec;
use crate::config::StoreConfig;
use crate::model::{ManagedObject, ObjectKey, ObjectStatus, ResourceKind};
use crate::traits::{ObjectStore, ObjectStoreFactory};

/// Store file format version
const STORE_FILE_VERSION: &str = "1.0";

/// File-based object store with crash recovery
///
/// Every write is persisted before it becomes visible: the mutation is
/// applied to a copy of the table, the copy is written atomically, and only
/// then swapped in. A failed disk write leaves the store unchanged.
///
/// # Example
///
/// ```rust,no_run
/// use dbrx_core::state::FileObjectStore;
/// use dbrx_core::{ObjectKey, ObjectStore, ResourceKind};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileObjectStore::new("/var/lib/dbrx/objects.json").await?;
///     let keys = store.list(ResourceKind::Cluster).await?;
///     println!("{} clusters", keys.len());
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileObjectStore {
    path: PathBuf,
    table: Arc<RwLock<ObjectTable>>,
}

/// Serializable store file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoreFileFormat {
    version: String,
    objects: Vec<ManagedObject>,
}

impl FileObjectStore {
    /// Create or load a file object store
    ///
    /// This will:
    /// 1. Try to load the existing store file
    /// 2. If corruption detected, try to load from backup
    /// 3. If both fail, start empty
    /// 4. Create parent directories if needed
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create store directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let objects = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            table: Arc::new(RwLock::new(ObjectTable::from_objects(objects))),
        })
    }

    /// Load objects from file with automatic recovery
    ///
    /// Recovery strategy:
    /// 1. Try to load main store file
    /// 2. If JSON parse error, try loading backup
    /// 3. If backup also fails, start empty
    async fn load_with_recovery(path: &Path) -> Result<Vec<ManagedObject>, Error> {
        match Self::load_file(path).await {
            Ok(objects) => {
                tracing::debug!("Loaded store from file: {} objects", objects.len());
                Ok(objects)
            }
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Store file appears corrupted: {}. Attempting recovery from backup.",
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with an empty store.");
                    return Ok(Vec::new());
                }

                match Self::load_file(&backup_path).await {
                    Ok(objects) => {
                        tracing::info!("Recovered store from backup: {} objects", objects.len());
                        if let Err(restore_err) = Self::restore_from_backup(path, &backup_path).await {
                            tracing::error!(
                                "Failed to restore store file from backup: {}",
                                restore_err
                            );
                        }
                        Ok(objects)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also unreadable: {}. Starting with an empty store.",
                            backup_err
                        );
                        Ok(Vec::new())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Load objects from file
    async fn load_file(path: &Path) -> Result<Vec<ManagedObject>, Error> {
        if !path.exists() {
            tracing::debug!("Store file does not exist: {}", path.display());
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::state_store(format!("Failed to read store file {}: {}", path.display(), e))
        })?;

        let store_file: StoreFileFormat = serde_json::from_str(&content)?;

        if store_file.version != STORE_FILE_VERSION {
            tracing::warn!(
                "Store file version mismatch: expected {}, got {}. Attempting to load anyway.",
                STORE_FILE_VERSION,
                store_file.version
            );
        }

        Ok(store_file.objects)
    }

    /// Write a table snapshot to file atomically
    async fn write_file(&self, table: &ObjectTable) -> Result<(), Error> {
        let store_file = StoreFileFormat {
            version: STORE_FILE_VERSION.to_string(),
            objects: table.objects(),
        };

        let json = serde_json::to_string_pretty(&store_file)
            .map_err(|e| Error::state_store(format!("Failed to serialize store: {}", e)))?;

        // Write to temporary file first
        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.sync_all().await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        // Keep the last good file as backup
        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Store written to file: {}", self.path.display());
        Ok(())
    }

    /// Apply a mutation durably
    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut ObjectTable) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut guard = self.table.write().await;
        let mut next = guard.clone();
        let out = change(&mut next)?;
        self.write_file(&next).await?;
        *guard = next;
        Ok(out)
    }

    /// Restore store file from backup
    async fn restore_from_backup(path: &Path, backup_path: &Path) -> Result<(), Error> {
        fs::copy(backup_path, path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to restore from backup {} to {}: {}",
                backup_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::info!("Restored store file from backup");
        Ok(())
    }

    /// Get path to temporary file for atomic writes
    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    /// Get path to backup file
    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn load(&self, kind: ResourceKind, key: &ObjectKey) -> Result<Option<ManagedObject>, Error> {
        Ok(self.table.read().await.load(kind, key))
    }

    async fn update_status(
        &self,
        kind: ResourceKind,
        key: &ObjectKey,
        expected_version: u64,
        status: &ObjectStatus,
    ) -> Result<u64, Error> {
        self.mutate(|table| table.update_status(kind, key, expected_version, status))
            .await
    }

    async fn set_finalizer(
        &self,
        kind: ResourceKind,
        key: &ObjectKey,
        expected_version: u64,
        present: bool,
        status: Option<&ObjectStatus>,
    ) -> Result<u64, Error> {
        self.mutate(|table| table.set_finalizer(kind, key, expected_version, present, status))
            .await
    }

    async fn apply(
        &self,
        kind: ResourceKind,
        key: &ObjectKey,
        spec: ResourceSpec,
    ) -> Result<ManagedObject, Error> {
        self.mutate(|table| table.apply(kind, key, spec)).await
    }

    async fn request_deletion(&self, kind: ResourceKind, key: &ObjectKey) -> Result<(), Error> {
        {
            let guard = self.table.read().await;
            if guard.load(kind, key).is_none() {
                return Ok(());
            }
        }
        self.mutate(|table| {
            table.request_deletion(kind, key);
            Ok(())
        })
        .await
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<ObjectKey>, Error> {
        Ok(self.table.read().await.list(kind))
    }
}

/// Factory for [`FileObjectStore`]
#[derive(Debug, Default)]
pub struct FileObjectStoreFactory;

#[async_trait]
impl ObjectStoreFactory for FileObjectStoreFactory {
    async fn create(&self, config: &StoreConfig) -> Result<Box<dyn ObjectStore>, Error> {
        match config {
            StoreConfig::File { path } => Ok(Box::new(FileObjectStore::new(path).await?)),
            other => Err(Error::config(format!(
                "file store factory cannot build a '{}' store",
                other.type_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::FilesystemBlockSpec;
    use crate::model::RemoteHandle;
    use tempfile::tempdir;

    fn spec(contents: &[u8]) -> ResourceSpec {
        ResourceSpec::FilesystemBlock(FilesystemBlockSpec::new("/tmp/a.txt", contents))
    }

    #[tokio::test]
    async fn test_file_store_basic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("objects.json");
        let key = ObjectKey::new("ns", "a");
        let kind = ResourceKind::FilesystemBlock;

        let store = FileObjectStore::new(&path).await.unwrap();
        assert!(store.list(kind).await.unwrap().is_empty());

        let obj = store.apply(kind, &key, spec(b"1")).await.unwrap();
        let status = ObjectStatus {
            handle: Some(RemoteHandle::new("/tmp/a.txt")),
            ..ObjectStatus::default()
        };
        store
            .update_status(kind, &key, obj.resource_version, &status)
            .await
            .unwrap();
        assert!(path.exists());

        // Load new instance and verify persistence
        let store2 = FileObjectStore::new(&path).await.unwrap();
        let loaded = store2.load(kind, &key).await.unwrap().unwrap();
        assert_eq!(loaded.status.handle, Some(RemoteHandle::new("/tmp/a.txt")));
        assert_eq!(loaded.resource_version, 2);
    }

    #[tokio::test]
    async fn test_file_store_corruption_recovery() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("objects.json");
        let key = ObjectKey::new("ns", "a");
        let kind = ResourceKind::FilesystemBlock;

        let store = FileObjectStore::new(&path).await.unwrap();
        store.apply(kind, &key, spec(b"1")).await.unwrap();
        // Second write leaves the first in the backup
        store.apply(kind, &key, spec(b"2")).await.unwrap();

        let backup_path = FileObjectStore::backup_path(&path);
        assert!(backup_path.exists(), "Backup file should exist after write");

        fs::write(&path, b"corrupted json data").await.unwrap();

        let store2 = FileObjectStore::new(&path).await.unwrap();
        let recovered = store2.load(kind, &key).await.unwrap().unwrap();
        assert_eq!(recovered.generation, 1, "Backup should contain the previous state");
    }

    #[tokio::test]
    async fn test_failed_version_check_does_not_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("objects.json");
        let key = ObjectKey::new("ns", "a");
        let kind = ResourceKind::FilesystemBlock;

        let store = FileObjectStore::new(&path).await.unwrap();
        store.apply(kind, &key, spec(b"1")).await.unwrap();
        let before = fs::read_to_string(&path).await.unwrap();

        let err = store
            .update_status(kind, &key, 99, &ObjectStatus::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VersionConflict { .. }));
        assert_eq!(fs::read_to_string(&path).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_finalized_object_removed_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("objects.json");
        let key = ObjectKey::new("ns", "a");
        let kind = ResourceKind::FilesystemBlock;

        let store = FileObjectStore::new(&path).await.unwrap();
        store.apply(kind, &key, spec(b"1")).await.unwrap();
        store.set_finalizer(kind, &key, 1, true, None).await.unwrap();
        store.request_deletion(kind, &key).await.unwrap();
        store.set_finalizer(kind, &key, 3, false, None).await.unwrap();

        let store2 = FileObjectStore::new(&path).await.unwrap();
        assert!(store2.load(kind, &key).await.unwrap().is_none());
    }
}
