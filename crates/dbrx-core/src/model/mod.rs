//! Managed object data model
//!
//! A [`ManagedObject`] is the declared desired-state record for one remote
//! resource. Its `spec` is owned by whoever declares it; its `status` is
//! written only by the reconciler for the object's kind.

pub mod condition;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::adapters::ResourceSpec;

pub use condition::{Condition, ConditionStatus, CONDITION_READY, CONDITION_SYNCED};

/// Finalizer marker guarding remote cleanup
pub const REMOTE_CLEANUP_FINALIZER: &str = "dbrx.io/remote-cleanup";

/// The closed set of remote resource kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Secret scope with secrets and ACLs
    SecretScope,
    /// Job definition
    JobDefinition,
    /// One run of a job, or a one-off submitted run
    JobRun,
    /// Compute cluster with attached libraries
    Cluster,
    /// File on the distributed filesystem
    FilesystemBlock,
    /// Notebook or file in the workspace tree
    WorkspaceItem,
}

impl ResourceKind {
    /// All kinds, in declaration order
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::SecretScope,
        ResourceKind::JobDefinition,
        ResourceKind::JobRun,
        ResourceKind::Cluster,
        ResourceKind::FilesystemBlock,
        ResourceKind::WorkspaceItem,
    ];

    /// Stable name used in logs, events and store keys
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::SecretScope => "secret_scope",
            ResourceKind::JobDefinition => "job_definition",
            ResourceKind::JobRun => "job_run",
            ResourceKind::Cluster => "cluster",
            ResourceKind::FilesystemBlock => "filesystem_block",
            ResourceKind::WorkspaceItem => "workspace_item",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespace-scoped object identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Namespace
    pub namespace: String,
    /// Name within the namespace
    pub name: String,
}

impl ObjectKey {
    /// Create a new object key
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of another object in the same namespace
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        Self::new(self.namespace.clone(), name)
    }

    /// Idempotency key sent with every remote create for this object
    pub fn idempotency_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Opaque identifier of a remote resource instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteHandle(String);

impl RemoteHandle {
    /// Wrap a remote identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Last observed outcome, owned by the reconciler
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectStatus {
    /// Handle of the live remote resource, absent until the first create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<RemoteHandle>,

    /// Generation of the spec this status was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<u64>,

    /// Conditions, one per type
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// When remote state was last confirmed to match the spec
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<DateTime<Utc>>,

    /// Retryable failures since the last successful pass
    #[serde(default)]
    pub consecutive_failures: u32,

    /// Earlier remote instances this object has replaced or lost
    #[serde(default)]
    pub incarnation: u32,

    /// Digests of write-only content last applied, keyed by content slot
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fingerprints: BTreeMap<String, String>,

    /// Last normalized remote state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<serde_json::Value>,
}

impl ObjectStatus {
    /// Look up a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Whether the named condition is present and true
    pub fn is_true(&self, type_: &str) -> bool {
        self.condition(type_)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Insert or replace a condition by type
    ///
    /// Returns `true` when the stored set changed. A condition whose status,
    /// reason and message are unchanged keeps its original timestamp.
    pub fn upsert_condition(&mut self, condition: Condition) -> bool {
        condition::upsert(&mut self.conditions, condition)
    }

    /// Forget the remote resource
    ///
    /// The next create starts a new incarnation.
    pub fn clear_handle(&mut self) {
        if self.handle.is_some() {
            self.incarnation += 1;
        }
        self.handle = None;
        self.observed = None;
        self.last_synced = None;
        self.fingerprints.clear();
    }
}

/// Declared desired-state record for one remote resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedObject {
    /// Identifier
    pub key: ObjectKey,

    /// Resource kind
    pub kind: ResourceKind,

    /// Desired configuration
    pub spec: ResourceSpec,

    /// Last observed outcome
    #[serde(default)]
    pub status: ObjectStatus,

    /// Incremented on every spec change
    pub generation: u64,

    /// Incremented on every stored write, used for optimistic concurrency
    pub resource_version: u64,

    /// Deletion has been requested
    #[serde(default)]
    pub deletion_requested: bool,

    /// Finalizer markers blocking permanent removal
    #[serde(default)]
    pub finalizers: BTreeSet<String>,
}

impl ManagedObject {
    /// Whether the remote-cleanup finalizer is present
    pub fn has_finalizer(&self) -> bool {
        self.finalizers.contains(REMOTE_CLEANUP_FINALIZER)
    }
}
