// # Remote Client Trait
//
// Defines the interface to the remote batch/compute service.
//
// ## Implementations
//
// - REST: `dbrx-provider-rest` crate
// - Test doubles: `tests/common/mod.rs`
//
// ## Usage
//
// ```rust,ignore
// use dbrx_core::{RemoteClient, ResourceKind};
//
// async fn adopt(client: &dyn RemoteClient) -> dbrx_core::Result<()> {
//     if let Some(existing) = client.find(ResourceKind::Cluster, "team-a/etl").await? {
//         println!("cluster already exists: {}", existing.handle);
//     }
//     Ok(())
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{RemoteHandle, ResourceKind};

/// A remote resource as returned by `find`/`list`
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObject {
    /// Handle of the remote instance
    pub handle: RemoteHandle,
    /// Raw remote state, as `get` would return it
    pub state: Value,
}

/// Sub-resources owned by a parent remote resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildKind {
    /// Secret value inside a secret scope
    Secret,
    /// Access control entry on a secret scope
    SecretAcl,
    /// Library attached to a cluster
    ClusterLibrary,
}

impl ChildKind {
    /// Stable name used for fingerprint slots and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ChildKind::Secret => "secret",
            ChildKind::SecretAcl => "acl",
            ChildKind::ClusterLibrary => "library",
        }
    }
}

/// A child as listed remotely
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChild {
    /// Child key, unique per parent and child kind
    pub key: String,
    /// Remote-readable fingerprint of the child's content
    ///
    /// `None` when the remote API cannot read the content back (secret values).
    pub fingerprint: Option<String>,
}

/// Trait for remote client implementations
///
/// Implementations are isolated and single-shot: one API call (or the
/// minimal sequence the remote API requires) per method, no retries, no
/// caching between calls. Retry policy, backoff and convergence decisions
/// are owned by the [`Reconciler`](crate::Reconciler).
///
/// # Errors
///
/// Implementations map remote failures onto the engine taxonomy:
/// - [`Error::NotFound`](crate::Error::NotFound) for missing resources
/// - [`Error::AlreadyExists`](crate::Error::AlreadyExists) when a create collides
/// - [`Error::Conflict`](crate::Error::Conflict) for concurrent modification
/// - [`Error::Throttled`](crate::Error::Throttled) for rate limiting
/// - [`Error::TransientNetwork`](crate::Error::TransientNetwork) for timeouts and 5xx
/// - [`Error::InvalidSpec`](crate::Error::InvalidSpec) for rejected payloads
/// - [`Error::PermanentAuth`](crate::Error::PermanentAuth) for rejected credentials
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Create a remote resource from a payload
    ///
    /// `idempotency_key` identifies the declaring object. A second create
    /// with the same key must fail with `AlreadyExists` (or return the same
    /// handle) rather than produce a duplicate.
    ///
    /// `incarnation` counts the remote instances the object had before this
    /// one. Request tokens sent to the remote must differ per incarnation,
    /// since a re-create after replacement or drift is a new instance.
    async fn create(
        &self,
        kind: ResourceKind,
        idempotency_key: &str,
        incarnation: u32,
        payload: &Value,
    ) -> Result<RemoteHandle, crate::Error>;

    /// Read the current remote state
    async fn get(&self, kind: ResourceKind, handle: &RemoteHandle) -> Result<Value, crate::Error>;

    /// Apply an update payload to an existing resource
    async fn update(
        &self,
        kind: ResourceKind,
        handle: &RemoteHandle,
        payload: &Value,
    ) -> Result<(), crate::Error>;

    /// Delete a remote resource
    async fn delete(&self, kind: ResourceKind, handle: &RemoteHandle) -> Result<(), crate::Error>;

    /// Find the resource previously created with `idempotency_key`
    async fn find(
        &self,
        kind: ResourceKind,
        idempotency_key: &str,
    ) -> Result<Option<RemoteObject>, crate::Error>;

    /// List all remote resources of a kind
    async fn list(&self, kind: ResourceKind) -> Result<Vec<RemoteObject>, crate::Error>;

    /// List children of a parent resource
    async fn list_children(
        &self,
        parent: &RemoteHandle,
        child: ChildKind,
    ) -> Result<Vec<RemoteChild>, crate::Error>;

    /// Create or overwrite a child
    async fn put_child(
        &self,
        parent: &RemoteHandle,
        child: ChildKind,
        key: &str,
        payload: &Value,
    ) -> Result<(), crate::Error>;

    /// Remove a child
    async fn delete_child(
        &self,
        parent: &RemoteHandle,
        child: ChildKind,
        key: &str,
    ) -> Result<(), crate::Error>;

    /// Client name (for logging/debugging)
    fn client_name(&self) -> &'static str;
}

/// Helper trait for constructing remote clients from configuration
pub trait RemoteClientFactory: Send + Sync {
    /// Create a RemoteClient instance from configuration
    fn create(
        &self,
        config: &crate::config::RemoteConfig,
    ) -> Result<Box<dyn RemoteClient>, crate::Error>;
}
