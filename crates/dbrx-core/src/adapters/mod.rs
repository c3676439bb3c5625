//! Per-kind adapters
//!
//! Each resource kind supplies the same capability set: validating its spec,
//! mapping it to a remote create/update payload, normalizing remote read
//! results into a comparable form, and the delta rules that decide between
//! an in-place update and a replace (delete-then-create) cycle.
//!
//! The set of kinds is closed. [`ResourceSpec`] is the tagged union of all
//! kind specs and dispatches to the kind's adapter by variant.
//!
//! ## Remote vocabulary
//!
//! Remote clients return resources in the vocabulary of the create payload
//! (plus read-only state fields such as `state` or `life_cycle_state`), so
//! normalization is a projection onto the managed fields.

pub mod cluster;
pub mod filesystem_block;
pub mod job_definition;
pub mod job_run;
pub mod secret_scope;
pub mod workspace_item;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::model::{ObjectKey, ObjectStatus, RemoteHandle, ResourceKind};
use crate::traits::ChildKind;

pub use cluster::{Autoscale, ClusterSpec, Library};
pub use filesystem_block::FilesystemBlockSpec;
pub use job_definition::{JobDefinitionSpec, JobSchedule, JobTask};
pub use job_run::{JobRunSpec, RunSubmitSpec};
pub use secret_scope::{AclPermission, AclSpec, ScopeBackend, SecretScopeSpec, SecretSpec, SecretValue};
pub use workspace_item::{ExportFormat, Language, WorkspaceItemSpec};

/// Tag key carrying the idempotency key on remote resources that support tags
pub const IDEMPOTENCY_TAG: &str = "dbrx-key";

/// Fingerprint slot for single-content kinds
pub const CONTENT_SLOT: &str = "content";

/// Desired configuration of one managed object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "spec", rename_all = "snake_case")]
pub enum ResourceSpec {
    SecretScope(SecretScopeSpec),
    JobDefinition(JobDefinitionSpec),
    JobRun(JobRunSpec),
    Cluster(ClusterSpec),
    FilesystemBlock(FilesystemBlockSpec),
    WorkspaceItem(WorkspaceItemSpec),
}

/// Outcome of comparing spec against observed remote state
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    /// Remote matches the spec
    InSync,
    /// Apply `payload` with one update call
    Update {
        payload: Value,
        fields: Vec<String>,
    },
    /// Immutable fields changed: delete, then create on the next pass
    Replace { fields: Vec<String> },
}

/// Readiness derived from observed remote state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Usable
    Ready(String),
    /// Transitioning; poll again
    Progressing(String),
    /// Stable but not usable (terminated cluster, failed run)
    Unavailable(String),
}

/// A child the spec wants present under its parent
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredChild {
    pub child: ChildKind,
    pub key: String,
    pub payload: Value,
    pub fingerprint: String,
}

impl DesiredChild {
    /// Fingerprint slot recorded in status
    pub fn slot(&self) -> String {
        child_slot(self.child, &self.key)
    }
}

/// Fingerprint slot for a child
pub fn child_slot(child: ChildKind, key: &str) -> String {
    format!("{}:{}", child.as_str(), key)
}

/// Handles of resolved dependencies, keyed by kind and object name
#[derive(Debug, Clone, Default)]
pub struct Dependencies {
    handles: BTreeMap<(ResourceKind, String), RemoteHandle>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: ResourceKind, name: impl Into<String>, handle: RemoteHandle) {
        self.handles.insert((kind, name.into()), handle);
    }

    /// Handle of a resolved dependency
    ///
    /// # Errors
    ///
    /// `DependencyNotReady` when the dependency was never resolved.
    pub fn handle(&self, kind: ResourceKind, name: &str) -> Result<&RemoteHandle> {
        self.handles
            .get(&(kind, name.to_string()))
            .ok_or_else(|| Error::dependency(format!("{} {} has no remote handle", kind, name)))
    }
}

/// Inputs available while mapping a spec to a payload
#[derive(Debug, Clone, Copy)]
pub struct MappingContext<'a> {
    pub key: &'a ObjectKey,
    pub dependencies: &'a Dependencies,
}

/// The capability set every kind implements
pub(crate) trait Adapter {
    /// Reject specs that can never be applied
    fn validate(&self) -> Result<()>;

    /// Other managed objects whose handles the payload needs
    fn dependencies(&self) -> Vec<(ResourceKind, String)> {
        Vec::new()
    }

    /// Handle determined by the spec itself (names, paths), if any
    fn natural_handle(&self, _key: &ObjectKey) -> Option<RemoteHandle> {
        None
    }

    fn create_payload(&self, ctx: &MappingContext<'_>) -> Result<Value>;

    /// Project remote state onto the managed fields
    fn normalize(&self, remote: &Value) -> Value;

    fn delta(&self, ctx: &MappingContext<'_>, observed: &Value, status: &ObjectStatus)
    -> Result<Delta>;

    fn readiness(&self, _observed: &Value) -> Readiness {
        Readiness::Ready("Available".to_string())
    }

    /// Whether a fresh resource starts an execution that must be polled
    fn polls_after_create(&self) -> bool {
        false
    }

    fn child_kinds(&self) -> &'static [ChildKind] {
        &[]
    }

    fn children(&self) -> Result<Vec<DesiredChild>> {
        Ok(Vec::new())
    }

    /// Fingerprints of write-only content applied by create/update
    fn fingerprints(&self) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::new())
    }
}

impl ResourceSpec {
    /// Kind this spec declares
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::SecretScope(_) => ResourceKind::SecretScope,
            ResourceSpec::JobDefinition(_) => ResourceKind::JobDefinition,
            ResourceSpec::JobRun(_) => ResourceKind::JobRun,
            ResourceSpec::Cluster(_) => ResourceKind::Cluster,
            ResourceSpec::FilesystemBlock(_) => ResourceKind::FilesystemBlock,
            ResourceSpec::WorkspaceItem(_) => ResourceKind::WorkspaceItem,
        }
    }

    fn adapter(&self) -> &dyn Adapter {
        match self {
            ResourceSpec::SecretScope(spec) => spec,
            ResourceSpec::JobDefinition(spec) => spec,
            ResourceSpec::JobRun(spec) => spec,
            ResourceSpec::Cluster(spec) => spec,
            ResourceSpec::FilesystemBlock(spec) => spec,
            ResourceSpec::WorkspaceItem(spec) => spec,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.adapter().validate()
    }

    pub fn dependencies(&self) -> Vec<(ResourceKind, String)> {
        self.adapter().dependencies()
    }

    pub fn natural_handle(&self, key: &ObjectKey) -> Option<RemoteHandle> {
        self.adapter().natural_handle(key)
    }

    pub fn create_payload(&self, ctx: &MappingContext<'_>) -> Result<Value> {
        self.adapter().create_payload(ctx)
    }

    pub fn normalize(&self, remote: &Value) -> Value {
        self.adapter().normalize(remote)
    }

    pub fn delta(
        &self,
        ctx: &MappingContext<'_>,
        observed: &Value,
        status: &ObjectStatus,
    ) -> Result<Delta> {
        self.adapter().delta(ctx, observed, status)
    }

    pub fn readiness(&self, observed: &Value) -> Readiness {
        self.adapter().readiness(observed)
    }

    pub fn polls_after_create(&self) -> bool {
        self.adapter().polls_after_create()
    }

    pub fn child_kinds(&self) -> &'static [ChildKind] {
        self.adapter().child_kinds()
    }

    pub fn children(&self) -> Result<Vec<DesiredChild>> {
        self.adapter().children()
    }

    pub fn fingerprints(&self) -> Result<BTreeMap<String, String>> {
        self.adapter().fingerprints()
    }
}

/// Hex sha256 digest
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Decode base64 content, rejecting malformed input as an invalid spec
pub(crate) fn decode_base64(field: &str, data: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| Error::invalid_spec(format!("{} is not valid base64: {}", field, e)))
}

/// Reject paths that are not absolute
pub(crate) fn require_absolute(field: &str, path: &str) -> Result<()> {
    if path.starts_with('/') && !path.contains("//") {
        Ok(())
    } else {
        Err(Error::invalid_spec(format!(
            "{} must be an absolute path, got '{}'",
            field, path
        )))
    }
}

/// Keep only `fields` of a remote object
pub(crate) fn project(remote: &Value, fields: &[&str]) -> Value {
    let mut out = Map::new();
    if let Some(obj) = remote.as_object() {
        for field in fields {
            if let Some(value) = obj.get(*field) {
                if !value.is_null() {
                    out.insert((*field).to_string(), value.clone());
                }
            }
        }
    }
    Value::Object(out)
}

/// Insert `value` under `field` when present
pub(crate) fn put_opt<T: Serialize>(obj: &mut Map<String, Value>, field: &str, value: &Option<T>) -> Result<()> {
    if let Some(value) = value {
        obj.insert(field.to_string(), serde_json::to_value(value)?);
    }
    Ok(())
}

/// Encode a remote handle, as a JSON number where the remote id is numeric
pub(crate) fn handle_value(handle: &RemoteHandle) -> Value {
    handle
        .as_str()
        .parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(handle.as_str().to_string()))
}

/// Field-level difference between desired and observed objects
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct FieldDiff {
    /// Desired fields whose observed value differs or is missing
    pub changed: Map<String, Value>,
    /// Clearable fields present remotely but no longer desired
    pub removed: Vec<String>,
}

impl FieldDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }

    pub fn fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self.changed.keys().cloned().collect();
        fields.extend(self.removed.iter().cloned());
        fields
    }

    pub fn touches_only(&self, allowed: &[&str]) -> bool {
        self.fields().iter().all(|f| allowed.contains(&f.as_str()))
    }
}

/// Compare the fields of `desired` against `observed`
///
/// Fields absent from `desired` are ignored unless listed in `clearable`,
/// since remote services fill in defaults for unset optional fields.
pub(crate) fn diff_fields(desired: &Value, observed: &Value, clearable: &[&str]) -> FieldDiff {
    let empty = Map::new();
    let desired = desired.as_object().unwrap_or(&empty);
    let observed = observed.as_object().unwrap_or(&empty);

    let changed = desired
        .iter()
        .filter(|(field, value)| observed.get(*field) != Some(*value))
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect();

    let removed = clearable
        .iter()
        .filter(|field| !desired.contains_key(**field) && observed.contains_key(**field))
        .map(|field| (*field).to_string())
        .collect();

    FieldDiff { changed, removed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_diff_fields_ignores_server_defaults() {
        let desired = json!({"num_workers": 2, "node_type_id": "m5.large"});
        let observed = json!({"num_workers": 2, "node_type_id": "m5.large", "autotermination_minutes": 120});

        assert!(diff_fields(&desired, &observed, &[]).is_empty());
    }

    #[test]
    fn test_diff_fields_reports_changes_and_removals() {
        let desired = json!({"num_workers": 4});
        let observed = json!({"num_workers": 2, "schedule": {"quartz_cron_expression": "0 0 * * * ?"}});

        let diff = diff_fields(&desired, &observed, &["schedule"]);
        assert_eq!(diff.changed.get("num_workers"), Some(&json!(4)));
        assert_eq!(diff.removed, vec!["schedule".to_string()]);
        assert!(diff.touches_only(&["num_workers", "schedule"]));
        assert!(!diff.touches_only(&["num_workers"]));
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let a = fingerprint(b"hello");
        assert_eq!(a, fingerprint(b"hello"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, fingerprint(b"hello!"));
    }

    #[test]
    fn test_require_absolute() {
        assert!(require_absolute("path", "/Shared/etl").is_ok());
        assert!(require_absolute("path", "Shared/etl").is_err());
        assert!(require_absolute("path", "/Shared//etl").is_err());
    }

    #[test]
    fn test_handle_value_numeric() {
        assert_eq!(handle_value(&RemoteHandle::new("42")), json!(42));
        assert_eq!(handle_value(&RemoteHandle::new("0412-abc")), json!("0412-abc"));
    }

    #[test]
    fn test_spec_serde_tagging() {
        let spec: ResourceSpec = serde_json::from_value(json!({
            "kind": "filesystem_block",
            "spec": {"path": "/tmp/a.txt", "data": "aGk="}
        }))
        .unwrap();
        assert_eq!(spec.kind(), ResourceKind::FilesystemBlock);
    }
}
