//! Test doubles and common utilities for reconciler contract tests
//!
//! `MockRemoteClient` keeps remote resources in memory and counts every
//! call, so tests can assert how many remote mutations a pass issued.

#![allow(dead_code)]

use base64::Engine as _;
use dbrx_core::adapters::{ClusterSpec, FilesystemBlockSpec, ResourceSpec};
use dbrx_core::error::{Error, FailureKind, Result};
use dbrx_core::traits::{ChildKind, RemoteChild, RemoteClient, RemoteObject};
use dbrx_core::{
    ManagedObject, MemoryObjectStore, ObjectKey, ObjectStore, ReconcileConfig, ReconcileEvent,
    ReconcileResult, Reconciler, RemoteHandle, ResourceKind,
};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Remote operations that can be counted or scripted to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Get,
    Update,
    Delete,
    Find,
    ListChildren,
    PutChild,
    DeleteChild,
}

#[derive(Debug, Default)]
struct Counters {
    calls: Mutex<HashMap<Op, usize>>,
    next_id: AtomicUsize,
}

#[derive(Debug, Clone)]
struct StoredResource {
    idempotency_key: String,
    state: Value,
}

#[derive(Debug, Default)]
struct RemoteState {
    resources: BTreeMap<(ResourceKind, String), StoredResource>,
    children: BTreeMap<(String, ChildKind), BTreeMap<String, Value>>,
    failures: VecDeque<(Op, FailureKind)>,
    /// Incarnation passed to each successful create, by kind
    incarnations: Vec<(ResourceKind, u32)>,
    /// Ordered log of mutations, as "op kind handle"
    log: Vec<String>,
}

/// In-memory remote service
pub struct MockRemoteClient {
    counters: Arc<Counters>,
    state: Arc<Mutex<RemoteState>>,
    latency: Duration,
}

impl MockRemoteClient {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            state: Arc::new(Mutex::new(RemoteState::default())),
            latency: Duration::ZERO,
        }
    }

    /// A client that sleeps before every call
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::new()
        }
    }

    /// Create a client that shares counters and remote state with `other`
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            counters: Arc::clone(&other.counters),
            state: Arc::clone(&other.state),
            latency: other.latency,
        }
    }

    /// Number of calls made for one operation
    pub fn calls(&self, op: Op) -> usize {
        self.counters.calls.lock().unwrap().get(&op).copied().unwrap_or(0)
    }

    /// Number of create, update and delete calls, children included
    pub fn mutations(&self) -> usize {
        [Op::Create, Op::Update, Op::Delete, Op::PutChild, Op::DeleteChild]
            .into_iter()
            .map(|op| self.calls(op))
            .sum()
    }

    /// Total calls of any kind
    pub fn total_calls(&self) -> usize {
        self.counters.calls.lock().unwrap().values().sum()
    }

    /// Fail the next call of `op` with an error of `kind`
    pub fn fail_next(&self, op: Op, kind: FailureKind) {
        self.state.lock().unwrap().failures.push_back((op, kind));
    }

    /// Number of live resources of a kind
    pub fn count(&self, kind: ResourceKind) -> usize {
        self.state
            .lock()
            .unwrap()
            .resources
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    /// Current remote state of a resource
    pub fn state_of(&self, kind: ResourceKind, handle: &RemoteHandle) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .resources
            .get(&(kind, handle.to_string()))
            .map(|r| r.state.clone())
    }

    /// Set a read-only field, such as a cluster `state`
    pub fn set_field(&self, kind: ResourceKind, handle: &RemoteHandle, field: &str, value: Value) {
        let mut state = self.state.lock().unwrap();
        if let Some(resource) = state.resources.get_mut(&(kind, handle.to_string())) {
            if let Some(obj) = resource.state.as_object_mut() {
                obj.insert(field.to_string(), value);
            }
        }
    }

    /// Delete a resource out-of-band
    pub fn vanish(&self, kind: ResourceKind, handle: &RemoteHandle) {
        let mut state = self.state.lock().unwrap();
        state.resources.remove(&(kind, handle.to_string()));
        state.children.retain(|(parent, _), _| parent != handle.as_str());
    }

    /// Insert a resource created outside the reconciler
    pub fn seed(&self, kind: ResourceKind, handle: &str, idempotency_key: &str, state: Value) {
        self.state.lock().unwrap().resources.insert(
            (kind, handle.to_string()),
            StoredResource {
                idempotency_key: idempotency_key.to_string(),
                state,
            },
        );
    }

    /// Insert a child created outside the reconciler
    pub fn seed_child(&self, parent: &RemoteHandle, child: ChildKind, key: &str, payload: Value) {
        self.state
            .lock()
            .unwrap()
            .children
            .entry((parent.to_string(), child))
            .or_default()
            .insert(key.to_string(), payload);
    }

    /// Keys of the children under a parent
    pub fn child_keys(&self, parent: &RemoteHandle, child: ChildKind) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .children
            .get(&(parent.to_string(), child))
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Incarnations passed to successful creates of a kind, in call order
    pub fn incarnations(&self, kind: ResourceKind) -> Vec<u32> {
        self.state
            .lock()
            .unwrap()
            .incarnations
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, n)| *n)
            .collect()
    }

    /// Mutation log in call order
    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    async fn enter(&self, op: Op) -> Result<()> {
        *self.counters.calls.lock().unwrap().entry(op).or_insert(0) += 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let mut state = self.state.lock().unwrap();
        if let Some(pos) = state.failures.iter().position(|(o, _)| *o == op) {
            let (_, kind) = state.failures.remove(pos).unwrap();
            return Err(error_for(kind));
        }
        Ok(())
    }
}

impl Default for MockRemoteClient {
    fn default() -> Self {
        Self::new()
    }
}

fn error_for(kind: FailureKind) -> Error {
    match kind {
        FailureKind::NotFound => Error::not_found("scripted"),
        FailureKind::Conflict => Error::conflict("scripted"),
        FailureKind::Throttled => Error::throttled("scripted 429"),
        FailureKind::TransientNetwork => Error::transient("scripted 503"),
        FailureKind::InvalidSpec => Error::invalid_spec("scripted 400"),
        FailureKind::PermanentAuth => Error::auth("scripted 403"),
        FailureKind::DependencyNotReady => Error::dependency("scripted"),
        FailureKind::Store => Error::state_store("scripted"),
        FailureKind::VersionConflict | FailureKind::Internal => Error::Other("scripted".into()),
    }
}

fn natural_handle(payload: &Value) -> Option<String> {
    ["scope", "path"]
        .into_iter()
        .find_map(|field| payload.get(field).and_then(Value::as_str))
        .map(str::to_string)
}

fn child_fingerprint(child: ChildKind, key: &str, payload: &Value) -> Option<String> {
    match child {
        ChildKind::Secret => None,
        ChildKind::SecretAcl => payload
            .get("permission")
            .and_then(Value::as_str)
            .map(str::to_string),
        ChildKind::ClusterLibrary => Some(key.to_string()),
    }
}

/// Shape state the way the remote reports it on read
fn stored_form(kind: ResourceKind, state: &mut Value) {
    let Some(obj) = state.as_object_mut() else {
        return;
    };
    obj.remove("overwrite");
    if kind == ResourceKind::FilesystemBlock {
        if let Some(Value::String(contents)) = obj.remove("contents") {
            let size = base64::engine::general_purpose::STANDARD
                .decode(contents)
                .map(|bytes| bytes.len())
                .unwrap_or(0);
            obj.insert("file_size".to_string(), json!(size));
        }
    }
}

fn merge(state: &mut Value, payload: &Value) {
    let (Some(target), Some(changes)) = (state.as_object_mut(), payload.as_object()) else {
        return;
    };
    if let Some(settings) = changes.get("new_settings").and_then(Value::as_object) {
        for (field, value) in settings {
            target.insert(field.clone(), value.clone());
        }
        if let Some(removed) = changes.get("fields_to_remove").and_then(Value::as_array) {
            for field in removed.iter().filter_map(Value::as_str) {
                target.remove(field);
            }
        }
        return;
    }
    for (field, value) in changes {
        target.insert(field.clone(), value.clone());
    }
}

#[async_trait::async_trait]
impl RemoteClient for MockRemoteClient {
    async fn create(
        &self,
        kind: ResourceKind,
        idempotency_key: &str,
        incarnation: u32,
        payload: &Value,
    ) -> Result<RemoteHandle> {
        self.enter(Op::Create).await?;
        let mut state = self.state.lock().unwrap();

        let natural = natural_handle(payload);
        let collision = state.resources.iter().any(|((k, handle), resource)| {
            *k == kind
                && match &natural {
                    Some(natural) => handle == natural,
                    None => resource.idempotency_key == idempotency_key,
                }
        });
        if collision {
            return Err(Error::already_exists(format!("{} {}", kind, idempotency_key)));
        }

        let handle = natural.unwrap_or_else(|| {
            let n = self.counters.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            format!("{}-{}", kind, n)
        });
        let mut stored = payload.clone();
        stored_form(kind, &mut stored);
        state.resources.insert(
            (kind, handle.clone()),
            StoredResource {
                idempotency_key: idempotency_key.to_string(),
                state: stored,
            },
        );
        state.incarnations.push((kind, incarnation));
        state.log.push(format!("create {} {}", kind, handle));
        Ok(RemoteHandle::new(handle))
    }

    async fn get(&self, kind: ResourceKind, handle: &RemoteHandle) -> Result<Value> {
        self.enter(Op::Get).await?;
        self.state
            .lock()
            .unwrap()
            .resources
            .get(&(kind, handle.to_string()))
            .map(|r| r.state.clone())
            .ok_or_else(|| Error::not_found(format!("{} {}", kind, handle)))
    }

    async fn update(&self, kind: ResourceKind, handle: &RemoteHandle, payload: &Value) -> Result<()> {
        self.enter(Op::Update).await?;
        let mut state = self.state.lock().unwrap();
        let resource = state
            .resources
            .get_mut(&(kind, handle.to_string()))
            .ok_or_else(|| Error::not_found(format!("{} {}", kind, handle)))?;
        merge(&mut resource.state, payload);
        stored_form(kind, &mut resource.state);
        state.log.push(format!("update {} {}", kind, handle));
        Ok(())
    }

    async fn delete(&self, kind: ResourceKind, handle: &RemoteHandle) -> Result<()> {
        self.enter(Op::Delete).await?;
        let mut state = self.state.lock().unwrap();
        if state.resources.remove(&(kind, handle.to_string())).is_none() {
            return Err(Error::not_found(format!("{} {}", kind, handle)));
        }
        state.children.retain(|(parent, _), _| parent != handle.as_str());
        state.log.push(format!("delete {} {}", kind, handle));
        Ok(())
    }

    async fn find(&self, kind: ResourceKind, idempotency_key: &str) -> Result<Option<RemoteObject>> {
        self.enter(Op::Find).await?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .resources
            .iter()
            .find(|((k, _), r)| *k == kind && r.idempotency_key == idempotency_key)
            .map(|((_, handle), r)| RemoteObject {
                handle: RemoteHandle::new(handle.clone()),
                state: r.state.clone(),
            }))
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<RemoteObject>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .resources
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|((_, handle), r)| RemoteObject {
                handle: RemoteHandle::new(handle.clone()),
                state: r.state.clone(),
            })
            .collect())
    }

    async fn list_children(&self, parent: &RemoteHandle, child: ChildKind) -> Result<Vec<RemoteChild>> {
        self.enter(Op::ListChildren).await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .children
            .get(&(parent.to_string(), child))
            .map(|children| {
                children
                    .iter()
                    .map(|(key, payload)| RemoteChild {
                        key: key.clone(),
                        fingerprint: child_fingerprint(child, key, payload),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn put_child(
        &self,
        parent: &RemoteHandle,
        child: ChildKind,
        key: &str,
        payload: &Value,
    ) -> Result<()> {
        self.enter(Op::PutChild).await?;
        let mut state = self.state.lock().unwrap();
        state
            .children
            .entry((parent.to_string(), child))
            .or_default()
            .insert(key.to_string(), payload.clone());
        state.log.push(format!("put_child {} {}", child.as_str(), key));
        Ok(())
    }

    async fn delete_child(&self, parent: &RemoteHandle, child: ChildKind, key: &str) -> Result<()> {
        self.enter(Op::DeleteChild).await?;
        let mut state = self.state.lock().unwrap();
        let removed = state
            .children
            .get_mut(&(parent.to_string(), child))
            .and_then(|c| c.remove(key));
        if removed.is_none() {
            return Err(Error::not_found(format!("{} {}", child.as_str(), key)));
        }
        state.log.push(format!("delete_child {} {}", child.as_str(), key));
        Ok(())
    }

    fn client_name(&self) -> &'static str {
        "mock"
    }
}

/// Initialize test logging once; honours RUST_LOG
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Settings without jitter, so delays are exact
pub fn test_config() -> ReconcileConfig {
    ReconcileConfig {
        base_backoff_ms: 100,
        max_backoff_secs: 2,
        jitter: false,
        remote_timeout_secs: 5,
        resync_interval_secs: 300,
        poll_interval_secs: 10,
        max_conflict_retries: 5,
        event_channel_capacity: 1000,
        workers: 2,
    }
}

/// A reconciler wired to a shared mock and store
pub struct Harness {
    pub remote: MockRemoteClient,
    pub store: MemoryObjectStore,
    pub reconciler: Reconciler,
    pub events: mpsc::Receiver<ReconcileEvent>,
}

impl Harness {
    pub fn new(kind: ResourceKind) -> Self {
        Self::with_config(kind, test_config())
    }

    pub fn with_config(kind: ResourceKind, config: ReconcileConfig) -> Self {
        Self::with_remote(kind, MockRemoteClient::new(), MemoryObjectStore::new(), config)
    }

    /// A harness for another kind, sharing remote and store with this one
    pub fn sibling(&self, kind: ResourceKind) -> Self {
        Self::with_remote(
            kind,
            MockRemoteClient::sharing_counters_with(&self.remote),
            self.store.clone(),
            self.reconciler.config().clone(),
        )
    }

    pub fn with_remote(
        kind: ResourceKind,
        remote: MockRemoteClient,
        store: MemoryObjectStore,
        config: ReconcileConfig,
    ) -> Self {
        init_tracing();
        let (reconciler, events) = Reconciler::new(
            kind,
            Arc::new(MockRemoteClient::sharing_counters_with(&remote)),
            Arc::new(store.clone()),
            config,
        );
        Self {
            remote,
            store,
            reconciler,
            events,
        }
    }

    pub async fn apply(&self, key: &ObjectKey, spec: ResourceSpec) -> ManagedObject {
        self.store
            .apply(self.reconciler.kind(), key, spec)
            .await
            .expect("apply succeeds")
    }

    pub async fn load(&self, key: &ObjectKey) -> ManagedObject {
        self.store
            .load(self.reconciler.kind(), key)
            .await
            .expect("load succeeds")
            .expect("object exists")
    }

    pub async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult {
        self.reconciler.reconcile(key).await
    }

    /// Run passes until one converges or stops requeueing immediately
    pub async fn settle(&self, key: &ObjectKey) -> ReconcileResult {
        for _ in 0..10 {
            let result = self.reconciler.reconcile(key).await;
            if result.requeue_after() != Some(Duration::ZERO) {
                return result;
            }
        }
        panic!("{} did not settle within 10 passes", key);
    }

    pub fn drain_events(&mut self) -> Vec<ReconcileEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn cluster_spec(workers: u32) -> ResourceSpec {
    ResourceSpec::Cluster(ClusterSpec::fixed("14.3.x-scala2.12", "i3.xlarge", workers))
}

pub fn file_spec(path: &str, contents: &[u8]) -> ResourceSpec {
    ResourceSpec::FilesystemBlock(FilesystemBlockSpec::new(path, contents))
}

/// Remote state of a cluster as another client would have written it
pub fn foreign_cluster_state(name: &str, key: &ObjectKey, workers: u32) -> Value {
    let mut tags = Map::new();
    tags.insert("dbrx-key".to_string(), json!(key.idempotency_key()));
    json!({
        "cluster_name": name,
        "spark_version": "14.3.x-scala2.12",
        "node_type_id": "i3.xlarge",
        "num_workers": workers,
        "custom_tags": Value::Object(tags),
    })
}
