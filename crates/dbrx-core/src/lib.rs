// # dbrx-core
//
// Core library for reconciling declared batch/compute resources against a
// remote service.
//
// ## Architecture Overview
//
// - **ObjectStore**: Versioned storage of desired state and observed status
// - **RemoteClient**: Single-shot calls against the remote service API
// - **Adapters**: Per-kind mapping between specs and remote payloads
// - **Reconciler**: One pass per object key, returning a requeue directive
// - **WorkerPool**: Deduplicating queue that drives passes concurrently
// - **Registry**: Plugin-based construction of clients and stores
//
// ## Design Principles
//
// 1. **Level-triggered**: Every pass re-derives its actions from stored and remote state
// 2. **Idempotent**: Repeating a pass never duplicates a remote resource
// 3. **Library-First**: Hosts embed the engine and feed it keys
// 4. **Plugin-Based**: Remote clients are registered, not hard-coded

pub mod adapters;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod model;
pub mod registry;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use adapters::ResourceSpec;
pub use config::{OperatorConfig, ReconcileConfig, RemoteConfig, StoreConfig};
pub use dispatch::WorkerPool;
pub use engine::{Backoff, EventType, ReconcileEvent, ReconcileResult, Reconciler};
pub use error::{Error, FailureKind, Result};
pub use model::{
    Condition, ConditionStatus, ManagedObject, ObjectKey, ObjectStatus, RemoteHandle,
    ResourceKind, CONDITION_READY, CONDITION_SYNCED, REMOTE_CLEANUP_FINALIZER,
};
pub use registry::Registry;
pub use state::{FileObjectStore, MemoryObjectStore};
pub use traits::{
    ChildKind, ObjectStore, ObjectStoreFactory, RemoteChild, RemoteClient, RemoteClientFactory,
    RemoteObject,
};
