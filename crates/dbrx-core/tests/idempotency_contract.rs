//! Contract Test: Idempotency & No Duplicate Creation
//!
//! Constraints verified:
//! - A converged object costs zero remote calls on the next pass
//! - A spec edit is applied with one update, never delete/create
//! - Concurrent passes for one key leave exactly one remote resource
//! - A create that collides with an earlier attempt adopts its resource
//!
//! If this test fails, repeated passes can duplicate remote resources.

mod common;

use common::*;
use dbrx_core::{ObjectKey, ReconcileResult, ResourceKind, CONDITION_READY, CONDITION_SYNCED};
use std::time::Duration;

#[tokio::test]
async fn resize_is_one_update_after_an_idle_pass() {
    let h = Harness::new(ResourceKind::Cluster);
    let key = ObjectKey::new("team-a", "etl");
    h.apply(&key, cluster_spec(2)).await;

    // First pass creates and records the handle, then polls the new cluster
    let poll = Duration::from_secs(test_config().poll_interval_secs);
    let result = h.reconcile(&key).await;
    assert_eq!(result, ReconcileResult::RequeueAfter(poll));
    assert_eq!(h.remote.calls(Op::Create), 1);

    let obj = h.load(&key).await;
    let handle = obj.status.handle.clone().expect("handle recorded");
    assert!(obj.status.is_true(CONDITION_SYNCED));
    assert!(obj.has_finalizer());

    assert_eq!(h.reconcile(&key).await, ReconcileResult::Converged);
    assert!(h.load(&key).await.status.is_true(CONDITION_READY));

    // Second pass with no spec change touches nothing remote
    let before = h.remote.total_calls();
    let result = h.reconcile(&key).await;
    assert!(
        matches!(result, ReconcileResult::RequeueAfter(d) if d > Duration::ZERO && d <= Duration::from_secs(300)),
        "expected a resync requeue, got {:?}",
        result
    );
    assert_eq!(h.remote.total_calls(), before, "idle pass made remote calls");

    // Resize: exactly one update, no delete or second create
    h.apply(&key, cluster_spec(4)).await;
    let result = h.reconcile(&key).await;
    assert_eq!(result, ReconcileResult::RequeueAfter(Duration::ZERO));
    assert_eq!(h.remote.calls(Op::Update), 1);
    assert_eq!(h.remote.calls(Op::Create), 1);
    assert_eq!(h.remote.calls(Op::Delete), 0);

    // Confirming pass observes the new size
    let result = h.reconcile(&key).await;
    assert_eq!(result, ReconcileResult::Converged);
    assert_eq!(h.remote.calls(Op::Update), 1);

    let state = h.remote.state_of(ResourceKind::Cluster, &handle).unwrap();
    assert_eq!(state["num_workers"], 4);
    assert_eq!(h.remote.count(ResourceKind::Cluster), 1);

    let obj = h.load(&key).await;
    assert_eq!(obj.status.observed_generation, Some(2));
    assert!(obj.status.is_true(CONDITION_SYNCED));
    assert!(obj.status.is_true(CONDITION_READY));
}

#[tokio::test]
async fn restarted_reconciler_does_not_recreate() {
    let h = Harness::new(ResourceKind::Cluster);
    let key = ObjectKey::new("team-a", "etl");
    h.apply(&key, cluster_spec(2)).await;
    h.reconcile(&key).await;

    // New reconciler instance over the same store and remote
    let restarted = h.sibling(ResourceKind::Cluster);
    restarted.reconcile(&key).await;
    restarted.reconcile(&key).await;

    assert_eq!(h.remote.calls(Op::Create), 1);
    assert_eq!(h.remote.count(ResourceKind::Cluster), 1);
}

#[tokio::test]
async fn collision_with_earlier_attempt_adopts_existing() {
    let h = Harness::new(ResourceKind::Cluster);
    let key = ObjectKey::new("team-a", "etl");

    // A previous attempt created the cluster but never recorded its handle
    h.remote.seed(
        ResourceKind::Cluster,
        "0412-seeded",
        &key.idempotency_key(),
        foreign_cluster_state("etl", &key, 2),
    );
    h.apply(&key, cluster_spec(2)).await;

    let result = h.reconcile(&key).await;
    assert_eq!(result, ReconcileResult::RequeueAfter(Duration::ZERO));
    assert_eq!(h.remote.calls(Op::Find), 1);

    let obj = h.load(&key).await;
    assert_eq!(obj.status.handle.as_ref().map(|h| h.as_str()), Some("0412-seeded"));
    assert_eq!(
        obj.status.condition(CONDITION_SYNCED).map(|c| c.reason.as_str()),
        Some("Adopted")
    );

    // The adopted cluster already matches, so the confirming pass is read-only
    let result = h.settle(&key).await;
    assert_eq!(result, ReconcileResult::Converged);
    assert_eq!(h.remote.calls(Op::Update), 0);
    assert_eq!(h.remote.count(ResourceKind::Cluster), 1);
}

#[tokio::test]
async fn concurrent_passes_create_exactly_one_resource() {
    let remote = MockRemoteClient::with_latency(Duration::from_millis(20));
    let store = dbrx_core::MemoryObjectStore::new();
    let a = Harness::with_remote(ResourceKind::Cluster, remote, store, test_config());
    let b = a.sibling(ResourceKind::Cluster);

    let key = ObjectKey::new("team-a", "etl");
    a.apply(&key, cluster_spec(2)).await;

    let (first, second) = tokio::join!(a.reconcile(&key), b.reconcile(&key));
    assert!(first.failure_kind().is_none(), "first pass failed: {:?}", first);
    assert!(second.failure_kind().is_none(), "second pass failed: {:?}", second);

    a.settle(&key).await;
    assert_eq!(a.remote.count(ResourceKind::Cluster), 1);

    let obj = a.load(&key).await;
    let handle = obj.status.handle.expect("handle recorded");
    assert!(a.remote.state_of(ResourceKind::Cluster, &handle).is_some());
}

#[tokio::test]
async fn natural_handle_collision_adopts_by_path() {
    let h = Harness::new(ResourceKind::FilesystemBlock);
    let key = ObjectKey::new("team-a", "settings");
    h.remote.seed(
        ResourceKind::FilesystemBlock,
        "/conf/app.json",
        "someone-else",
        serde_json::json!({"path": "/conf/app.json", "file_size": 7}),
    );
    h.apply(&key, file_spec("/conf/app.json", b"{}")).await;

    let result = h.reconcile(&key).await;
    assert_eq!(result, ReconcileResult::RequeueAfter(Duration::ZERO));
    assert_eq!(h.remote.calls(Op::Find), 0, "path-addressed kinds adopt without a search");

    // Size differs and no digest was recorded, so the content is rewritten
    let result = h.reconcile(&key).await;
    assert_eq!(result, ReconcileResult::RequeueAfter(Duration::ZERO));
    assert_eq!(h.remote.calls(Op::Update), 1);

    assert_eq!(h.settle(&key).await, ReconcileResult::Converged);
    assert_eq!(h.remote.count(ResourceKind::FilesystemBlock), 1);
}
