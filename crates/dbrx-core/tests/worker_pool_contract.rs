//! Contract Test: Worker Pool Dispatch & Shutdown
//!
//! Constraints verified:
//! - Every stored key is reconciled when the pool starts
//! - Enqueued keys are picked up while the pool runs
//! - Immediate requeues are followed until the object converges
//! - Shutdown lets in-flight passes finish and returns cleanly
//!
//! If this test fails, objects can be skipped or the pool can hang on exit.

mod common;

use common::*;
use dbrx_core::{MemoryObjectStore, ObjectKey, ResourceKind, WorkerPool};
use std::sync::Arc;
use std::time::Duration;

async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

#[tokio::test]
async fn pool_reconciles_stored_and_enqueued_keys() {
    let h = Harness::new(ResourceKind::Cluster);
    let keys: Vec<ObjectKey> = (0..5)
        .map(|n| ObjectKey::new("team-a", format!("etl-{}", n)))
        .collect();
    for key in &keys {
        h.apply(key, cluster_spec(2)).await;
    }

    let Harness {
        remote,
        store,
        reconciler,
        ..
    } = h;
    let pool = Arc::new(WorkerPool::new(Arc::new(reconciler), 3));
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let runner = tokio::spawn({
        let pool = pool.clone();
        async move { pool.run_with_shutdown(shutdown_rx).await }
    });

    let remote = &remote;
    wait_for(move || async move { remote.count(ResourceKind::Cluster) == 5 }).await;

    // An object declared after start needs an explicit trigger
    let late = ObjectKey::new("team-a", "late");
    dbrx_core::ObjectStore::apply(&store, ResourceKind::Cluster, &late, cluster_spec(1))
        .await
        .unwrap();
    pool.enqueue(late.clone()).await;
    wait_for(move || async move { remote.count(ResourceKind::Cluster) == 6 }).await;

    shutdown_tx.send(()).unwrap();
    runner.await.unwrap().unwrap();

    assert_eq!(remote.calls(Op::Create), 6, "a key was created twice");
    for key in keys.iter().chain([&late]) {
        let obj = dbrx_core::ObjectStore::load(&store, ResourceKind::Cluster, key)
            .await
            .unwrap()
            .unwrap();
        assert!(obj.status.handle.is_some(), "{} has no handle", key);
    }
}

#[tokio::test]
async fn pool_follows_immediate_requeues_to_convergence() {
    let h = Harness::new(ResourceKind::Cluster);
    let key = ObjectKey::new("team-a", "etl");
    h.apply(&key, cluster_spec(2)).await;
    h.reconcile(&key).await;
    h.apply(&key, cluster_spec(4)).await;

    let Harness {
        remote,
        store,
        reconciler,
        ..
    } = h;
    let pool = Arc::new(WorkerPool::new(Arc::new(reconciler), 2));
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let runner = tokio::spawn({
        let pool = pool.clone();
        async move { pool.run_with_shutdown(shutdown_rx).await }
    });

    // Update pass requeues at once; the confirming pass marks it synced
    let (store, key) = (&store, &key);
    wait_for(move || async move {
        dbrx_core::ObjectStore::load(store, ResourceKind::Cluster, key)
            .await
            .unwrap()
            .is_some_and(|obj| {
                obj.status.is_true(dbrx_core::CONDITION_SYNCED)
                    && obj.status.observed_generation == Some(2)
            })
    })
    .await;

    shutdown_tx.send(()).unwrap();
    runner.await.unwrap().unwrap();
    assert_eq!(remote.calls(Op::Update), 1);
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_pass() {
    let remote = MockRemoteClient::with_latency(Duration::from_millis(200));
    let h = Harness::with_remote(
        ResourceKind::Cluster,
        remote,
        MemoryObjectStore::new(),
        test_config(),
    );
    let key = ObjectKey::new("team-a", "etl");
    h.apply(&key, cluster_spec(2)).await;

    let Harness {
        remote,
        store,
        reconciler,
        ..
    } = h;
    let pool = Arc::new(WorkerPool::new(Arc::new(reconciler), 1));
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let runner = tokio::spawn({
        let pool = pool.clone();
        async move { pool.run_with_shutdown(shutdown_rx).await }
    });

    // Signal while the create call is still sleeping
    let remote = &remote;
    wait_for(move || async move { remote.calls(Op::Create) == 1 }).await;
    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(2), runner)
        .await
        .expect("pool stops promptly")
        .unwrap()
        .unwrap();

    // The completed create was recorded before the pool returned
    let obj = dbrx_core::ObjectStore::load(&store, ResourceKind::Cluster, &key)
        .await
        .unwrap()
        .unwrap();
    assert!(obj.status.handle.is_some());
    assert_eq!(remote.count(ResourceKind::Cluster), 1);
}

#[tokio::test]
async fn idle_pool_shuts_down_cleanly() {
    let h = Harness::new(ResourceKind::Cluster);
    let pool = WorkerPool::from_config(Arc::new(h.reconciler));
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    shutdown_tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(1), pool.run_with_shutdown(shutdown_rx))
        .await
        .expect("pool stops promptly")
        .unwrap();
    assert_eq!(pool.depth().await.1, 0);
    assert_eq!(h.remote.total_calls(), 0);
}
