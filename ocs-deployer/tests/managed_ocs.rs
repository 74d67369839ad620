//! End-to-end tests for the ManagedOCS deployer.
//!
//! Every test runs the full controller (watcher, queue and workers) against
//! an in-memory store and observes convergence by polling the store.

mod common;

use std::time::Duration;

use common::{NAMESPACE, STORAGE_CLUSTER_NAME, TestHarness};
use ocs_store::{
    ManagedOcs, ManagedOcsSpec, ManagedOcsStore, MemoryStore, ObjectKey, Operation, Phase,
    ReconcileStrategy, Resource, StorageClusterSpec, StoreError, StoreState,
};
use std::sync::Arc;

const MANAGED_OCS_NAME: &str = "test-managedocs";

fn mocs_key() -> ObjectKey {
    ObjectKey::new(NAMESPACE, MANAGED_OCS_NAME)
}

fn sc_key() -> ObjectKey {
    ObjectKey::new(NAMESPACE, STORAGE_CLUSTER_NAME)
}

#[tokio::test]
async fn test_storage_cluster_created() {
    let harness = TestHarness::spawn().await;
    let desired = harness.desired(&ManagedOcsSpec::default());

    harness
        .create_managed_ocs(ManagedOcs::new(NAMESPACE, MANAGED_OCS_NAME))
        .await;

    assert!(
        harness
            .eventually(|s| s
                .get_storage_cluster(&sc_key())
                .is_some_and(|sc| sc.spec == desired))
            .await,
        "StorageCluster was not created"
    );

    // Unset strategy is enforced as strict
    assert!(
        harness
            .eventually(|s| s.get_managed_ocs(&mocs_key()).is_some_and(|m| {
                m.status.reconcile_strategy == Some(ReconcileStrategy::Strict)
                    && m.status.phase == Some(Phase::Ready)
            }))
            .await
    );

    let sc = harness.storage_cluster().await.unwrap();
    let parent = harness.managed_ocs(&mocs_key()).await;
    assert_eq!(
        sc.metadata.controller_owner().map(|o| o.uid),
        parent.metadata.uid
    );

    harness.shutdown().await;
}

#[tokio::test]
async fn test_storage_cluster_recreated_after_delete() {
    let harness = TestHarness::spawn().await;
    let desired = harness.desired(&ManagedOcsSpec::default());
    harness
        .create_managed_ocs(ManagedOcs::new(NAMESPACE, MANAGED_OCS_NAME))
        .await;
    assert!(
        harness
            .eventually(|s| s.get_storage_cluster(&sc_key()).is_some())
            .await
    );
    let first_uid = harness.storage_cluster().await.unwrap().metadata.uid;

    harness.delete_storage_cluster().await;

    assert!(
        harness
            .eventually(|s| s
                .get_storage_cluster(&sc_key())
                .is_some_and(|sc| sc.metadata.uid != first_uid && sc.spec == desired))
            .await,
        "StorageCluster was not recreated"
    );

    harness.shutdown().await;
}

#[tokio::test]
async fn test_strict_reverts_external_change() {
    let harness = TestHarness::spawn().await;
    let desired = harness.desired(&ManagedOcsSpec::default());
    harness
        .create_managed_ocs(
            ManagedOcs::new(NAMESPACE, MANAGED_OCS_NAME).with_strategy(ReconcileStrategy::Strict),
        )
        .await;
    assert!(
        harness
            .eventually(|s| s.get_storage_cluster(&sc_key()).is_some())
            .await
    );

    let changed = harness
        .edit_storage_cluster(StorageClusterSpec::default())
        .await;

    assert!(
        harness
            .eventually(|s| s.get_storage_cluster(&sc_key()).is_some_and(|sc| {
                sc.spec == desired && sc.metadata.generation > changed.metadata.generation
            }))
            .await,
        "StorageCluster spec was not reverted"
    );

    // Exactly one correction
    let sc = harness.storage_cluster().await.unwrap();
    assert_eq!(sc.metadata.generation, changed.metadata.generation + 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_none_keeps_external_change() {
    let harness = TestHarness::spawn().await;
    harness
        .create_managed_ocs(
            ManagedOcs::new(NAMESPACE, MANAGED_OCS_NAME).with_strategy(ReconcileStrategy::None),
        )
        .await;
    assert!(
        harness
            .eventually(|s| {
                s.get_storage_cluster(&sc_key()).is_some()
                    && s.get_managed_ocs(&mocs_key()).is_some_and(|m| {
                        m.status.reconcile_strategy == Some(ReconcileStrategy::None)
                    })
            })
            .await
    );

    let changed = harness
        .edit_storage_cluster(StorageClusterSpec::default())
        .await;

    assert!(
        harness
            .consistently(Duration::from_millis(300), |s| {
                s.get_storage_cluster(&sc_key()).is_some_and(|sc| {
                    sc.spec == StorageClusterSpec::default()
                        && sc.metadata.generation == changed.metadata.generation
                })
            })
            .await,
        "StorageCluster spec was modified under strategy none"
    );

    harness.shutdown().await;
}

#[tokio::test]
async fn test_status_follows_strategy_changes() {
    let harness = TestHarness::spawn().await;
    harness
        .create_managed_ocs(ManagedOcs::new(NAMESPACE, MANAGED_OCS_NAME))
        .await;

    let has_status = |strategy: ReconcileStrategy| {
        move |s: &StoreState| {
            s.get_managed_ocs(&mocs_key())
                .is_some_and(|m| m.status.reconcile_strategy == Some(strategy))
        }
    };

    assert!(harness.eventually(has_status(ReconcileStrategy::Strict)).await);

    for strategy in [
        ReconcileStrategy::None,
        ReconcileStrategy::Strict,
        ReconcileStrategy::None,
    ] {
        harness
            .edit_managed_ocs(&mocs_key(), |m| m.spec.reconcile_strategy = Some(strategy))
            .await;
        assert!(
            harness.eventually(has_status(strategy)).await,
            "status did not follow strategy {strategy}"
        );
    }

    let parent = harness.managed_ocs(&mocs_key()).await;
    assert_eq!(
        parent.status.observed_generation,
        Some(parent.metadata.generation)
    );

    harness.shutdown().await;
}

#[tokio::test]
async fn test_status_mirrored_while_store_fails() {
    let store = Arc::new(MemoryStore::new());
    for _ in 0..3 {
        store
            .inject_fault(
                Operation::CreateStorageCluster,
                StoreError::Unavailable("storage API down".into()),
            )
            .await;
    }
    let harness = TestHarness::spawn_with_store(store).await;

    harness
        .create_managed_ocs(
            ManagedOcs::new(NAMESPACE, MANAGED_OCS_NAME).with_strategy(ReconcileStrategy::None),
        )
        .await;

    // Strategy shows up even while the StorageCluster can't be created
    assert!(
        harness
            .eventually(|s| s.get_managed_ocs(&mocs_key()).is_some_and(|m| {
                m.status.reconcile_strategy == Some(ReconcileStrategy::None)
            }))
            .await
    );

    // Retried with backoff until the store recovers
    assert!(
        harness
            .eventually(|s| s.get_storage_cluster(&sc_key()).is_some())
            .await,
        "StorageCluster was not created after transient failures"
    );
    assert_eq!(
        harness
            .store
            .pending_faults(Operation::CreateStorageCluster)
            .await,
        0
    );

    let warnings = harness.audit.warnings();
    assert!(
        warnings
            .iter()
            .any(|r| r.reason == "ReconcileRetrying")
    );

    harness.shutdown().await;
}

#[tokio::test]
async fn test_invalid_size_reported_then_fixed() {
    let harness = TestHarness::spawn().await;
    harness
        .create_managed_ocs(
            ManagedOcs::new(NAMESPACE, MANAGED_OCS_NAME).with_storage_size("1536Gi"),
        )
        .await;

    assert!(
        harness
            .eventually(|s| s
                .get_managed_ocs(&mocs_key())
                .is_some_and(|m| m.status.phase == Some(Phase::Error)))
            .await
    );
    assert!(harness.storage_cluster().await.is_none());

    harness
        .edit_managed_ocs(&mocs_key(), |m| m.spec.storage_size = Some("2Ti".to_string()))
        .await;

    assert!(
        harness
            .eventually(|s| {
                s.get_storage_cluster(&sc_key())
                    .is_some_and(|sc| sc.spec.storage_device_sets[0].count == 2)
                    && s.get_managed_ocs(&mocs_key())
                        .is_some_and(|m| m.status.phase == Some(Phase::Ready))
            })
            .await
    );

    harness.shutdown().await;
}

#[tokio::test]
async fn test_parent_deletion_leaves_storage_cluster() {
    let harness = TestHarness::spawn().await;
    let parent = harness
        .create_managed_ocs(ManagedOcs::new(NAMESPACE, MANAGED_OCS_NAME))
        .await;
    assert!(
        harness
            .eventually(|s| s.get_storage_cluster(&sc_key()).is_some())
            .await
    );

    harness.store.delete_managed_ocs(&parent.key()).await.unwrap();

    assert!(
        harness
            .consistently(Duration::from_millis(200), |s| {
                s.get_managed_ocs(&mocs_key()).is_none() && s.get_storage_cluster(&sc_key()).is_some()
            })
            .await
    );

    harness.shutdown().await;
}

#[tokio::test]
async fn test_strict_reverts_drift_after_owner_replaced() {
    let harness = TestHarness::spawn().await;
    let desired = harness.desired(&ManagedOcsSpec::default());
    let first = harness
        .create_managed_ocs(ManagedOcs::new(NAMESPACE, "first"))
        .await;
    assert!(
        harness
            .eventually(|s| s.get_storage_cluster(&sc_key()).is_some())
            .await
    );
    harness.store.delete_managed_ocs(&first.key()).await.unwrap();

    let second_key = ObjectKey::new(NAMESPACE, "second");
    let second = harness
        .create_managed_ocs(
            ManagedOcs::new(NAMESPACE, "second").with_strategy(ReconcileStrategy::Strict),
        )
        .await;
    assert!(
        harness
            .eventually(|s| {
                s.get_managed_ocs(&second_key)
                    .is_some_and(|m| m.status.phase == Some(Phase::Ready))
                    && s.get_storage_cluster(&sc_key()).is_some_and(|sc| {
                        sc.metadata.controller_owner().map(|o| o.uid) == second.metadata.uid
                    })
            })
            .await,
        "StorageCluster was not taken over by the new ManagedOCS"
    );

    let changed = harness
        .edit_storage_cluster(StorageClusterSpec::default())
        .await;
    assert!(
        harness
            .eventually(|s| s.get_storage_cluster(&sc_key()).is_some_and(|sc| {
                sc.spec == desired && sc.metadata.generation == changed.metadata.generation + 1
            }))
            .await,
        "StorageCluster spec was not reverted"
    );

    harness.shutdown().await;
}

/// Create, drift, delete, switch to none, drift again.
#[tokio::test]
async fn test_strict_then_none_scenario() {
    let harness = TestHarness::spawn().await;
    let desired = harness.desired(&ManagedOcsSpec::default());

    harness
        .create_managed_ocs(
            ManagedOcs::new(NAMESPACE, MANAGED_OCS_NAME).with_strategy(ReconcileStrategy::Strict),
        )
        .await;
    assert!(
        harness
            .eventually(|s| s
                .get_storage_cluster(&sc_key())
                .is_some_and(|sc| sc.spec == desired))
            .await
    );

    // External change is reverted
    let mut drifted = desired.clone();
    drifted.encryption.enable = true;
    let changed = harness.edit_storage_cluster(drifted).await;
    assert!(
        harness
            .eventually(|s| s.get_storage_cluster(&sc_key()).is_some_and(|sc| {
                sc.spec == desired && sc.metadata.generation > changed.metadata.generation
            }))
            .await
    );

    // Deletion is undone
    harness.delete_storage_cluster().await;
    assert!(
        harness
            .eventually(|s| s
                .get_storage_cluster(&sc_key())
                .is_some_and(|sc| sc.spec == desired && sc.metadata.generation == 1))
            .await
    );

    // Switch to none
    harness
        .edit_managed_ocs(&mocs_key(), |m| {
            m.spec.reconcile_strategy = Some(ReconcileStrategy::None)
        })
        .await;
    assert!(
        harness
            .eventually(|s| s.get_managed_ocs(&mocs_key()).is_some_and(|m| {
                m.status.reconcile_strategy == Some(ReconcileStrategy::None)
            }))
            .await
    );

    let mut drifted = desired.clone();
    drifted.manage_nodes = true;
    let changed = harness.edit_storage_cluster(drifted.clone()).await;
    assert!(
        harness
            .consistently(Duration::from_millis(300), |s| {
                s.get_storage_cluster(&sc_key()).is_some_and(|sc| {
                    sc.spec == drifted && sc.metadata.generation == changed.metadata.generation
                })
            })
            .await
    );

    harness.shutdown().await;
}
