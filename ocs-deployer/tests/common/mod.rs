//! Shared test utilities for ocs-deployer integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use ocs_deployer::desired::build_storage_cluster_spec;
use ocs_deployer::{Controller, ControllerConfig, DeployerAuditLogger, Reconciler, ReconcilerConfig};
use ocs_store::{
    ManagedOcs, ManagedOcsSpec, ManagedOcsStore, MemoryStore, ObjectKey, StorageCluster,
    StorageClusterSpec, StorageClusterStore, StoreState,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};

pub const NAMESPACE: &str = "default";
pub const STORAGE_CLUSTER_NAME: &str = "ocs-storagecluster";

const TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A running controller over an in-memory store.
pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub audit: Arc<DeployerAuditLogger>,
    config: ReconcilerConfig,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<ocs_store::store::Result<()>>,
}

impl TestHarness {
    /// Spawn a controller with default configuration.
    pub async fn spawn() -> Self {
        Self::spawn_with_store(Arc::new(MemoryStore::new())).await
    }

    /// Spawn a controller over an existing store, e.g. one with faults queued.
    pub async fn spawn_with_store(store: Arc<MemoryStore>) -> Self {
        let config = ReconcilerConfig {
            storage_cluster_name: STORAGE_CLUSTER_NAME.to_string(),
            ..Default::default()
        };
        let audit = Arc::new(DeployerAuditLogger::default());
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            config.clone(),
            audit.clone(),
        ));
        let controller = Controller::new(
            store.clone(),
            reconciler,
            ControllerConfig {
                workers: 2,
                storage_cluster_name: STORAGE_CLUSTER_NAME.to_string(),
                backoff_base: Duration::from_millis(5),
                backoff_max: Duration::from_millis(100),
                ..Default::default()
            },
            audit.clone(),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(controller.run(shutdown_rx));

        Self {
            store,
            audit,
            config,
            shutdown_tx,
            handle,
        }
    }

    /// Stop the controller and wait for it.
    pub async fn shutdown(self) {
        self.shutdown_tx.send(true).expect("Controller already gone");
        self.handle
            .await
            .expect("Controller panicked")
            .expect("Controller failed");
    }

    pub fn storage_cluster_key(&self) -> ObjectKey {
        ObjectKey::new(NAMESPACE, STORAGE_CLUSTER_NAME)
    }

    /// The spec the deployer enforces for `spec`.
    pub fn desired(&self, spec: &ManagedOcsSpec) -> StorageClusterSpec {
        build_storage_cluster_spec(spec, &self.config.template).expect("Invalid ManagedOCS spec")
    }

    pub async fn create_managed_ocs(&self, mocs: ManagedOcs) -> ManagedOcs {
        self.store
            .create_managed_ocs(mocs)
            .await
            .expect("Failed to create ManagedOCS")
    }

    pub async fn managed_ocs(&self, key: &ObjectKey) -> ManagedOcs {
        self.store
            .get_managed_ocs(key)
            .await
            .expect("Failed to get ManagedOCS")
            .expect("ManagedOCS not found")
    }

    /// Update the ManagedOCS spec the way a user would: read, modify, write.
    pub async fn edit_managed_ocs(&self, key: &ObjectKey, edit: impl Fn(&mut ManagedOcs)) {
        loop {
            let mut mocs = self.managed_ocs(key).await;
            edit(&mut mocs);
            match self.store.update_managed_ocs(mocs).await {
                Ok(_) => return,
                Err(e) if e.is_conflict() => continue,
                Err(e) => panic!("Failed to update ManagedOCS: {e}"),
            }
        }
    }

    pub async fn storage_cluster(&self) -> Option<StorageCluster> {
        self.store
            .get_storage_cluster(&self.storage_cluster_key())
            .await
            .expect("Failed to get StorageCluster")
    }

    /// Overwrite the StorageCluster spec as an external actor. Returns the
    /// written object.
    pub async fn edit_storage_cluster(&self, spec: StorageClusterSpec) -> StorageCluster {
        loop {
            let mut sc = self.storage_cluster().await.expect("StorageCluster not found");
            sc.spec = spec.clone();
            match self.store.update_storage_cluster(sc).await {
                Ok(written) => return written,
                Err(e) if e.is_conflict() => continue,
                Err(e) => panic!("Failed to update StorageCluster: {e}"),
            }
        }
    }

    pub async fn delete_storage_cluster(&self) {
        self.store
            .delete_storage_cluster(&self.storage_cluster_key())
            .await
            .expect("Failed to delete StorageCluster");
    }

    /// Poll until `check` holds on the store state. False on timeout.
    pub async fn eventually(&self, check: impl Fn(&StoreState) -> bool) -> bool {
        let deadline = Instant::now() + TIMEOUT;
        loop {
            if check(&self.store.snapshot().await) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Poll for `duration` and check that `check` holds every time.
    pub async fn consistently(&self, duration: Duration, check: impl Fn(&StoreState) -> bool) -> bool {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            if !check(&self.store.snapshot().await) {
                return false;
            }
            sleep(POLL_INTERVAL).await;
        }
        true
    }
}
