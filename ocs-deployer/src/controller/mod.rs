//! Controller - turns store events into reconcile passes.
//!
//! ```text
//! store.subscribe() ──► watcher ──► WorkQueue ──► worker × N ──► Reconcile::reconcile()
//!        ▲                                                              │
//!        └──────────────────────── store writes ◄───────────────────────┘
//! ```
//!
//! The watcher maps every event to the ManagedOCS keys it concerns. Workers
//! pull keys from the queue, which guarantees a key is never reconciled by two
//! workers at once. Failed passes are requeued with per-key backoff.

mod backoff;
mod queue;

pub use backoff::Backoff;
pub use queue::{PassToken, WorkQueue};

use std::sync::Arc;
use std::time::Duration;

use ocs_store::store::Result;
use ocs_store::{DataStore, Event, ManagedOcs, ObjectKey, Resource, StorageCluster};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audit::DeployerAuditLogger;
use crate::reconciler::{Action, DEFAULT_STORAGE_CLUSTER_NAME, Reconcile};

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Only watch this namespace. `None` watches all of them.
    pub namespace: Option<String>,
    pub workers: usize,
    /// StorageCluster name that belongs to the ManagedOCS of its namespace.
    pub storage_cluster_name: String,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            workers: 2,
            storage_cluster_name: DEFAULT_STORAGE_CLUSTER_NAME.to_string(),
            backoff_base: Duration::from_millis(5),
            backoff_max: Duration::from_secs(300),
        }
    }
}

pub struct Controller {
    store: Arc<dyn DataStore>,
    reconciler: Arc<dyn Reconcile>,
    queue: Arc<WorkQueue>,
    config: ControllerConfig,
    audit: Arc<DeployerAuditLogger>,
}

impl Controller {
    pub fn new(
        store: Arc<dyn DataStore>,
        reconciler: Arc<dyn Reconcile>,
        config: ControllerConfig,
        audit: Arc<DeployerAuditLogger>,
    ) -> Self {
        let queue = Arc::new(WorkQueue::new(config.backoff_base, config.backoff_max));
        Self {
            store,
            reconciler,
            queue,
            config,
            audit,
        }
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// Run until `shutdown` turns true.
    ///
    /// Subscribes before the initial list so no change between the two is
    /// missed. Fails only if the initial list fails.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let events = self.store.subscribe();
        resync(self.store.as_ref(), &self.config, &self.queue).await?;

        let watcher = tokio::spawn(watch_events(
            Arc::clone(&self.store),
            self.config.clone(),
            Arc::clone(&self.queue),
            events,
        ));

        let workers: Vec<JoinHandle<()>> = (0..self.config.workers.max(1))
            .map(|id| {
                tokio::spawn(worker(
                    id,
                    Arc::clone(&self.queue),
                    Arc::clone(&self.reconciler),
                    Arc::clone(&self.audit),
                ))
            })
            .collect();

        info!(
            workers = workers.len(),
            namespace = self.config.namespace.as_deref().unwrap_or("*"),
            "Controller started"
        );

        while !*shutdown.borrow_and_update() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        info!("Stopping controller");
        self.queue.shutdown().await;
        watcher.abort();
        for handle in workers {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task failed");
            }
        }
        info!("Controller stopped");
        Ok(())
    }
}

/// Queue every ManagedOCS in scope.
async fn resync(store: &dyn DataStore, config: &ControllerConfig, queue: &WorkQueue) -> Result<()> {
    let parents = store.list_managed_ocs(config.namespace.as_deref()).await?;
    debug!(count = parents.len(), "Resync");
    for parent in parents {
        queue.add(parent.key()).await;
    }
    Ok(())
}

async fn watch_events(
    store: Arc<dyn DataStore>,
    config: ControllerConfig,
    queue: Arc<WorkQueue>,
    mut events: broadcast::Receiver<Event>,
) {
    debug!("Started store event watcher");

    loop {
        match events.recv().await {
            Ok(event) => {
                for key in keys_for_event(store.as_ref(), &config, &event).await {
                    queue.add(key).await;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Store event stream lagged, resyncing");
                if let Err(e) = resync(store.as_ref(), &config, &queue).await {
                    warn!(error = %e, "Resync failed");
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    debug!("Store event watcher stopped");
}

/// ManagedOCS keys whose reconcile outcome may change because of `event`.
async fn keys_for_event(
    store: &dyn DataStore,
    config: &ControllerConfig,
    event: &Event,
) -> Vec<ObjectKey> {
    let key = event.key();
    if config
        .namespace
        .as_deref()
        .is_some_and(|ns| ns != key.namespace)
    {
        return vec![];
    }

    if let Some(sc) = event.storage_cluster() {
        return owners_of(store, config, sc).await;
    }

    match event {
        // Written by the deployer itself
        Event::ManagedOcsStatusUpdated { .. } => vec![],
        _ => vec![key],
    }
}

async fn owners_of(
    store: &dyn DataStore,
    config: &ControllerConfig,
    sc: &StorageCluster,
) -> Vec<ObjectKey> {
    match sc.metadata.controller_owner() {
        Some(owner) if owner.kind != ManagedOcs::KIND => return vec![],
        Some(owner) => {
            let key = ObjectKey::new(&sc.metadata.namespace, &owner.name);
            match store.get_managed_ocs(&key).await {
                Ok(Some(parent)) if parent.metadata.uid == Some(owner.uid) => return vec![key],
                Ok(_) => {
                    debug!(storage_cluster = %sc.key(), owner = %key, "StorageCluster owner is gone");
                }
                Err(e) => {
                    warn!(storage_cluster = %sc.key(), error = %e, "Failed to get owner of StorageCluster");
                    return vec![key];
                }
            }
        }
        None => {}
    }

    if sc.metadata.name != config.storage_cluster_name {
        return vec![];
    }

    // Orphaned canonical StorageCluster: every ManagedOCS of the namespace cares
    match store.list_managed_ocs(Some(&sc.metadata.namespace)).await {
        Ok(parents) => parents.iter().map(Resource::key).collect(),
        Err(e) => {
            warn!(storage_cluster = %sc.key(), error = %e, "Failed to list owners of StorageCluster");
            vec![]
        }
    }
}

async fn worker(
    id: usize,
    queue: Arc<WorkQueue>,
    reconciler: Arc<dyn Reconcile>,
    audit: Arc<DeployerAuditLogger>,
) {
    debug!(worker = id, "Worker started");

    while let Some((key, pass)) = queue.get().await {
        match reconciler.reconcile(&key, &pass).await {
            Ok(Action::Done) => queue.forget(&key).await,
            Ok(Action::Requeue(delay)) => {
                queue.forget(&key).await;
                queue.add_after(key.clone(), delay);
            }
            Err(e) if e.is_transient() => {
                let delay = queue.add_rate_limited(key.clone()).await;
                warn!(%key, error = %e, ?delay, "Reconcile failed, retrying");
                audit.reconcile_failed(&key, &e, true);
            }
            Err(e) => {
                error!(%key, error = %e, "Reconcile failed");
                audit.reconcile_failed(&key, &e, false);
                queue.forget(&key).await;
            }
        }
        queue.done(&key).await;
    }

    debug!(worker = id, "Worker stopped");
}
