//! Reconciliation engine for ManagedOCS.
//!
//! One pass:
//! 1. Read the ManagedOCS. Gone means there is nothing to do.
//! 2. Build the desired StorageCluster spec and compare it with the stored one:
//!    create it when missing, overwrite it on drift under `strict`, leave it
//!    alone under `none`.
//! 3. Write the projected status back to the ManagedOCS, whatever step 2 did.
//!
//! Both writes use optimistic concurrency. A conflict re-reads and retries
//! right away, up to `max_conflict_retries` attempts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ocs_store::{
    DataStore, ManagedOcs, ObjectKey, ReconcileStrategy, Resource, StorageCluster,
    StorageClusterSpec, StoreError,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::audit::DeployerAuditLogger;
use crate::controller::PassToken;
use crate::desired::{
    BuildError, StorageClusterTemplate, build_storage_cluster, build_storage_cluster_spec,
    set_controller_reference,
};
use crate::status::{Observation, project};

pub const DEFAULT_STORAGE_CLUSTER_NAME: &str = "ocs-storagecluster";
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 5;

/// What the controller should do with the key after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Done,
    Requeue(Duration),
}

/// What happened to the StorageCluster during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClusterOutcome {
    Created,
    /// Someone else created it between our read and our create.
    AlreadyExists,
    InSync,
    /// Spec matched but the owner reference pointed elsewhere.
    Adopted,
    Corrected { generation: u64 },
    DriftTolerated,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to {action} {object}: {source}")]
    Store {
        action: &'static str,
        object: String,
        #[source]
        source: StoreError,
    },

    #[error("gave up writing {object} after {attempts} conflicting attempts")]
    ConflictRetriesExhausted { object: String, attempts: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] BuildError),
}

impl ReconcileError {
    /// Transient errors are retried with backoff. The rest wait for the next
    /// change to the object.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ReconcileError::InvalidConfiguration(_))
    }

    fn store(action: &'static str, object: &ObjectKey) -> impl FnOnce(StoreError) -> Self {
        let object = object.to_string();
        move |source| ReconcileError::Store {
            action,
            object,
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Name of the StorageCluster, the same in every namespace.
    pub storage_cluster_name: String,
    pub max_conflict_retries: u32,
    pub template: StorageClusterTemplate,
    /// Reconcile again this long after a successful pass, to catch changes
    /// the watch missed. `None` waits for the next event.
    pub requeue_after: Option<Duration>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            storage_cluster_name: DEFAULT_STORAGE_CLUSTER_NAME.to_string(),
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            template: StorageClusterTemplate::default(),
            requeue_after: None,
        }
    }
}

/// Trait for the per-key reconcile pass driven by the controller.
#[async_trait]
pub trait Reconcile: Send + Sync {
    async fn reconcile(&self, key: &ObjectKey, pass: &PassToken) -> Result<Action, ReconcileError>;
}

pub struct Reconciler {
    store: Arc<dyn DataStore>,
    config: ReconcilerConfig,
    audit: Arc<DeployerAuditLogger>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn DataStore>,
        config: ReconcilerConfig,
        audit: Arc<DeployerAuditLogger>,
    ) -> Self {
        Self {
            store,
            config,
            audit,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Make the StorageCluster of `parent` match `desired` as far as
    /// `strategy` asks for.
    async fn reconcile_storage_cluster(
        &self,
        parent: &ManagedOcs,
        desired: StorageClusterSpec,
        strategy: ReconcileStrategy,
    ) -> Result<StorageClusterOutcome, ReconcileError> {
        let parent_key = parent.key();
        let sc_key = ObjectKey::new(
            &parent.metadata.namespace,
            &self.config.storage_cluster_name,
        );
        let mut attempts = 0;

        loop {
            let current = self
                .store
                .get_storage_cluster(&sc_key)
                .await
                .map_err(ReconcileError::store("get", &sc_key))?;

            let Some(mut current) = current else {
                return self.create_storage_cluster(parent, &sc_key, desired).await;
            };

            let drifted = current.spec != desired;
            if strategy == ReconcileStrategy::None {
                if !drifted {
                    return Ok(StorageClusterOutcome::InSync);
                }
                debug!(key = %parent_key, storage_cluster = %sc_key, "StorageCluster drifted, tolerated");
                self.audit.drift_tolerated(&parent_key, &sc_key);
                return Ok(StorageClusterOutcome::DriftTolerated);
            }

            // Without drift, only take over a StorageCluster whose owner is gone
            let adopted = if drifted || !self.owned_by_another(&current, parent).await? {
                set_controller_reference(&mut current, parent)
            } else {
                false
            };
            current.spec = desired.clone();
            if !drifted && !adopted {
                return Ok(StorageClusterOutcome::InSync);
            }
            attempts += 1;

            match self.store.update_storage_cluster(current).await {
                Ok(updated) if drifted => {
                    let generation = updated.metadata.generation;
                    info!(key = %parent_key, storage_cluster = %sc_key, generation, "Reverted StorageCluster spec");
                    self.audit.drift_corrected(&parent_key, &sc_key, generation);
                    return Ok(StorageClusterOutcome::Corrected { generation });
                }
                Ok(_) => {
                    info!(key = %parent_key, storage_cluster = %sc_key, "Took over StorageCluster owner reference");
                    return Ok(StorageClusterOutcome::Adopted);
                }
                // Deleted or rewritten since our read: look again
                Err(e) if e.is_conflict() || matches!(e, StoreError::NotFound(_)) => {
                    if attempts >= self.config.max_conflict_retries {
                        return Err(ReconcileError::ConflictRetriesExhausted {
                            object: sc_key.to_string(),
                            attempts,
                        });
                    }
                    debug!(storage_cluster = %sc_key, attempts, error = %e, "StorageCluster update conflicted, retrying");
                }
                Err(e) => return Err(ReconcileError::store("update", &sc_key)(e)),
            }
        }
    }

    /// Whether the controller reference of `sc` names another ManagedOCS
    /// that still exists, or something that isn't a ManagedOCS at all.
    async fn owned_by_another(
        &self,
        sc: &StorageCluster,
        parent: &ManagedOcs,
    ) -> Result<bool, ReconcileError> {
        let Some(owner) = sc.metadata.controller_owner() else {
            return Ok(false);
        };
        if owner.kind != ManagedOcs::KIND {
            return Ok(true);
        }
        if Some(owner.uid) == parent.metadata.uid {
            return Ok(false);
        }

        let key = ObjectKey::new(&sc.metadata.namespace, &owner.name);
        let live = self
            .store
            .get_managed_ocs(&key)
            .await
            .map_err(ReconcileError::store("get", &key))?;
        Ok(live.is_some_and(|p| p.metadata.uid == Some(owner.uid)))
    }

    async fn create_storage_cluster(
        &self,
        parent: &ManagedOcs,
        sc_key: &ObjectKey,
        desired: StorageClusterSpec,
    ) -> Result<StorageClusterOutcome, ReconcileError> {
        let parent_key = parent.key();
        let sc = build_storage_cluster(parent, &sc_key.name, desired);

        match self.store.create_storage_cluster(sc).await {
            Ok(_) => {
                info!(key = %parent_key, storage_cluster = %sc_key, "Created StorageCluster");
                self.audit.storage_cluster_created(&parent_key, sc_key);
                Ok(StorageClusterOutcome::Created)
            }
            Err(StoreError::AlreadyExists(_)) => {
                debug!(storage_cluster = %sc_key, "StorageCluster created concurrently");
                Ok(StorageClusterOutcome::AlreadyExists)
            }
            Err(e) => Err(ReconcileError::store("create", sc_key)(e)),
        }
    }

    /// Write the status projected from `observation` if it differs.
    ///
    /// On conflict only the status and version are refreshed: the status
    /// still describes the spec and generation this pass reconciled.
    async fn sync_status(
        &self,
        parent: &ManagedOcs,
        observation: &Observation,
    ) -> Result<(), ReconcileError> {
        let key = parent.key();
        let mut current = parent.clone();
        let mut attempts = 0;

        loop {
            let Some(status) = project(&current, observation, Utc::now()) else {
                return Ok(());
            };
            let old_strategy = current.status.reconcile_strategy;
            let new_strategy = status.reconcile_strategy;

            let mut updated = current.clone();
            updated.status = status;
            attempts += 1;

            match self.store.update_managed_ocs_status(updated).await {
                Ok(_) => {
                    if let Some(new) = new_strategy.filter(|s| Some(*s) != old_strategy) {
                        self.audit.strategy_changed(&key, old_strategy, new);
                    }
                    debug!(%key, "Updated ManagedOCS status");
                    return Ok(());
                }
                Err(StoreError::NotFound(_)) => {
                    debug!(%key, "ManagedOCS deleted before status update");
                    return Ok(());
                }
                Err(e) if e.is_conflict() => {
                    if attempts >= self.config.max_conflict_retries {
                        return Err(ReconcileError::ConflictRetriesExhausted {
                            object: key.to_string(),
                            attempts,
                        });
                    }
                    debug!(%key, attempts, "ManagedOCS status update conflicted, retrying");

                    let fresh = self
                        .store
                        .get_managed_ocs(&key)
                        .await
                        .map_err(ReconcileError::store("get", &key))?;
                    let Some(fresh) = fresh else {
                        return Ok(());
                    };
                    current.metadata.resource_version = fresh.metadata.resource_version;
                    current.status = fresh.status;
                }
                Err(e) => return Err(ReconcileError::store("update status of", &key)(e)),
            }
        }
    }
}

#[async_trait]
impl Reconcile for Reconciler {
    async fn reconcile(&self, key: &ObjectKey, pass: &PassToken) -> Result<Action, ReconcileError> {
        let parent = self
            .store
            .get_managed_ocs(key)
            .await
            .map_err(ReconcileError::store("get", key))?;

        let Some(parent) = parent else {
            debug!(%key, "ManagedOCS not found, nothing to reconcile");
            return Ok(Action::Done);
        };

        if pass.is_superseded() {
            debug!(%key, "Pass superseded before StorageCluster step");
            return Ok(Action::Done);
        }

        let strategy = parent.spec.effective_strategy();
        let dependent = match build_storage_cluster_spec(&parent.spec, &self.config.template) {
            Ok(desired) => {
                self.reconcile_storage_cluster(&parent, desired, strategy)
                    .await
            }
            Err(e) => Err(ReconcileError::InvalidConfiguration(e)),
        };

        if pass.is_superseded() {
            debug!(%key, "Pass superseded before status step");
            return Ok(Action::Done);
        }

        let observation = match &dependent {
            Ok(_) => Observation::Converged,
            Err(ReconcileError::InvalidConfiguration(e)) => {
                Observation::InvalidConfiguration(e.to_string())
            }
            Err(_) => Observation::Unavailable,
        };
        let status = self.sync_status(&parent, &observation).await;

        let outcome = dependent?;
        status?;
        debug!(%key, %strategy, ?outcome, "Reconciled ManagedOCS");
        Ok(self.config.requeue_after.map_or(Action::Done, Action::Requeue))
    }
}
