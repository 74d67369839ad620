//! MemoryStore implementation - bridges the DataStore traits to an in-process StoreState.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, trace};

use crate::command::{Command, ErrorReason, Response};
use crate::managed_ocs::ManagedOcs;
use crate::meta::ObjectKey;
use crate::state::StoreState;
use crate::storage_cluster::StorageCluster;

use super::error::{Result, StoreError};
use super::event::Event;
use super::fault::{FaultPlan, Operation};
use super::traits::{DataStore, ManagedOcsStore, StorageClusterStore};

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// MemoryStore wraps a StoreState and implements the DataStore trait.
///
/// Writes go through [`StoreState::apply`] one at a time and their events are
/// broadcast in the order the writes were applied.
pub struct MemoryStore {
    state: RwLock<StoreState>,
    events: broadcast::Sender<Event>,
    faults: Mutex<FaultPlan>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create an empty store whose event channel buffers `capacity` events
    /// per subscriber before lagging.
    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            state: RwLock::new(StoreState::new()),
            events,
            faults: Mutex::new(FaultPlan::default()),
        }
    }

    /// Make the next call of `op` fail with `error`. Injected errors queue up.
    pub async fn inject_fault(&self, op: Operation, error: StoreError) {
        debug!(?op, %error, "Injecting store fault");
        self.faults.lock().await.push(op, error);
    }

    /// Number of injected faults not consumed yet.
    pub async fn pending_faults(&self, op: Operation) -> usize {
        self.faults.lock().await.pending(op)
    }

    /// Snapshot of the current state.
    pub async fn snapshot(&self) -> StoreState {
        self.state.read().await.clone()
    }

    async fn check_fault(&self, op: Operation) -> Result<()> {
        match self.faults.lock().await.take(op) {
            Some(error) => {
                debug!(?op, %error, "Failing store call with injected fault");
                Err(error)
            }
            None => Ok(()),
        }
    }

    /// Apply a write command and publish its events.
    async fn write_command(&self, op: Operation, cmd: Command) -> Result<Response> {
        self.check_fault(op).await?;

        let response = {
            let mut state = self.state.write().await;
            let (response, events) = state.apply(cmd);
            // Published under the lock so subscribers see writes in apply order
            for event in events {
                trace!(kind = event.kind(), key = %event.key(), "Publishing store event");
                // No subscribers is fine
                let _ = self.events.send(event);
            }
            response
        };

        match response {
            Response::Error { reason, message } => Err(match reason {
                ErrorReason::NotFound => StoreError::NotFound(message),
                ErrorReason::AlreadyExists => StoreError::AlreadyExists(message),
                ErrorReason::Conflict => StoreError::Conflict(message),
                ErrorReason::Invalid => StoreError::Invalid(message),
            }),
            response => Ok(response),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ManagedOcsStore for MemoryStore {
    async fn get_managed_ocs(&self, key: &ObjectKey) -> Result<Option<ManagedOcs>> {
        self.check_fault(Operation::GetManagedOcs).await?;
        let state = self.state.read().await;
        Ok(state.get_managed_ocs(key).cloned())
    }

    async fn list_managed_ocs(&self, namespace: Option<&str>) -> Result<Vec<ManagedOcs>> {
        self.check_fault(Operation::ListManagedOcs).await?;
        let state = self.state.read().await;
        Ok(state
            .list_managed_ocs(namespace)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn create_managed_ocs(&self, object: ManagedOcs) -> Result<ManagedOcs> {
        let cmd = Command::CreateManagedOcs {
            uid: uuid::Uuid::new_v4(),
            timestamp: Utc::now(),
            object,
        };

        match self.write_command(Operation::CreateManagedOcs, cmd).await? {
            Response::ManagedOcs(data) => Ok(data),
            _ => Err(StoreError::Internal("unexpected response".into())),
        }
    }

    async fn update_managed_ocs(&self, object: ManagedOcs) -> Result<ManagedOcs> {
        let cmd = Command::UpdateManagedOcs { object };

        match self.write_command(Operation::UpdateManagedOcs, cmd).await? {
            Response::ManagedOcs(data) => Ok(data),
            _ => Err(StoreError::Internal("unexpected response".into())),
        }
    }

    async fn update_managed_ocs_status(&self, object: ManagedOcs) -> Result<ManagedOcs> {
        let cmd = Command::UpdateManagedOcsStatus { object };

        match self
            .write_command(Operation::UpdateManagedOcsStatus, cmd)
            .await?
        {
            Response::ManagedOcs(data) => Ok(data),
            _ => Err(StoreError::Internal("unexpected response".into())),
        }
    }

    async fn delete_managed_ocs(&self, key: &ObjectKey) -> Result<()> {
        let cmd = Command::DeleteManagedOcs { key: key.clone() };

        match self.write_command(Operation::DeleteManagedOcs, cmd).await? {
            Response::Deleted { .. } => Ok(()),
            _ => Err(StoreError::Internal("unexpected response".into())),
        }
    }
}

#[async_trait]
impl StorageClusterStore for MemoryStore {
    async fn get_storage_cluster(&self, key: &ObjectKey) -> Result<Option<StorageCluster>> {
        self.check_fault(Operation::GetStorageCluster).await?;
        let state = self.state.read().await;
        Ok(state.get_storage_cluster(key).cloned())
    }

    async fn list_storage_clusters(&self, namespace: Option<&str>) -> Result<Vec<StorageCluster>> {
        self.check_fault(Operation::ListStorageClusters).await?;
        let state = self.state.read().await;
        Ok(state
            .list_storage_clusters(namespace)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn create_storage_cluster(&self, object: StorageCluster) -> Result<StorageCluster> {
        let cmd = Command::CreateStorageCluster {
            uid: uuid::Uuid::new_v4(),
            timestamp: Utc::now(),
            object,
        };

        match self
            .write_command(Operation::CreateStorageCluster, cmd)
            .await?
        {
            Response::StorageCluster(data) => Ok(data),
            _ => Err(StoreError::Internal("unexpected response".into())),
        }
    }

    async fn update_storage_cluster(&self, object: StorageCluster) -> Result<StorageCluster> {
        let cmd = Command::UpdateStorageCluster { object };

        match self
            .write_command(Operation::UpdateStorageCluster, cmd)
            .await?
        {
            Response::StorageCluster(data) => Ok(data),
            _ => Err(StoreError::Internal("unexpected response".into())),
        }
    }

    async fn delete_storage_cluster(&self, key: &ObjectKey) -> Result<()> {
        let cmd = Command::DeleteStorageCluster { key: key.clone() };

        match self
            .write_command(Operation::DeleteStorageCluster, cmd)
            .await?
        {
            Response::Deleted { .. } => Ok(()),
            _ => Err(StoreError::Internal("unexpected response".into())),
        }
    }
}

impl DataStore for MemoryStore {
    fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}
