//! DataStore trait definitions.
//!
//! Reads return `Ok(None)` for missing objects. Updates are compare-and-swap
//! writes: the object's `metadata.resource_version` must match the stored
//! version, otherwise the write fails with [`StoreError::Conflict`].
//!
//! [`StoreError::Conflict`]: super::StoreError::Conflict

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::managed_ocs::ManagedOcs;
use crate::meta::ObjectKey;
use crate::storage_cluster::StorageCluster;

use super::error::Result;
use super::event::Event;

/// Store trait for ManagedOCS operations.
#[async_trait]
pub trait ManagedOcsStore: Send + Sync {
    /// Get a ManagedOCS by key.
    async fn get_managed_ocs(&self, key: &ObjectKey) -> Result<Option<ManagedOcs>>;

    /// List ManagedOCS objects, optionally restricted to a namespace.
    async fn list_managed_ocs(&self, namespace: Option<&str>) -> Result<Vec<ManagedOcs>>;

    /// Create a ManagedOCS. Fails with `AlreadyExists` if the key is taken.
    async fn create_managed_ocs(&self, object: ManagedOcs) -> Result<ManagedOcs>;

    /// Update spec and metadata. Status is ignored.
    async fn update_managed_ocs(&self, object: ManagedOcs) -> Result<ManagedOcs>;

    /// Update status only. Spec is ignored and the generation is kept.
    async fn update_managed_ocs_status(&self, object: ManagedOcs) -> Result<ManagedOcs>;

    /// Delete a ManagedOCS.
    async fn delete_managed_ocs(&self, key: &ObjectKey) -> Result<()>;
}

/// Store trait for StorageCluster operations.
#[async_trait]
pub trait StorageClusterStore: Send + Sync {
    /// Get a StorageCluster by key.
    async fn get_storage_cluster(&self, key: &ObjectKey) -> Result<Option<StorageCluster>>;

    /// List StorageCluster objects, optionally restricted to a namespace.
    async fn list_storage_clusters(&self, namespace: Option<&str>) -> Result<Vec<StorageCluster>>;

    /// Create a StorageCluster. Fails with `AlreadyExists` if the key is taken.
    async fn create_storage_cluster(&self, object: StorageCluster) -> Result<StorageCluster>;

    /// Update spec and metadata.
    async fn update_storage_cluster(&self, object: StorageCluster) -> Result<StorageCluster>;

    /// Delete a StorageCluster.
    async fn delete_storage_cluster(&self, key: &ObjectKey) -> Result<()>;
}

/// Composite data store trait combining all kinds.
///
/// This is the trait the deployer is built against. It provides:
/// - ManagedOCS CRUD and status writes
/// - StorageCluster CRUD
/// - Event subscription (watch)
pub trait DataStore: ManagedOcsStore + StorageClusterStore + Send + Sync {
    /// Subscribe to state change events.
    ///
    /// Returns a broadcast receiver that will receive an event for every
    /// write that changed an object.
    fn subscribe(&self) -> broadcast::Receiver<Event>;
}
