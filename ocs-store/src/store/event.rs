//! Events emitted by store changes.

use crate::managed_ocs::ManagedOcs;
use crate::meta::{ObjectKey, Resource};
use crate::storage_cluster::StorageCluster;

/// Events emitted when state changes occur.
///
/// These events are dispatched via broadcast channels to subscribers, after
/// the write has been applied. No-op writes emit nothing.
#[derive(Debug, Clone)]
pub enum Event {
    // ManagedOCS events
    /// A new ManagedOCS was created.
    ManagedOcsCreated(ManagedOcs),
    /// A ManagedOCS spec or metadata was updated.
    ManagedOcsUpdated {
        key: ObjectKey,
        old: ManagedOcs,
        new: ManagedOcs,
    },
    /// A ManagedOCS status was updated.
    ManagedOcsStatusUpdated {
        key: ObjectKey,
        old: ManagedOcs,
        new: ManagedOcs,
    },
    /// A ManagedOCS was deleted. Carries the last stored state.
    ManagedOcsDeleted(ManagedOcs),

    // StorageCluster events
    /// A new StorageCluster was created.
    StorageClusterCreated(StorageCluster),
    /// A StorageCluster was updated.
    StorageClusterUpdated {
        key: ObjectKey,
        old: StorageCluster,
        new: StorageCluster,
    },
    /// A StorageCluster was deleted. Carries the last stored state.
    StorageClusterDeleted(StorageCluster),
}

impl Event {
    /// Get the kind of the object this event is about.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::ManagedOcsCreated(_)
            | Event::ManagedOcsUpdated { .. }
            | Event::ManagedOcsStatusUpdated { .. }
            | Event::ManagedOcsDeleted(_) => ManagedOcs::KIND,
            Event::StorageClusterCreated(_)
            | Event::StorageClusterUpdated { .. }
            | Event::StorageClusterDeleted(_) => StorageCluster::KIND,
        }
    }

    /// Get the key of the object this event is about.
    pub fn key(&self) -> ObjectKey {
        match self {
            Event::ManagedOcsCreated(m) | Event::ManagedOcsDeleted(m) => m.key(),
            Event::ManagedOcsUpdated { key, .. } | Event::ManagedOcsStatusUpdated { key, .. } => {
                key.clone()
            }
            Event::StorageClusterCreated(sc) | Event::StorageClusterDeleted(sc) => sc.key(),
            Event::StorageClusterUpdated { key, .. } => key.clone(),
        }
    }

    /// The StorageCluster as of this event, for StorageCluster events.
    pub fn storage_cluster(&self) -> Option<&StorageCluster> {
        match self {
            Event::StorageClusterCreated(sc) | Event::StorageClusterDeleted(sc) => Some(sc),
            Event::StorageClusterUpdated { new, .. } => Some(new),
            _ => None,
        }
    }
}
