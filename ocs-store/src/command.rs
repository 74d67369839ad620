use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::managed_ocs::ManagedOcs;
use crate::meta::ObjectKey;
use crate::storage_cluster::StorageCluster;

/// Writes applied to the store state.
///
/// IMPORTANT: uids and timestamps are generated BEFORE the command is applied.
/// `StoreState::apply()` must stay deterministic so that the same command log
/// always produces the same state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    // ManagedOCS operations
    CreateManagedOcs {
        uid: Uuid,
        timestamp: DateTime<Utc>,
        object: ManagedOcs,
    },
    /// Spec/metadata update. `object.metadata.resource_version` is the
    /// version the caller read.
    UpdateManagedOcs {
        object: ManagedOcs,
    },
    /// Status-only update, same version rules as `UpdateManagedOcs`.
    UpdateManagedOcsStatus {
        object: ManagedOcs,
    },
    DeleteManagedOcs {
        key: ObjectKey,
    },

    // StorageCluster operations
    CreateStorageCluster {
        uid: Uuid,
        timestamp: DateTime<Utc>,
        object: StorageCluster,
    },
    UpdateStorageCluster {
        object: StorageCluster,
    },
    DeleteStorageCluster {
        key: ObjectKey,
    },
}

/// Why a command was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorReason {
    NotFound,
    AlreadyExists,
    /// The caller's resource version is stale.
    Conflict,
    Invalid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    ManagedOcs(ManagedOcs),
    StorageCluster(StorageCluster),
    Deleted { key: ObjectKey },
    Error { reason: ErrorReason, message: String },
}

impl Response {
    pub(crate) fn error(reason: ErrorReason, message: impl Into<String>) -> Self {
        Response::Error {
            reason,
            message: message.into(),
        }
    }
}
