pub mod command;
pub mod managed_ocs;
pub mod meta;
pub mod state;
pub mod storage_cluster;
pub mod store;

pub use command::{Command, ErrorReason, Response};
pub use managed_ocs::{
    Condition, ConditionStatus, ManagedOcs, ManagedOcsSpec, ManagedOcsStatus, ParseStrategyError,
    Phase, ReconcileStrategy,
};
pub use meta::{ObjectKey, ObjectMeta, OwnerReference, Resource};
pub use state::StoreState;
pub use storage_cluster::{
    EncryptionSpec, MultiCloudGatewaySpec, PvcTemplate, StorageCluster, StorageClusterSpec,
    StorageDeviceSet,
};
pub use store::{
    DataStore, Event, ManagedOcsStore, MemoryStore, Operation, StorageClusterStore, StoreError,
};
