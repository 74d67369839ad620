//! StorageCluster - the storage engine resource the deployer keeps in shape.
//!
//! Only the fields the deployer manages are modelled. The storage operator
//! that acts on this object is outside of this workspace.

use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, Resource};

/// PVC template used for the devices of a device set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PvcTemplate {
    pub storage_class_name: String,
    pub volume_mode: String,
    #[serde(default)]
    pub access_modes: Vec<String>,
    /// Requested size of a single device, e.g. `1Ti`.
    pub storage: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageDeviceSet {
    pub name: String,
    pub count: u32,
    pub replica: u32,
    #[serde(default)]
    pub portable: bool,
    pub data_pvc_template: PvcTemplate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionSpec {
    #[serde(default)]
    pub enable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiCloudGatewaySpec {
    pub reconcile_strategy: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageClusterSpec {
    #[serde(default)]
    pub manage_nodes: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub storage_device_sets: Vec<StorageDeviceSet>,
    #[serde(default)]
    pub encryption: EncryptionSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_cloud_gateway: Option<MultiCloudGatewaySpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageCluster {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: StorageClusterSpec,
}

impl StorageCluster {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: StorageClusterSpec::default(),
        }
    }
}

impl Resource for StorageCluster {
    const KIND: &'static str = "StorageCluster";

    type Spec = StorageClusterSpec;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn spec(&self) -> &StorageClusterSpec {
        &self.spec
    }

    fn spec_mut(&mut self) -> &mut StorageClusterSpec {
        &mut self.spec
    }
}
