//! Desired-state builder: turns a ManagedOCS spec into the StorageCluster spec
//! the deployer enforces.
//!
//! Everything here is pure. The same parent spec and template always produce
//! the same StorageCluster spec, so the engine can compare it against the
//! observed object with `==`.

use std::collections::BTreeMap;

use ocs_store::{
    EncryptionSpec, ManagedOcs, ManagedOcsSpec, MultiCloudGatewaySpec, ObjectMeta,
    OwnerReference, PvcTemplate, Resource, StorageCluster, StorageClusterSpec, StorageDeviceSet,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label put on every StorageCluster the deployer creates.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "ocs-deployer";

const GI_PER_TI: u64 = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("invalid quantity {0:?}: expected a whole number of Gi or Ti")]
    InvalidQuantity(String),

    #[error("storage size {0:?} must be greater than zero")]
    ZeroCapacity(String),

    #[error("storage size {size} is not a multiple of the device size {device_size}")]
    NotMultipleOfDeviceSize { size: String, device_size: String },
}

/// Deployer-wide defaults for the StorageCluster layout.
///
/// Loaded from the `--template` JSON file; missing fields keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageClusterTemplate {
    pub device_set_name: String,
    /// Size of one device, e.g. `1Ti`.
    pub device_size: String,
    pub replica: u32,
    pub storage_class_name: String,
    pub volume_mode: String,
    pub portable: bool,
    /// Device count used when the ManagedOCS does not request a size.
    pub default_count: u32,
    pub manage_nodes: bool,
    pub encryption: bool,
    pub mcg_reconcile_strategy: String,
}

impl Default for StorageClusterTemplate {
    fn default() -> Self {
        Self {
            device_set_name: "default".to_string(),
            device_size: "1Ti".to_string(),
            replica: 3,
            storage_class_name: "gp2".to_string(),
            volume_mode: "Block".to_string(),
            portable: true,
            default_count: 1,
            manage_nodes: false,
            encryption: false,
            mcg_reconcile_strategy: "ignore".to_string(),
        }
    }
}

/// Parse a quantity like `4Ti` or `512Gi` into GiB.
pub fn parse_quantity_gib(quantity: &str) -> Result<u64, BuildError> {
    let invalid = || BuildError::InvalidQuantity(quantity.to_string());
    let trimmed = quantity.trim();

    let (digits, factor) = if let Some(n) = trimmed.strip_suffix("Ti") {
        (n, GI_PER_TI)
    } else if let Some(n) = trimmed.strip_suffix("Gi") {
        (n, 1)
    } else {
        return Err(invalid());
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let value: u64 = digits.parse().map_err(|_| invalid())?;
    value.checked_mul(factor).ok_or_else(invalid)
}

fn device_count(
    spec: &ManagedOcsSpec,
    template: &StorageClusterTemplate,
) -> Result<u32, BuildError> {
    let device_gib = parse_quantity_gib(&template.device_size)?;
    if device_gib == 0 {
        return Err(BuildError::ZeroCapacity(template.device_size.clone()));
    }

    let Some(size) = spec.storage_size.as_deref() else {
        return Ok(template.default_count);
    };

    let size_gib = parse_quantity_gib(size)?;
    if size_gib == 0 {
        return Err(BuildError::ZeroCapacity(size.to_string()));
    }
    if size_gib % device_gib != 0 {
        return Err(BuildError::NotMultipleOfDeviceSize {
            size: size.to_string(),
            device_size: template.device_size.clone(),
        });
    }
    u32::try_from(size_gib / device_gib).map_err(|_| BuildError::InvalidQuantity(size.to_string()))
}

/// Build the canonical StorageCluster spec for a ManagedOCS spec.
pub fn build_storage_cluster_spec(
    spec: &ManagedOcsSpec,
    template: &StorageClusterTemplate,
) -> Result<StorageClusterSpec, BuildError> {
    let count = device_count(spec, template)?;

    Ok(StorageClusterSpec {
        manage_nodes: template.manage_nodes,
        storage_device_sets: vec![StorageDeviceSet {
            name: template.device_set_name.clone(),
            count,
            replica: template.replica,
            portable: template.portable,
            data_pvc_template: PvcTemplate {
                storage_class_name: template.storage_class_name.clone(),
                volume_mode: template.volume_mode.clone(),
                access_modes: vec!["ReadWriteOnce".to_string()],
                storage: template.device_size.clone(),
            },
        }],
        encryption: EncryptionSpec {
            enable: template.encryption,
        },
        multi_cloud_gateway: Some(MultiCloudGatewaySpec {
            reconcile_strategy: template.mcg_reconcile_strategy.clone(),
        }),
    })
}

/// Wrap a desired spec into a new StorageCluster owned by `parent`.
pub fn build_storage_cluster(
    parent: &ManagedOcs,
    name: &str,
    spec: StorageClusterSpec,
) -> StorageCluster {
    let mut metadata = ObjectMeta::new(&parent.metadata.namespace, name);
    metadata.labels = BTreeMap::from([(
        MANAGED_BY_LABEL.to_string(),
        MANAGED_BY_VALUE.to_string(),
    )]);
    if let Some(uid) = parent.metadata.uid {
        metadata.owner_references.push(OwnerReference::controller(
            ManagedOcs::KIND,
            &parent.metadata.name,
            uid,
        ));
    }

    StorageCluster { metadata, spec }
}

/// Point the controller owner reference of `sc` at `parent`.
///
/// Returns true if the metadata changed.
pub fn set_controller_reference(sc: &mut StorageCluster, parent: &ManagedOcs) -> bool {
    let Some(uid) = parent.metadata.uid else {
        return false;
    };
    let wanted = OwnerReference::controller(ManagedOcs::KIND, &parent.metadata.name, uid);

    let refs = &mut sc.metadata.owner_references;
    match refs.iter().position(|r| r.controller) {
        Some(i) if refs[i] == wanted => false,
        Some(i) => {
            refs[i] = wanted;
            true
        }
        None => {
            refs.push(wanted);
            true
        }
    }
}
