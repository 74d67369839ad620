//! Object identity and metadata shared by every stored kind.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespaced identity of an object. Unique per kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Link from a dependent object to the object that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: Uuid,
    /// Whether the owner is the managing controller of the object.
    #[serde(default)]
    pub controller: bool,
}

impl OwnerReference {
    /// Create a controller owner reference.
    pub fn controller(kind: impl Into<String>, name: impl Into<String>, uid: Uuid) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            uid,
            controller: true,
        }
    }
}

/// Metadata carried by every stored object.
///
/// `uid`, `generation`, `resource_version` and `creation_timestamp` are owned
/// by the store: whatever a client sends on create is overwritten.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,
    /// Bumped by the store on every write that changes the spec.
    #[serde(default)]
    pub generation: u64,
    /// Bumped by the store on every successful write. Updates must echo the
    /// version they were based on.
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    /// The owner reference marked as managing controller, if any.
    pub fn controller_owner(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }
}

/// A stored kind with metadata and a spec.
pub trait Resource: Clone + Send + Sync + 'static {
    /// Kind name, as it appears in owner references and log lines.
    const KIND: &'static str;

    type Spec: Clone + PartialEq + Send + Sync;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    fn spec(&self) -> &Self::Spec;

    fn spec_mut(&mut self) -> &mut Self::Spec;

    fn key(&self) -> ObjectKey {
        self.metadata().key()
    }
}
