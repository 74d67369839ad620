//! ManagedOCS - the declaration a user creates to request a managed storage service.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::meta::{ObjectMeta, Resource};

/// How strictly the deployer enforces the StorageCluster spec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileStrategy {
    /// Revert any external change to the StorageCluster spec.
    #[default]
    Strict,
    /// Only make sure the StorageCluster exists; external changes are kept.
    None,
}

impl fmt::Display for ReconcileStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileStrategy::Strict => write!(f, "strict"),
            ReconcileStrategy::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown reconcile strategy {0:?} (expected \"strict\" or \"none\")")]
pub struct ParseStrategyError(pub String);

impl FromStr for ReconcileStrategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("strict") {
            Ok(ReconcileStrategy::Strict)
        } else if s.eq_ignore_ascii_case("none") {
            Ok(ReconcileStrategy::None)
        } else {
            Err(ParseStrategyError(s.to_string()))
        }
    }
}

/// Desired configuration of a managed storage service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedOcsSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconcile_strategy: Option<ReconcileStrategy>,
    /// Usable capacity, e.g. `4Ti`. Defaults to the deployer's template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_size: Option<String>,
}

impl ManagedOcsSpec {
    /// Strategy in force. An unset strategy means strict enforcement.
    pub fn effective_strategy(&self) -> ReconcileStrategy {
        self.reconcile_strategy.unwrap_or_default()
    }
}

/// Coarse state of the managed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Ready,
    Error,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Ready => write!(f, "Ready"),
            Phase::Error => write!(f, "Error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Kubernetes-style status condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    /// Last time `status` flipped. Reason or message changes leave it alone.
    pub last_transition_time: DateTime<Utc>,
}

/// Observed state of a ManagedOCS. Written only by the deployer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedOcsStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconcile_strategy: Option<ReconcileStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl ManagedOcsStatus {
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedOcs {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ManagedOcsSpec,
    #[serde(default)]
    pub status: ManagedOcsStatus,
}

impl ManagedOcs {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            ..Default::default()
        }
    }

    pub fn with_strategy(mut self, strategy: ReconcileStrategy) -> Self {
        self.spec.reconcile_strategy = Some(strategy);
        self
    }

    pub fn with_storage_size(mut self, size: impl Into<String>) -> Self {
        self.spec.storage_size = Some(size.into());
        self
    }
}

impl Resource for ManagedOcs {
    const KIND: &'static str = "ManagedOCS";

    type Spec = ManagedOcsSpec;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn spec(&self) -> &ManagedOcsSpec {
        &self.spec
    }

    fn spec_mut(&mut self) -> &mut ManagedOcsSpec {
        &mut self.spec
    }
}
