//! ocs-deployer: keeps the StorageCluster aligned with the ManagedOCS policy.
//!
//! - Builds the desired StorageCluster spec from the ManagedOCS spec
//! - Creates the StorageCluster when it is missing
//! - Reverts external changes under the `strict` strategy, tolerates them under `none`
//! - Mirrors the enforced strategy, phase and conditions into the ManagedOCS status

pub mod audit;
pub mod controller;
pub mod desired;
pub mod reconciler;
pub mod status;

pub use audit::{AuditRecord, DeployerAuditLogger, LogLevel};
pub use controller::{Controller, ControllerConfig, PassToken, WorkQueue};
pub use desired::{BuildError, StorageClusterTemplate};
pub use reconciler::{Action, Reconcile, ReconcileError, Reconciler, ReconcilerConfig};
