//! Audit trail of the deployer's decisions.
//!
//! Events are logged via tracing with `target: "audit"`. Repeats of the same
//! event for the same object are folded into one record in a bounded LRU so a
//! failing object that is retried every few seconds does not flood the log.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use lru::LruCache;
use ocs_store::{ObjectKey, ReconcileStrategy};

const DEFAULT_CAPACITY: NonZeroUsize = NonZeroUsize::new(128).unwrap();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Audit,
    Warn,
    Error,
}

/// One aggregated audit event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub level: LogLevel,
    pub object: String,
    pub reason: &'static str,
    pub message: String,
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Deployer audit logger
pub struct DeployerAuditLogger {
    records: Mutex<LruCache<(String, &'static str), AuditRecord>>,
}

impl DeployerAuditLogger {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            records: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn log(&self, level: LogLevel, object: &ObjectKey, reason: &'static str, message: String) {
        let object = object.to_string();

        let count = {
            let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            let now = Utc::now();
            match records.get_mut(&(object.clone(), reason)) {
                Some(record) => {
                    record.level = level;
                    record.message = message.clone();
                    record.count += 1;
                    record.last_seen = now;
                    record.count
                }
                None => {
                    records.put(
                        (object.clone(), reason),
                        AuditRecord {
                            level,
                            object: object.clone(),
                            reason,
                            message: message.clone(),
                            count: 1,
                            first_seen: now,
                            last_seen: now,
                        },
                    );
                    1
                }
            }
        };

        match level {
            LogLevel::Error => {
                tracing::error!(target: "audit", object = %object, reason, count, "{}", message)
            }
            LogLevel::Warn => {
                tracing::warn!(target: "audit", object = %object, reason, count, "{}", message)
            }
            LogLevel::Audit | LogLevel::Info => {
                tracing::info!(target: "audit", object = %object, reason, count, "{}", message)
            }
        }
    }

    // StorageCluster events
    pub fn storage_cluster_created(&self, parent: &ObjectKey, storage_cluster: &ObjectKey) {
        self.log(
            LogLevel::Audit,
            parent,
            "StorageClusterCreated",
            format!("StorageCluster created: {}", storage_cluster),
        );
    }

    pub fn drift_corrected(&self, parent: &ObjectKey, storage_cluster: &ObjectKey, generation: u64) {
        self.log(
            LogLevel::Audit,
            parent,
            "DriftCorrected",
            format!(
                "StorageCluster spec reverted: {} (generation {})",
                storage_cluster, generation
            ),
        );
    }

    pub fn drift_tolerated(&self, parent: &ObjectKey, storage_cluster: &ObjectKey) {
        self.log(
            LogLevel::Info,
            parent,
            "DriftTolerated",
            format!(
                "StorageCluster spec differs, left as is under strategy none: {}",
                storage_cluster
            ),
        );
    }

    // ManagedOCS events
    pub fn strategy_changed(
        &self,
        parent: &ObjectKey,
        old: Option<ReconcileStrategy>,
        new: ReconcileStrategy,
    ) {
        let old = old.map_or_else(|| "unset".to_string(), |s| s.to_string());
        self.log(
            LogLevel::Audit,
            parent,
            "StrategyChanged",
            format!("Reconcile strategy changed: {} -> {}", old, new),
        );
    }

    pub fn reconcile_failed(&self, parent: &ObjectKey, error: &dyn std::error::Error, transient: bool) {
        let (level, reason) = if transient {
            (LogLevel::Warn, "ReconcileRetrying")
        } else {
            (LogLevel::Error, "ReconcileFailed")
        };
        self.log(level, parent, reason, format!("Reconcile failed: {}", error));
    }

    /// Aggregated records, most recently seen first.
    pub fn recent(&self) -> Vec<AuditRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.iter().map(|(_, r)| r.clone()).collect()
    }

    /// Records at warn level or above, most recently seen first.
    pub fn warnings(&self) -> Vec<AuditRecord> {
        self.recent()
            .into_iter()
            .filter(|r| matches!(r.level, LogLevel::Warn | LogLevel::Error))
            .collect()
    }
}

impl Default for DeployerAuditLogger {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeats_are_aggregated() {
        let audit = DeployerAuditLogger::default();
        let parent = ObjectKey::new("ns", "mocs");
        let sc = ObjectKey::new("ns", "ocs-storagecluster");

        audit.drift_corrected(&parent, &sc, 2);
        audit.drift_corrected(&parent, &sc, 3);
        audit.storage_cluster_created(&parent, &sc);

        let recent = audit.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].reason, "StorageClusterCreated");
        assert_eq!(recent[1].reason, "DriftCorrected");
        assert_eq!(recent[1].count, 2);
        assert!(recent[1].message.contains("generation 3"));
        assert!(recent[1].first_seen <= recent[1].last_seen);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let audit = DeployerAuditLogger::new(NonZeroUsize::new(2).unwrap());
        for name in ["a", "b", "c"] {
            audit.strategy_changed(
                &ObjectKey::new("ns", name),
                None,
                ReconcileStrategy::Strict,
            );
        }

        let objects: Vec<_> = audit.recent().into_iter().map(|r| r.object).collect();
        assert_eq!(objects, vec!["ns/c".to_string(), "ns/b".to_string()]);
    }

    #[test]
    fn test_warnings_filter() {
        let audit = DeployerAuditLogger::default();
        let parent = ObjectKey::new("ns", "mocs");
        let err = std::io::Error::other("store down");

        audit.strategy_changed(&parent, Some(ReconcileStrategy::Strict), ReconcileStrategy::None);
        audit.reconcile_failed(&parent, &err, true);

        let warnings = audit.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, LogLevel::Warn);
        assert_eq!(warnings[0].reason, "ReconcileRetrying");
        assert!(warnings[0].message.contains("store down"));
    }
}
