//! Status projector: derives the ManagedOCS status from one reconcile pass.

use chrono::{DateTime, Utc};
use ocs_store::{Condition, ConditionStatus, ManagedOcs, ManagedOcsStatus, Phase};

pub const RECONCILE_COMPLETE: &str = "ReconcileComplete";

pub const REASON_RECONCILED: &str = "Reconciled";
pub const REASON_INVALID_CONFIGURATION: &str = "InvalidConfiguration";

/// What the pass found out about the StorageCluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// The StorageCluster matches the policy of the effective strategy.
    Converged,
    /// The ManagedOCS spec could not be turned into a desired spec.
    InvalidConfiguration(String),
    /// The store failed; nothing is known.
    Unavailable,
}

/// Project the status `parent` should have after a pass that observed
/// `observation`.
///
/// Returns `None` when the current status is already right, so callers can
/// skip the write.
pub fn project(
    parent: &ManagedOcs,
    observation: &Observation,
    now: DateTime<Utc>,
) -> Option<ManagedOcsStatus> {
    let strategy = parent.spec.effective_strategy();
    let mut status = parent.status.clone();
    status.reconcile_strategy = Some(strategy);

    match observation {
        Observation::Converged => {
            status.phase = Some(Phase::Ready);
            status.observed_generation = Some(parent.metadata.generation);
            set_condition(
                &mut status.conditions,
                ConditionStatus::True,
                REASON_RECONCILED,
                format!("StorageCluster reconciled with strategy {strategy}"),
                now,
            );
        }
        Observation::InvalidConfiguration(message) => {
            status.phase = Some(Phase::Error);
            status.observed_generation = Some(parent.metadata.generation);
            set_condition(
                &mut status.conditions,
                ConditionStatus::False,
                REASON_INVALID_CONFIGURATION,
                message.clone(),
                now,
            );
        }
        Observation::Unavailable => {}
    }

    (status != parent.status).then_some(status)
}

fn set_condition(
    conditions: &mut Vec<Condition>,
    status: ConditionStatus,
    reason: &str,
    message: String,
    now: DateTime<Utc>,
) {
    match conditions.iter_mut().find(|c| c.type_ == RECONCILE_COMPLETE) {
        Some(existing) => {
            if existing.status != status {
                existing.status = status;
                existing.last_transition_time = now;
            }
            existing.reason = reason.to_string();
            existing.message = message;
        }
        None => conditions.push(Condition {
            type_: RECONCILE_COMPLETE.to_string(),
            status,
            reason: reason.to_string(),
            message,
            last_transition_time: now,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ocs_store::ReconcileStrategy;

    fn parent(strategy: Option<ReconcileStrategy>) -> ManagedOcs {
        let mut mocs = ManagedOcs::new("ns", "mocs");
        mocs.spec.reconcile_strategy = strategy;
        mocs.metadata.generation = 3;
        mocs
    }

    #[test]
    fn test_converged_sets_ready() {
        let now = Utc::now();
        let status = project(&parent(None), &Observation::Converged, now).unwrap();

        assert_eq!(status.reconcile_strategy, Some(ReconcileStrategy::Strict));
        assert_eq!(status.phase, Some(Phase::Ready));
        assert_eq!(status.observed_generation, Some(3));
        let cond = status.condition(RECONCILE_COMPLETE).unwrap();
        assert_eq!(cond.status, ConditionStatus::True);
        assert_eq!(cond.reason, REASON_RECONCILED);
        assert!(cond.message.contains("strict"));
        assert_eq!(cond.last_transition_time, now);
    }

    #[test]
    fn test_projection_is_idempotent() {
        let now = Utc::now();
        let mut mocs = parent(Some(ReconcileStrategy::None));
        mocs.status = project(&mocs, &Observation::Converged, now).unwrap();

        assert_eq!(
            project(&mocs, &Observation::Converged, now + Duration::seconds(30)),
            None
        );
    }

    #[test]
    fn test_unavailable_only_syncs_strategy() {
        let now = Utc::now();
        let mut mocs = parent(Some(ReconcileStrategy::Strict));
        mocs.status = project(&mocs, &Observation::Converged, now).unwrap();
        assert_eq!(project(&mocs, &Observation::Unavailable, now), None);

        mocs.spec.reconcile_strategy = Some(ReconcileStrategy::None);
        mocs.metadata.generation = 4;
        let status = project(&mocs, &Observation::Unavailable, now).unwrap();
        assert_eq!(status.reconcile_strategy, Some(ReconcileStrategy::None));
        assert_eq!(status.observed_generation, Some(3));
        assert_eq!(status.phase, Some(Phase::Ready));
    }

    #[test]
    fn test_transition_time_moves_only_on_flip() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(10);
        let t2 = t0 + Duration::seconds(20);

        let mut mocs = parent(None);
        mocs.status = project(
            &mocs,
            &Observation::InvalidConfiguration("bad size".to_string()),
            t0,
        )
        .unwrap();
        assert_eq!(mocs.status.phase, Some(Phase::Error));

        // Same status, new message: time stays
        mocs.status = project(
            &mocs,
            &Observation::InvalidConfiguration("still bad".to_string()),
            t1,
        )
        .unwrap();
        let cond = mocs.status.condition(RECONCILE_COMPLETE).unwrap();
        assert_eq!(cond.message, "still bad");
        assert_eq!(cond.last_transition_time, t0);

        mocs.status = project(&mocs, &Observation::Converged, t2).unwrap();
        let cond = mocs.status.condition(RECONCILE_COMPLETE).unwrap();
        assert_eq!(cond.status, ConditionStatus::True);
        assert_eq!(cond.last_transition_time, t2);
        assert_eq!(mocs.status.conditions.len(), 1);
    }
}
