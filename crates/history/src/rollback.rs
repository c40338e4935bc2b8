//! Rollback: restore a prior version by appending it as the new latest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tradeflow_core::{DomainError, DomainResult, UserId, require_reason};

use crate::log::{ChangeHistoryEntry, ChangeLog, EntityRef};

/// A live document that depends on the entity being rolled back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blocker {
    pub entity: EntityRef,
    pub description: String,
}

impl core::fmt::Display for Blocker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} ({})", self.entity, self.description)
    }
}

/// Supplied by the engine: which non-terminal documents reference this
/// entity. Rolling back under active dependents would desync them (a GRN
/// against a rolled-back PO line, an invoice against a rolled-back order).
///
/// Blocking is deliberately version-blind: any live dependent pins the
/// entity, including one created before the target version. A dependent's
/// line references stay valid only against the entity's current shape, so
/// its creation time does not make the restore safe.
pub trait DependencyProbe {
    fn active_dependents(&self, entity: EntityRef) -> Vec<Blocker>;
}

/// Check whether `entity` can be restored to `target_version`. Returns the
/// blockers either way so callers can render them; an empty list with
/// `false` means the version does not exist.
pub fn can_rollback(
    log: &ChangeLog,
    probe: &dyn DependencyProbe,
    entity: EntityRef,
    target_version: u64,
) -> DomainResult<(bool, Vec<Blocker>)> {
    if target_version == 0 || log.snapshot_at(entity, target_version)?.is_none() {
        return Ok((false, Vec::new()));
    }
    let blockers = probe.active_dependents(entity);
    Ok((blockers.is_empty(), blockers))
}

/// Restore `entity` to `target_version`. Appends a copy of that version's
/// snapshot as the new latest entry and returns it; the caller rehydrates
/// its in-memory state from the snapshot in the same transaction.
pub fn rollback_to_version(
    log: &ChangeLog,
    probe: &dyn DependencyProbe,
    entity: EntityRef,
    target_version: u64,
    requested_by: UserId,
    requested_at: DateTime<Utc>,
    reason: &str,
) -> DomainResult<ChangeHistoryEntry> {
    let reason = require_reason(reason, "rollback")?;

    let source = log.snapshot_at(entity, target_version)?.ok_or_else(|| {
        DomainError::not_found(format!("{entity} has no version {target_version}"))
    })?;

    let blockers = probe.active_dependents(entity);
    if !blockers.is_empty() {
        let rendered = blockers
            .iter()
            .map(Blocker::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        return Err(DomainError::rollback_blocked(format!(
            "{entity} has active dependents: {rendered}"
        )));
    }

    let version = log.record(
        entity,
        source.snapshot.clone(),
        requested_by,
        requested_at,
        Some(format!("rollback to version {target_version}: {reason}")),
    )?;

    Ok(ChangeHistoryEntry {
        entity,
        version,
        snapshot: source.snapshot,
        changed_by: requested_by,
        changed_at: requested_at,
        change_reason: Some(format!("rollback to version {target_version}: {reason}")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tradeflow_core::EntityKind;
    use uuid::Uuid;

    struct NoDeps;
    impl DependencyProbe for NoDeps {
        fn active_dependents(&self, _entity: EntityRef) -> Vec<Blocker> {
            Vec::new()
        }
    }

    struct OneDep;
    impl DependencyProbe for OneDep {
        fn active_dependents(&self, _entity: EntityRef) -> Vec<Blocker> {
            vec![Blocker {
                entity: EntityRef::new(EntityKind::GoodsReceiptNote, Uuid::now_v7()),
                description: "COMPLETED".to_string(),
            }]
        }
    }

    fn seeded_log(entity: EntityRef) -> ChangeLog {
        let log = ChangeLog::new();
        log.record(entity, json!({"status": "PENDING"}), UserId::new(), Utc::now(), None)
            .unwrap();
        log.record(entity, json!({"status": "IN_TRANSIT"}), UserId::new(), Utc::now(), None)
            .unwrap();
        log
    }

    #[test]
    fn rollback_appends_rather_than_truncates() {
        let entity = EntityRef::new(EntityKind::PurchaseOrder, Uuid::now_v7());
        let log = seeded_log(entity);

        let entry = rollback_to_version(
            &log,
            &NoDeps,
            entity,
            1,
            UserId::new(),
            Utc::now(),
            "shipment never left port",
        )
        .unwrap();

        assert_eq!(entry.version, 3);
        assert_eq!(entry.snapshot, json!({"status": "PENDING"}));
        assert_eq!(log.entries(entity).unwrap().len(), 3);
    }

    #[test]
    fn active_dependents_block_rollback() {
        let entity = EntityRef::new(EntityKind::PurchaseOrder, Uuid::now_v7());
        let log = seeded_log(entity);

        let (ok, blockers) = can_rollback(&log, &OneDep, entity, 1).unwrap();
        assert!(!ok);
        assert_eq!(blockers.len(), 1);

        let err = rollback_to_version(
            &log,
            &OneDep,
            entity,
            1,
            UserId::new(),
            Utc::now(),
            "attempt",
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::RollbackBlocked(_)));
        // nothing was appended
        assert_eq!(log.latest_version(entity).unwrap(), 2);
    }

    #[test]
    fn missing_version_is_not_found() {
        let entity = EntityRef::new(EntityKind::PurchaseOrder, Uuid::now_v7());
        let log = seeded_log(entity);

        let (ok, blockers) = can_rollback(&log, &NoDeps, entity, 9).unwrap();
        assert!(!ok);
        assert!(blockers.is_empty());

        let err =
            rollback_to_version(&log, &NoDeps, entity, 9, UserId::new(), Utc::now(), "why")
                .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn rollback_requires_reason() {
        let entity = EntityRef::new(EntityKind::PurchaseOrder, Uuid::now_v7());
        let log = seeded_log(entity);
        let err =
            rollback_to_version(&log, &NoDeps, entity, 1, UserId::new(), Utc::now(), " ")
                .unwrap_err();
        assert!(matches!(err, DomainError::MissingReason(_)));
    }

    #[test]
    fn can_rollback_is_read_only() {
        let entity = EntityRef::new(EntityKind::PurchaseOrder, Uuid::now_v7());
        let log = seeded_log(entity);
        can_rollback(&log, &NoDeps, entity, 1).unwrap();
        can_rollback(&log, &NoDeps, entity, 1).unwrap();
        assert_eq!(log.latest_version(entity).unwrap(), 2);
    }
}
