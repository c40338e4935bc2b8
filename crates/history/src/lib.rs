//! `tradeflow-history` — append-only change history with version rollback.
//!
//! Every committed mutation appends a full JSON snapshot of the entity.
//! Rollback is itself an append: restoring version N creates a new latest
//! version whose state equals N, so the audit trail never loses a step.

pub mod log;
pub mod rollback;

pub use log::{ChangeHistoryEntry, ChangeLog, EntityRef};
pub use rollback::{can_rollback, rollback_to_version, Blocker, DependencyProbe};
