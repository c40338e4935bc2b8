use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tradeflow_core::{DomainError, DomainResult, EntityKind, UserId};

/// Scope of one history stream: entity kind plus its identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: Uuid,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<Uuid>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl core::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// One committed version of an entity: full snapshot plus audit fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeHistoryEntry {
    pub entity: EntityRef,
    /// Position in the stream, starting at 1, gap-free.
    pub version: u64,
    pub snapshot: serde_json::Value,
    pub changed_by: UserId,
    pub changed_at: DateTime<Utc>,
    /// Present on destructive or overriding changes (cancel, void,
    /// rollback, credit override).
    pub change_reason: Option<String>,
}

/// In-memory append-only change log, one stream per entity.
#[derive(Debug, Default)]
pub struct ChangeLog {
    streams: RwLock<HashMap<EntityRef, Vec<ChangeHistoryEntry>>>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[ChangeHistoryEntry]) -> u64 {
        stream.last().map(|e| e.version).unwrap_or(0)
    }

    /// Append a snapshot as the next version of the entity's stream and
    /// return the assigned version.
    pub fn record(
        &self,
        entity: EntityRef,
        snapshot: serde_json::Value,
        changed_by: UserId,
        changed_at: DateTime<Utc>,
        change_reason: Option<String>,
    ) -> DomainResult<u64> {
        let mut streams = self
            .streams
            .write()
            .map_err(|_| DomainError::concurrency_conflict("change log lock poisoned"))?;
        let stream = streams.entry(entity).or_default();
        let version = Self::current_version(stream) + 1;
        stream.push(ChangeHistoryEntry {
            entity,
            version,
            snapshot,
            changed_by,
            changed_at,
            change_reason,
        });
        Ok(version)
    }

    /// Full stream for an entity, oldest first. Validates the invariant the
    /// store is built on: versions are gap-free from 1.
    pub fn entries(&self, entity: EntityRef) -> DomainResult<Vec<ChangeHistoryEntry>> {
        let streams = self
            .streams
            .read()
            .map_err(|_| DomainError::concurrency_conflict("change log lock poisoned"))?;
        let stream = streams.get(&entity).cloned().unwrap_or_default();
        validate_stream(&stream)?;
        Ok(stream)
    }

    pub fn latest_version(&self, entity: EntityRef) -> DomainResult<u64> {
        let streams = self
            .streams
            .read()
            .map_err(|_| DomainError::concurrency_conflict("change log lock poisoned"))?;
        Ok(streams
            .get(&entity)
            .map(|s| Self::current_version(s))
            .unwrap_or(0))
    }

    pub fn snapshot_at(
        &self,
        entity: EntityRef,
        version: u64,
    ) -> DomainResult<Option<ChangeHistoryEntry>> {
        let streams = self
            .streams
            .read()
            .map_err(|_| DomainError::concurrency_conflict("change log lock poisoned"))?;
        Ok(streams
            .get(&entity)
            .and_then(|s| s.iter().find(|e| e.version == version).cloned()))
    }
}

/// Versions must run 1, 2, 3, ... with no gaps or duplicates.
pub(crate) fn validate_stream(stream: &[ChangeHistoryEntry]) -> DomainResult<()> {
    for (idx, entry) in stream.iter().enumerate() {
        let expected = idx as u64 + 1;
        if entry.version != expected {
            return Err(DomainError::validation(format!(
                "corrupt history stream for {}: expected version {expected}, found {}",
                entry.entity, entry.version
            )));
        }
    }
    Ok(())
}
