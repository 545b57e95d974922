//! Optional denormalized read layer: a per-type table rebuilt from current
//! snapshots. Pure derivation, carries no invariants of its own; throw it
//! away and rebuild whenever history moves.

use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::repo::CommitLog;
use crate::storage::Storage;

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedRow {
    pub entity_id: Uuid,
    pub snapshot_id: Uuid,
    pub commit_id: Uuid,
    pub data: Value,
}

#[derive(Debug, Clone)]
pub struct ProjectedTable {
    pub type_name: String,
    pub rows: Vec<ProjectedRow>,
}

impl ProjectedTable {
    pub fn get(&self, entity_id: Uuid) -> Option<&ProjectedRow> {
        self.rows.iter().find(|r| r.entity_id == entity_id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One row per live entity of `type_name`, from its current snapshot. Rows
/// are ordered by entity id so rebuilds are deterministic.
pub fn rebuild_projection<S: Storage>(
    log: &CommitLog<S>,
    type_name: &str,
) -> Result<ProjectedTable> {
    let mut rows: Vec<ProjectedRow> = log
        .current_snapshots(None)?
        .into_iter()
        .filter(|s| s.type_name == type_name && !s.entity_is_deleted)
        .map(|s| ProjectedRow {
            entity_id: s.entity_id,
            snapshot_id: s.id,
            commit_id: s.commit_id,
            data: s.entity.data,
        })
        .collect();
    rows.sort_by_key(|r| r.entity_id);
    Ok(ProjectedTable { type_name: type_name.to_string(), rows })
}
