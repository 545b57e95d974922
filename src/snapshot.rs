use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::commit::{Change, Commit};
use crate::error::Result;

/// The replayed state of one domain entity. `data` is an opaque domain
/// payload; the engine only tracks identity, type and deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub type_name: String,
    pub deleted_at: Option<u64>,
    pub data: Value,
}

impl Entity {
    pub fn new(id: Uuid, type_name: &str, data: Value) -> Self {
        Self { id, type_name: type_name.to_string(), deleted_at: None, data }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Materialized state of one entity as of one specific commit. Never mutated
/// in place; a newer commit replaces it with a fresh snapshot, and stale ones
/// are range-deleted when older history arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub type_name: String,
    pub entity: Entity,
    pub references: Vec<Uuid>,
    pub is_root: bool,
    pub entity_is_deleted: bool,
    pub commit_id: Uuid,
}

impl ObjectSnapshot {
    pub fn new(entity: Entity, references: Vec<Uuid>, commit: &Commit, is_root: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_id: entity.id,
            type_name: entity.type_name.clone(),
            entity_is_deleted: entity.is_deleted(),
            entity,
            references,
            is_root,
            commit_id: commit.id,
        }
    }
}

/// Domain collaborator boundary: the engine replays commits, the collaborator
/// knows what a change means for its entities.
///
/// `Create` and `FieldPatch` payloads are dispatched here; `Delete` is
/// handled by the engine itself (it stamps `deleted_at` from the commit's
/// wall time). `apply` may also delete, e.g. a patch that empties a required
/// field.
pub trait ChangeApplier {
    /// Builds the initial entity state for a `Create` change.
    fn create(&self, change: &Change, commit: &Commit) -> Result<Entity>;

    /// Applies a `FieldPatch` change to an existing entity state.
    fn apply(&self, change: &Change, entity: &mut Entity, commit: &Commit) -> Result<()>;

    /// Ids of other entities this entity points to, used for referential
    /// invalidation.
    fn references(&self, entity: &Entity) -> Vec<Uuid>;

    /// Reacts to the deletion of a referenced entity. May delete `entity` in
    /// turn (set `deleted_at`), which cascades.
    fn remove_reference(&self, entity: &mut Entity, deleted: Uuid, commit: &Commit) -> Result<()>;
}
