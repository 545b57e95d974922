//! A small lexicon domain used by the engine's own tests: dictionary entries,
//! senses pointing at entries, and usage examples pointing at senses. Deleting
//! an entry cascades through its senses to their examples.

use serde_json::Value;
use uuid::Uuid;

use crate::commit::{Change, ChangeKind, Commit};
use crate::error::{Error, Result};
use crate::snapshot::{ChangeApplier, Entity};

pub const ENTRY: &str = "entry";
pub const SENSE: &str = "sense";
pub const EXAMPLE: &str = "example";

#[derive(Debug, Default)]
pub struct LexiconApplier;

fn parent_field(type_name: &str) -> Option<&'static str> {
    match type_name {
        SENSE => Some("entry_id"),
        EXAMPLE => Some("sense_id"),
        _ => None,
    }
}

fn parent_id(entity: &Entity) -> Option<Uuid> {
    let field = parent_field(&entity.type_name)?;
    entity
        .data
        .get(field)
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

impl ChangeApplier for LexiconApplier {
    fn create(&self, change: &Change, _commit: &Commit) -> Result<Entity> {
        match &change.kind {
            ChangeKind::Create { type_name, payload } => {
                Ok(Entity::new(change.entity_id, type_name, payload.clone()))
            }
            _ => Err(Error::Storage(format!(
                "change {} is not a create",
                change.id
            ))),
        }
    }

    fn apply(&self, change: &Change, entity: &mut Entity, _commit: &Commit) -> Result<()> {
        match &change.kind {
            ChangeKind::FieldPatch { payload } => {
                if let (Some(target), Some(patch)) =
                    (entity.data.as_object_mut(), payload.as_object())
                {
                    for (k, v) in patch {
                        target.insert(k.clone(), v.clone());
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn references(&self, entity: &Entity) -> Vec<Uuid> {
        parent_id(entity).into_iter().collect()
    }

    fn remove_reference(&self, entity: &mut Entity, deleted: Uuid, commit: &Commit) -> Result<()> {
        // a sense without its entry (or an example without its sense) is
        // meaningless, so the deletion cascades
        if parent_id(entity) == Some(deleted) {
            entity.deleted_at = Some(commit.timestamp.wall_ms);
        }
        Ok(())
    }
}

pub fn entry_payload(headword: &str) -> Value {
    serde_json::json!({ "headword": headword })
}

pub fn sense_payload(entry_id: Uuid, gloss: &str) -> Value {
    serde_json::json!({ "entry_id": entry_id.to_string(), "gloss": gloss })
}

pub fn example_payload(sense_id: Uuid, text: &str) -> Value {
    serde_json::json!({ "sense_id": sense_id.to_string(), "text": text })
}
