use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::commit::{Change, ChangeKind, Commit, CommitKey};
use crate::error::{Error, Result};
use crate::repo::CommitLog;
use crate::snapshot::{ChangeApplier, ObjectSnapshot};
use crate::storage::{SnapshotRef, Storage};

/// Replays commits onto entity snapshots: picks up each entity at its current
/// snapshot, applies every change after that point in total order, re-links
/// the hash chain when a merge has re-sorted history, and persists the new
/// current snapshot per entity.
///
/// Holds mutable replay state; build one per replay pass, don't reuse.
pub struct SnapshotWorker<'a, A, S: Storage> {
    log: &'a mut CommitLog<S>,
    applier: &'a A,
    base: HashMap<Uuid, SnapshotRef>,
    oldest_base: Option<CommitKey>,
    oldest_base_hash: Option<String>,
    pending: HashMap<Uuid, ObjectSnapshot>,
    intermediates: Vec<ObjectSnapshot>,
}

impl<'a, A: ChangeApplier, S: Storage> SnapshotWorker<'a, A, S> {
    fn bounded(log: &'a mut CommitLog<S>, applier: &'a A, as_of: Option<u64>) -> Result<Self> {
        // refs come back ascending by commit key, so the first is the oldest
        let refs = log.current_snapshot_refs(as_of)?;
        let oldest = refs.first();
        let oldest_base = oldest.map(|r| r.commit_key);
        let oldest_base_hash = oldest.map(|r| r.commit_hash.clone());
        let base = refs.iter().map(|r| (r.entity_id, r.clone())).collect();
        Ok(Self {
            log,
            applier,
            base,
            oldest_base,
            oldest_base_hash,
            pending: HashMap::new(),
            intermediates: Vec::new(),
        })
    }

    /// Brings every entity's current snapshot up to the head of history,
    /// rewriting the hash chain along the way. The replay window starts at
    /// the oldest current snapshot because entities behind it may still be
    /// missing changes that predate the newest arrivals.
    pub fn update_snapshots(log: &'a mut CommitLog<S>, applier: &'a A) -> Result<()> {
        let mut worker = Self::bounded(log, applier, None)?;
        let commits = match worker.oldest_base {
            Some(key) => worker.log.commits_after_key(key)?,
            None => worker.log.commits_after(None)?,
        };
        worker.apply_commit_changes(&commits, true)?;
        worker.persist()
    }

    /// Reconstructs every entity's state as of `as_of` wall time, without
    /// persisting anything. Needed because intermediate snapshots are only
    /// retained sparsely; the gaps are filled by replaying.
    pub fn snapshots_at(
        log: &'a mut CommitLog<S>,
        applier: &'a A,
        as_of: u64,
    ) -> Result<HashMap<Uuid, ObjectSnapshot>> {
        let mut worker = Self::bounded(log, applier, Some(as_of))?;
        let commits: Vec<Commit> = worker
            .log
            .current_commits(Some(as_of))?
            .into_iter()
            .filter(|c| worker.oldest_base.map_or(true, |key| c.key() > key))
            .collect();
        worker.apply_commit_changes(&commits, false)?;

        let mut result = HashMap::new();
        for r in worker.base.values() {
            if let Some(snapshot) = worker.log.find_snapshot(r.snapshot_id)? {
                result.insert(r.entity_id, snapshot);
            }
        }
        result.extend(worker.pending.drain());
        Ok(result)
    }

    fn persist(&mut self) -> Result<()> {
        // intermediates go first: the last snapshot written per entity is the
        // one projections pick up
        let intermediates = std::mem::take(&mut self.intermediates);
        self.log.add_snapshots(&intermediates)?;
        let finals: Vec<ObjectSnapshot> = self.pending.drain().map(|(_, s)| s).collect();
        self.log.add_snapshots(&finals)?;
        Ok(())
    }

    fn apply_commit_changes(&mut self, commits: &[Commit], update_hash: bool) -> Result<()> {
        let mut previous_hash = self.oldest_base_hash.clone();
        for (index, stored) in commits.iter().enumerate() {
            let mut commit = stored.clone();
            if update_hash {
                if let Some(prev) = &previous_hash {
                    if commit.parent_hash() != prev.as_str() {
                        // history was re-sorted underneath this commit
                        commit.set_parent_hash(prev)?;
                        self.log
                            .update_commit_parent(commit.id, commit.parent_hash(), commit.hash())?;
                        debug!(commit_id = %commit.id, "re-linked commit after merge");
                    }
                }
            }
            previous_hash = Some(commit.hash().to_string());

            for change in commit.changes.clone() {
                self.apply_change(&change, &commit, index + 1)?;
            }
        }
        Ok(())
    }

    fn apply_change(&mut self, change: &Change, commit: &Commit, commit_index: usize) -> Result<()> {
        let entity_id = change.entity_id;
        // already folded into this entity's snapshot: the replay window is
        // sized for the entity furthest behind, so entities ahead of it see
        // commits they already incorporated
        if let Some(base) = self.base.get(&entity_id) {
            if commit.key() < base.commit_key {
                return Ok(());
            }
        }

        let snapshot = self.entity_snapshot(entity_id)?;
        let has_been_applied = snapshot.as_ref().is_some_and(|s| s.commit_id == commit.id);

        let (mut entity, was_deleted) = match &snapshot {
            Some(s) => (s.entity.clone(), s.entity.is_deleted()),
            None => match &change.kind {
                ChangeKind::Create { .. } => (self.applier.create(change, commit)?, false),
                _ => {
                    warn!(%entity_id, commit_id = %commit.id, "change targets unknown entity, skipping");
                    return Ok(());
                }
            },
        };

        match &change.kind {
            // a replayed create on an existing entity carries no new state
            ChangeKind::Create { .. } => {}
            ChangeKind::Delete => entity.deleted_at = Some(commit.timestamp.wall_ms),
            ChangeKind::FieldPatch { .. } => self.applier.apply(change, &mut entity, commit)?,
        }

        let deleted_by_change = !was_deleted && entity.is_deleted();
        if deleted_by_change {
            self.mark_deleted(entity.id, commit)?;
        }
        // re-applied only for its deletion side effects; the snapshot for
        // this commit already exists
        if has_been_applied {
            return Ok(());
        }

        if let Some(prior) = &snapshot {
            // sparse retention: keep the root and every other superseded
            // snapshot so point-in-time reads have nearby bases to replay from
            if prior.is_root || commit_index % 2 == 0 {
                self.intermediates.push(prior.clone());
            }
        }

        let references = self.applier.references(&entity);
        let is_root = snapshot.is_none();
        self.pending
            .insert(entity_id, ObjectSnapshot::new(entity, references, commit, is_root));
        Ok(())
    }

    /// Removes references to a deleted entity from every entity still
    /// pointing at it. Removing a reference may itself delete the referrer,
    /// which cascades.
    fn mark_deleted(&mut self, deleted_id: Uuid, commit: &Commit) -> Result<()> {
        let mut referencing: HashSet<Uuid> = HashSet::new();
        for snapshot in self.log.current_snapshots(None)? {
            if snapshot.references.contains(&deleted_id) {
                referencing.insert(snapshot.entity_id);
            }
        }
        // persisted snapshots may be behind the replay; pending state wins
        for snapshot in self.pending.values() {
            if snapshot.references.contains(&deleted_id) {
                referencing.insert(snapshot.entity_id);
            }
        }

        for entity_id in referencing {
            let snapshot = self
                .entity_snapshot(entity_id)?
                .ok_or(Error::SnapshotNotFound(entity_id))?;
            // an earlier cascade step may already have dropped the reference
            if !snapshot.references.contains(&deleted_id) {
                continue;
            }
            let has_been_applied = snapshot.commit_id == commit.id;
            let mut entity = snapshot.entity.clone();
            let was_deleted = entity.is_deleted();

            self.applier.remove_reference(&mut entity, deleted_id, commit)?;
            let deleted_by_remove = !was_deleted && entity.is_deleted();

            if !has_been_applied {
                let references = self.applier.references(&entity);
                self.pending
                    .insert(entity_id, ObjectSnapshot::new(entity, references, commit, false));
            }
            // recurse only after the updated snapshot is pending, otherwise
            // mutual references could loop
            if deleted_by_remove {
                self.mark_deleted(entity_id, commit)?;
            }
        }
        Ok(())
    }

    fn entity_snapshot(&self, entity_id: Uuid) -> Result<Option<ObjectSnapshot>> {
        if let Some(snapshot) = self.pending.get(&entity_id) {
            return Ok(Some(snapshot.clone()));
        }
        if let Some(r) = self.base.get(&entity_id) {
            return self.log.find_snapshot(r.snapshot_id);
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::HybridTimestamp;
    use crate::storage::MemoryStorage;
    use crate::test_domain::{
        entry_payload, example_payload, sense_payload, LexiconApplier, ENTRY, EXAMPLE, SENSE,
    };

    fn log() -> CommitLog<MemoryStorage> {
        CommitLog::in_memory()
    }

    fn commit(wall_ms: u64, changes: Vec<Change>) -> Commit {
        Commit::new(Uuid::new_v4(), HybridTimestamp::new(wall_ms, 0), changes).unwrap()
    }

    fn apply(log: &mut CommitLog<MemoryStorage>, commits: &[Commit]) {
        log.add_commits(commits).unwrap();
        SnapshotWorker::update_snapshots(log, &LexiconApplier).unwrap();
    }

    #[test]
    fn test_create_then_patch_materializes_current_state() {
        let mut log = log();
        let applier = LexiconApplier;
        let entry_id = Uuid::new_v4();

        let c1 = commit(100, vec![Change::create(entry_id, ENTRY, entry_payload("run"))]);
        let c2 = commit(
            200,
            vec![Change::field_patch(entry_id, serde_json::json!({"headword": "ran"}))],
        );
        log.add_commits(&[c1.clone(), c2.clone()]).unwrap();
        SnapshotWorker::update_snapshots(&mut log, &applier).unwrap();

        let current = log.current_snapshot_for(entry_id, None).unwrap().unwrap();
        assert_eq!(current.commit_id, c2.id);
        assert_eq!(current.entity.data["headword"], "ran");
        assert!(!current.is_root);

        // chain was linked during replay
        let stored_c2 = log.find_commit(c2.id).unwrap().unwrap();
        assert_eq!(stored_c2.parent_hash(), c1.hash());
        stored_c2.verify_hash().unwrap();
        assert_eq!(log.find_previous_commit(&stored_c2).unwrap().unwrap().id, c1.id);
    }

    #[test]
    fn test_replay_is_idempotent() {
        let mut log = log();
        let entry_id = Uuid::new_v4();
        apply(&mut log, &[commit(100, vec![Change::create(entry_id, ENTRY, entry_payload("go"))])]);
        apply(
            &mut log,
            &[commit(200, vec![Change::field_patch(entry_id, serde_json::json!({"headword": "went"}))])],
        );

        let before: Vec<Uuid> =
            log.current_snapshots(None).unwrap().iter().map(|s| s.id).collect();
        SnapshotWorker::update_snapshots(&mut log, &LexiconApplier).unwrap();
        let after: Vec<Uuid> =
            log.current_snapshots(None).unwrap().iter().map(|s| s.id).collect();

        assert_eq!(before, after);
    }

    #[test]
    fn test_out_of_order_commit_rewrites_history() {
        let mut log = log();
        let applier = LexiconApplier;
        let entry_id = Uuid::new_v4();

        let c1 = commit(200, vec![Change::create(entry_id, ENTRY, entry_payload("walk"))]);
        let c2 = commit(
            300,
            vec![Change::field_patch(entry_id, serde_json::json!({"headword": "walked"}))],
        );
        apply(&mut log, &[c1.clone(), c2.clone()]);

        // an earlier divergent create arrives from a peer
        let c0 = commit(100, vec![Change::create(entry_id, ENTRY, entry_payload("wok"))]);
        let filtered = log.filter_existing(vec![c0.clone()]).unwrap();
        log.add_commits(&filtered.new_commits).unwrap();
        log.delete_stale_snapshots(filtered.oldest.as_ref().unwrap()).unwrap();
        SnapshotWorker::update_snapshots(&mut log, &applier).unwrap();

        // the full chain replays: create, create (no-op), patch
        let current = log.current_snapshot_for(entry_id, None).unwrap().unwrap();
        assert_eq!(current.commit_id, c2.id);
        assert_eq!(current.entity.data["headword"], "walked");

        // chain order is now c0 -> c1 -> c2
        let stored_c1 = log.find_commit(c1.id).unwrap().unwrap();
        let stored_c2 = log.find_commit(c2.id).unwrap().unwrap();
        let stored_c0 = log.find_commit(c0.id).unwrap().unwrap();
        assert_eq!(stored_c1.parent_hash(), stored_c0.hash());
        assert_eq!(stored_c2.parent_hash(), stored_c1.hash());
        stored_c1.verify_hash().unwrap();
        stored_c2.verify_hash().unwrap();
    }

    #[test]
    fn test_delete_cascades_through_references() {
        let mut log = log();
        let entry_id = Uuid::new_v4();
        let sense_id = Uuid::new_v4();
        let example_id = Uuid::new_v4();

        apply(
            &mut log,
            &[commit(
                100,
                vec![
                    Change::create(entry_id, ENTRY, entry_payload("bank")),
                    Change::create(sense_id, SENSE, sense_payload(entry_id, "riverside")),
                    Change::create(example_id, EXAMPLE, example_payload(sense_id, "on the bank")),
                ],
            )],
        );

        let delete = commit(200, vec![Change::delete(entry_id)]);
        apply(&mut log, std::slice::from_ref(&delete));

        for id in [entry_id, sense_id, example_id] {
            let snapshot = log.current_snapshot_for(id, None).unwrap().unwrap();
            assert!(snapshot.entity_is_deleted, "entity {id} should be deleted");
            assert_eq!(snapshot.entity.deleted_at, Some(200));
        }
    }

    #[test]
    fn test_snapshots_at_reconstructs_past_state() {
        let mut log = log();
        let entry_id = Uuid::new_v4();
        apply(
            &mut log,
            &[commit(100, vec![Change::create(entry_id, ENTRY, entry_payload("sing"))])],
        );
        apply(
            &mut log,
            &[commit(200, vec![Change::field_patch(entry_id, serde_json::json!({"headword": "sang"}))])],
        );
        apply(&mut log, &[commit(300, vec![Change::delete(entry_id)])]);

        let at_150 = SnapshotWorker::snapshots_at(&mut log, &LexiconApplier, 150).unwrap();
        assert_eq!(at_150[&entry_id].entity.data["headword"], "sing");
        assert!(!at_150[&entry_id].entity_is_deleted);

        let at_250 = SnapshotWorker::snapshots_at(&mut log, &LexiconApplier, 250).unwrap();
        assert_eq!(at_250[&entry_id].entity.data["headword"], "sang");

        let now = SnapshotWorker::snapshots_at(&mut log, &LexiconApplier, 400).unwrap();
        assert!(now[&entry_id].entity_is_deleted);
    }

    #[test]
    fn test_root_snapshot_survives_superseding() {
        let mut log = log();
        let entry_id = Uuid::new_v4();
        let c1 = commit(100, vec![Change::create(entry_id, ENTRY, entry_payload("eat"))]);
        apply(&mut log, std::slice::from_ref(&c1));
        let root = log.current_snapshot_for(entry_id, None).unwrap().unwrap();
        assert!(root.is_root);

        apply(
            &mut log,
            &[commit(200, vec![Change::field_patch(entry_id, serde_json::json!({"headword": "ate"}))])],
        );

        // superseded root is retained as an intermediate
        assert!(log.find_snapshot(root.id).unwrap().is_some());
    }
}
