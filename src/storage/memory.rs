use std::collections::{BTreeMap, HashMap, HashSet};

use uuid::Uuid;

use super::{SnapshotRef, Storage};
use crate::clock::HybridTimestamp;
use crate::commit::{Commit, CommitKey};
use crate::error::{Error, Result};
use crate::snapshot::ObjectSnapshot;

/// In-memory backend, kept in lockstep with the sqlite backend for tests and
/// ephemeral scratch stores. Transactions roll back by restoring a cloned
/// state; cheap at the scale this backend is used for.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    commits: HashMap<Uuid, Commit>,
    snapshots: HashMap<Uuid, ObjectSnapshot>,
    checkpoint: Option<(HashMap<Uuid, Commit>, HashMap<Uuid, ObjectSnapshot>)>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn commit_key(&self, commit_id: Uuid) -> Result<CommitKey> {
        self.commits
            .get(&commit_id)
            .map(Commit::key)
            .ok_or_else(|| Error::Storage(format!("snapshot references unknown commit {commit_id}")))
    }

    fn commits_sorted(&self) -> Vec<&Commit> {
        let mut commits: Vec<&Commit> = self.commits.values().collect();
        commits.sort_by_key(|c| c.key());
        commits
    }
}

impl Storage for MemoryStorage {
    fn add_commit(&mut self, commit: &Commit) -> Result<()> {
        self.commits.insert(commit.id, commit.clone());
        Ok(())
    }

    fn has_commit(&self, id: Uuid) -> Result<bool> {
        Ok(self.commits.contains_key(&id))
    }

    fn known_commit_ids(&self, candidates: &[Uuid]) -> Result<Vec<Uuid>> {
        Ok(candidates
            .iter()
            .copied()
            .filter(|id| self.commits.contains_key(id))
            .collect())
    }

    fn find_commit(&self, id: Uuid) -> Result<Option<Commit>> {
        Ok(self.commits.get(&id).cloned())
    }

    fn find_commit_by_hash(&self, hash: &str) -> Result<Option<Commit>> {
        Ok(self.commits.values().find(|c| c.hash() == hash).cloned())
    }

    fn commits_up_to(&self, bound: Option<u64>) -> Result<Vec<Commit>> {
        Ok(self
            .commits_sorted()
            .into_iter()
            .filter(|c| bound.map_or(true, |b| c.timestamp.wall_ms <= b))
            .cloned()
            .collect())
    }

    fn commits_after(&self, key: CommitKey) -> Result<Vec<Commit>> {
        Ok(self
            .commits_sorted()
            .into_iter()
            .filter(|c| c.key() > key)
            .cloned()
            .collect())
    }

    fn commit_before(&self, key: CommitKey) -> Result<Option<Commit>> {
        Ok(self
            .commits_sorted()
            .into_iter()
            .filter(|c| c.key() < key)
            .next_back()
            .cloned())
    }

    fn update_commit_parent(&mut self, id: Uuid, parent_hash: &str, hash: &str) -> Result<()> {
        let commit = self
            .commits
            .get_mut(&id)
            .ok_or_else(|| Error::Storage(format!("unknown commit {id}")))?;
        commit.set_parent_hash(parent_hash)?;
        debug_assert_eq!(commit.hash(), hash);
        Ok(())
    }

    fn latest_clock(&self) -> Result<Option<HybridTimestamp>> {
        Ok(self.commits.values().map(|c| c.timestamp).max())
    }

    fn client_heads(&self, bound: Option<u64>) -> Result<BTreeMap<Uuid, HybridTimestamp>> {
        let mut heads = BTreeMap::new();
        for commit in self.commits.values() {
            if bound.is_some_and(|b| commit.timestamp.wall_ms > b) {
                continue;
            }
            let head = heads.entry(commit.client_id).or_insert(commit.timestamp);
            if commit.timestamp > *head {
                *head = commit.timestamp;
            }
        }
        Ok(heads)
    }

    fn add_snapshot(&mut self, snapshot: &ObjectSnapshot) -> Result<()> {
        self.commit_key(snapshot.commit_id)?;
        self.snapshots.insert(snapshot.id, snapshot.clone());
        Ok(())
    }

    fn has_snapshot(&self, id: Uuid) -> Result<bool> {
        Ok(self.snapshots.contains_key(&id))
    }

    fn find_snapshot(&self, id: Uuid) -> Result<Option<ObjectSnapshot>> {
        Ok(self.snapshots.get(&id).cloned())
    }

    fn current_snapshot_refs(&self, bound: Option<u64>) -> Result<Vec<SnapshotRef>> {
        let mut current: HashMap<Uuid, (CommitKey, &ObjectSnapshot)> = HashMap::new();
        for snapshot in self.snapshots.values() {
            let key = self.commit_key(snapshot.commit_id)?;
            if bound.is_some_and(|b| key.timestamp.wall_ms > b) {
                continue;
            }
            match current.get(&snapshot.entity_id) {
                Some((existing, _)) if *existing >= key => {}
                _ => {
                    current.insert(snapshot.entity_id, (key, snapshot));
                }
            }
        }

        let mut refs: Vec<SnapshotRef> = current
            .into_values()
            .map(|(key, snapshot)| {
                let commit = &self.commits[&snapshot.commit_id];
                SnapshotRef {
                    snapshot_id: snapshot.id,
                    entity_id: snapshot.entity_id,
                    commit_id: snapshot.commit_id,
                    commit_key: key,
                    commit_hash: commit.hash().to_string(),
                    is_root: snapshot.is_root,
                    entity_is_deleted: snapshot.entity_is_deleted,
                }
            })
            .collect();
        refs.sort_by_key(|r| r.commit_key);
        Ok(refs)
    }

    fn current_snapshot_for(&self, entity_id: Uuid, bound: Option<u64>) -> Result<Option<ObjectSnapshot>> {
        let mut best: Option<(CommitKey, &ObjectSnapshot)> = None;
        for snapshot in self.snapshots.values() {
            if snapshot.entity_id != entity_id {
                continue;
            }
            let key = self.commit_key(snapshot.commit_id)?;
            if bound.is_some_and(|b| key.timestamp.wall_ms > b) {
                continue;
            }
            if best.as_ref().map_or(true, |(existing, _)| key > *existing) {
                best = Some((key, snapshot));
            }
        }
        Ok(best.map(|(_, s)| s.clone()))
    }

    fn delete_snapshots_after(&mut self, key: CommitKey) -> Result<usize> {
        let stale: HashSet<Uuid> = self
            .snapshots
            .values()
            .filter(|s| {
                self.commits
                    .get(&s.commit_id)
                    .map_or(false, |c| c.key() > key)
            })
            .map(|s| s.id)
            .collect();
        for id in &stale {
            self.snapshots.remove(id);
        }
        Ok(stale.len())
    }

    fn begin_transaction(&mut self) -> Result<()> {
        if self.checkpoint.is_none() {
            self.checkpoint = Some((self.commits.clone(), self.snapshots.clone()));
        }
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<()> {
        self.checkpoint = None;
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<()> {
        if let Some((commits, snapshots)) = self.checkpoint.take() {
            self.commits = commits;
            self.snapshots = snapshots;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::Change;

    fn commit_at(wall_ms: u64, counter: u64) -> Commit {
        Commit::new(Uuid::new_v4(), HybridTimestamp::new(wall_ms, counter), vec![]).unwrap()
    }

    #[test]
    fn test_commits_ordered_by_key() {
        let mut storage = MemoryStorage::new();
        let late = commit_at(200, 0);
        let early = commit_at(100, 0);
        storage.add_commit(&late).unwrap();
        storage.add_commit(&early).unwrap();

        let commits = storage.commits_up_to(None).unwrap();
        assert_eq!(commits[0].id, early.id);
        assert_eq!(commits[1].id, late.id);
    }

    #[test]
    fn test_rollback_restores_state() {
        let mut storage = MemoryStorage::new();
        let kept = commit_at(100, 0);
        storage.add_commit(&kept).unwrap();

        storage.begin_transaction().unwrap();
        let discarded = commit_at(200, 0);
        storage.add_commit(&discarded).unwrap();
        storage.rollback_transaction().unwrap();

        assert!(storage.has_commit(kept.id).unwrap());
        assert!(!storage.has_commit(discarded.id).unwrap());
    }

    #[test]
    fn test_client_heads_take_max_per_client() {
        let mut storage = MemoryStorage::new();
        let client = Uuid::new_v4();
        let c1 = Commit::new(client, HybridTimestamp::new(100, 0), vec![]).unwrap();
        let c2 = Commit::new(client, HybridTimestamp::new(100, 5), vec![]).unwrap();
        storage.add_commit(&c1).unwrap();
        storage.add_commit(&c2).unwrap();

        let heads = storage.client_heads(None).unwrap();
        assert_eq!(heads[&client], HybridTimestamp::new(100, 5));
    }

    #[test]
    fn test_commit_changes_survive_round_trip() {
        let mut storage = MemoryStorage::new();
        let entity_id = Uuid::new_v4();
        let commit = Commit::new(
            Uuid::new_v4(),
            HybridTimestamp::new(10, 0),
            vec![Change::create(entity_id, "entry", serde_json::json!({"headword": "run"}))],
        )
        .unwrap();
        storage.add_commit(&commit).unwrap();

        let loaded = storage.find_commit(commit.id).unwrap().unwrap();
        assert_eq!(loaded.changes, commit.changes);
    }
}
