use std::collections::HashSet;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::HybridTimestamp;
use crate::commit::{Commit, CommitKey};
use crate::error::Result;
use crate::snapshot::ObjectSnapshot;
use crate::storage::{MemoryStorage, SnapshotRef, Storage};
use crate::sync::{ChangesResult, SyncState};

#[cfg(feature = "sqlite")]
use crate::storage::SqliteStorage;

/// Outcome of screening an incoming commit batch against stored history:
/// the commits actually new to this store, plus the earliest of them by
/// sort key, which bounds snapshot invalidation.
#[derive(Debug, Default)]
pub struct FilteredCommits {
    pub new_commits: Vec<Commit>,
    pub oldest: Option<Commit>,
}

/// The durable commit log: commits, their changes, and materialized
/// snapshots, all ordered by the commit key `(wall_ms, counter, id)`.
pub struct CommitLog<S> {
    storage: S,
}

#[cfg(feature = "sqlite")]
impl CommitLog<SqliteStorage> {
    pub fn open(path: &str) -> Result<Self> {
        Ok(Self { storage: SqliteStorage::open(path)? })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { storage: SqliteStorage::open_in_memory()? })
    }
}

impl CommitLog<MemoryStorage> {
    pub fn in_memory() -> Self {
        Self { storage: MemoryStorage::new() }
    }
}

impl<S: Storage> CommitLog<S> {
    pub fn with_storage(storage: S) -> Self {
        Self { storage }
    }

    pub fn has_commit(&self, id: Uuid) -> Result<bool> {
        self.storage.has_commit(id)
    }

    /// Screens `candidates` against stored history, dropping duplicates both
    /// within the batch (first occurrence wins) and against the store.
    pub fn filter_existing(&self, candidates: Vec<Commit>) -> Result<FilteredCommits> {
        let mut seen = HashSet::new();
        let deduped: Vec<Commit> = candidates
            .into_iter()
            .filter(|c| seen.insert(c.id))
            .collect();

        let ids: Vec<Uuid> = deduped.iter().map(|c| c.id).collect();
        let known: HashSet<Uuid> = self.storage.known_commit_ids(&ids)?.into_iter().collect();

        let new_commits: Vec<Commit> =
            deduped.into_iter().filter(|c| !known.contains(&c.id)).collect();
        let oldest = new_commits.iter().min_by_key(|c| c.key()).cloned();
        Ok(FilteredCommits { new_commits, oldest })
    }

    /// Durable append. Every commit must pass the hash self-consistency gate
    /// before anything is written.
    pub fn add_commits(&mut self, commits: &[Commit]) -> Result<()> {
        for commit in commits {
            commit.verify_hash()?;
        }
        for commit in commits {
            self.storage.add_commit(commit)?;
        }
        Ok(())
    }

    /// Invalidation: commits arriving in the past poison every snapshot
    /// computed from history at or after their position. Deletes broadly
    /// here; replay narrows the recomputation afterwards.
    pub fn delete_stale_snapshots(&mut self, oldest: &Commit) -> Result<usize> {
        let dropped = self.storage.delete_snapshots_after(oldest.key())?;
        if dropped > 0 {
            warn!(
                dropped,
                oldest_commit = %oldest.id,
                "invalidated snapshots newer than incoming commit"
            );
        }
        Ok(dropped)
    }

    /// All commits visible at `as_of` wall time (unbounded when `None`),
    /// ascending by commit key, changes included.
    pub fn current_commits(&self, as_of: Option<u64>) -> Result<Vec<Commit>> {
        self.storage.commits_up_to(as_of)
    }

    /// The current snapshot of every entity visible at `as_of`, payloads
    /// included, ascending by owning commit key.
    pub fn current_snapshots(&self, as_of: Option<u64>) -> Result<Vec<ObjectSnapshot>> {
        let refs = self.storage.current_snapshot_refs(as_of)?;
        let mut snapshots = Vec::with_capacity(refs.len());
        for r in refs {
            if let Some(snapshot) = self.storage.find_snapshot(r.snapshot_id)? {
                snapshots.push(snapshot);
            }
        }
        Ok(snapshots)
    }

    pub fn current_snapshot_refs(&self, as_of: Option<u64>) -> Result<Vec<SnapshotRef>> {
        self.storage.current_snapshot_refs(as_of)
    }

    pub fn current_snapshot_for(
        &self,
        entity_id: Uuid,
        as_of: Option<u64>,
    ) -> Result<Option<ObjectSnapshot>> {
        self.storage.current_snapshot_for(entity_id, as_of)
    }

    pub fn find_snapshot(&self, id: Uuid) -> Result<Option<ObjectSnapshot>> {
        self.storage.find_snapshot(id)
    }

    pub fn find_commit(&self, id: Uuid) -> Result<Option<Commit>> {
        self.storage.find_commit(id)
    }

    pub fn find_commit_by_hash(&self, hash: &str) -> Result<Option<Commit>> {
        self.storage.find_commit_by_hash(hash)
    }

    /// Resolves a commit's predecessor: by parent hash when one is recorded,
    /// otherwise the sort-key predecessor. The fallback covers commits synced
    /// from sources that never linked a chain.
    pub fn find_previous_commit(&self, commit: &Commit) -> Result<Option<Commit>> {
        if !commit.parent_hash().is_empty() {
            if let Some(parent) = self.storage.find_commit_by_hash(commit.parent_hash())? {
                return Ok(Some(parent));
            }
        }
        self.storage.commit_before(commit.key())
    }

    /// Commits strictly after `after` in the total order, ascending, for
    /// incremental replay. `None` replays from the beginning.
    pub fn commits_after(&self, after: Option<&Commit>) -> Result<Vec<Commit>> {
        match after {
            Some(commit) => self.storage.commits_after(commit.key()),
            None => self.storage.commits_up_to(None),
        }
    }

    pub fn commits_after_key(&self, key: CommitKey) -> Result<Vec<Commit>> {
        self.storage.commits_after(key)
    }

    /// Idempotent per snapshot id; a snapshot already tracked is skipped.
    pub fn add_snapshots(&mut self, snapshots: &[ObjectSnapshot]) -> Result<()> {
        for snapshot in snapshots {
            if self.storage.has_snapshot(snapshot.id)? {
                debug!(snapshot_id = %snapshot.id, "snapshot already tracked, skipping");
                continue;
            }
            self.storage.add_snapshot(snapshot)?;
        }
        Ok(())
    }

    pub(crate) fn update_commit_parent(
        &mut self,
        id: Uuid,
        parent_hash: &str,
        hash: &str,
    ) -> Result<()> {
        self.storage.update_commit_parent(id, parent_hash, hash)
    }

    /// Greatest hybrid timestamp issued into this store, for seeding the
    /// clock on reopen.
    pub fn latest_clock(&self) -> Result<Option<HybridTimestamp>> {
        self.storage.latest_clock()
    }

    /// Summarize local history for a peer: max hybrid timestamp per
    /// authoring client.
    pub fn sync_state(&self, as_of: Option<u64>) -> Result<SyncState> {
        Ok(SyncState::new(self.storage.client_heads(as_of)?))
    }

    /// Everything this store has that `remote_state` does not cover,
    /// ascending by commit key.
    pub fn changes_for(&self, remote_state: &SyncState) -> Result<ChangesResult> {
        let missing_commits: Vec<Commit> = self
            .storage
            .commits_up_to(None)?
            .into_iter()
            .filter(|c| !remote_state.covers(c.client_id, c.timestamp))
            .collect();
        let oldest_missing = missing_commits.first().cloned();
        Ok(ChangesResult { missing_commits, oldest_missing })
    }

    /// Runs `f` atomically; any error rolls every write back.
    pub fn transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.storage.begin_transaction()?;
        match f(self) {
            Ok(value) => {
                self.storage.commit_transaction()?;
                Ok(value)
            }
            Err(e) => {
                self.storage.rollback_transaction()?;
                Err(e)
            }
        }
    }
}
