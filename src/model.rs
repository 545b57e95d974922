use std::collections::HashMap;

use tracing::info;
use uuid::Uuid;

use crate::clock::HybridClock;
use crate::commit::{Change, Commit};
use crate::error::{Error, Result};
use crate::repo::CommitLog;
use crate::snapshot::{ChangeApplier, Entity, ObjectSnapshot};
use crate::storage::{MemoryStorage, Storage};
use crate::sync::{sync_with, ChangesResult, SyncResults, SyncState, Syncable};
use crate::worker::SnapshotWorker;

#[cfg(feature = "sqlite")]
use crate::storage::SqliteStorage;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Re-validate the whole hash chain after every write. Costly on long
    /// histories but catches chain corruption at the write that caused it.
    pub auto_validate: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { auto_validate: true }
    }
}

/// The single entry point collaborators use: apply changes as new commits,
/// read current entity state, reconcile with peers. Owns the store's hybrid
/// clock; `&mut self` on writes serializes timestamp issuance.
pub struct DataModel<A, S: Storage> {
    log: CommitLog<S>,
    applier: A,
    client_id: Uuid,
    clock: HybridClock,
    config: EngineConfig,
}

#[cfg(feature = "sqlite")]
impl<A: ChangeApplier> DataModel<A, SqliteStorage> {
    pub fn open(path: &str, applier: A, client_id: Uuid) -> Result<Self> {
        Self::with_log(CommitLog::open(path)?, applier, client_id)
    }

    pub fn open_in_memory(applier: A, client_id: Uuid) -> Result<Self> {
        Self::with_log(CommitLog::open_in_memory()?, applier, client_id)
    }
}

impl<A: ChangeApplier> DataModel<A, MemoryStorage> {
    pub fn in_memory(applier: A, client_id: Uuid) -> Result<Self> {
        Self::with_log(CommitLog::in_memory(), applier, client_id)
    }
}

impl<A: ChangeApplier, S: Storage> DataModel<A, S> {
    /// Binds a facade to one store. The clock resumes from the newest
    /// timestamp in durable history so a reopened replica never re-issues
    /// a value it already used.
    pub fn with_log(log: CommitLog<S>, applier: A, client_id: Uuid) -> Result<Self> {
        let clock = HybridClock::resume_from(log.latest_clock()?);
        Ok(Self { log, applier, client_id, clock, config: EngineConfig::default() })
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn log(&self) -> &CommitLog<S> {
        &self.log
    }

    /// Hands the underlying log back, e.g. to rebind it to a new facade.
    pub fn into_log(self) -> CommitLog<S> {
        self.log
    }

    /// Deterministic time for tests and replay drivers.
    pub fn clock_mut(&mut self) -> &mut HybridClock {
        &mut self.clock
    }

    pub fn add_change(&mut self, change: Change) -> Result<Commit> {
        self.add_changes(vec![change])
    }

    /// Wraps a batch of changes in one new commit stamped by this replica's
    /// clock and applies it.
    pub fn add_changes(&mut self, changes: Vec<Change>) -> Result<Commit> {
        let commit = Commit::new(self.client_id, self.clock.next(), changes)?;
        self.add(commit.clone())?;
        Ok(commit)
    }

    /// Applies one commit. A commit already in the log is a no-op.
    pub fn add(&mut self, commit: Commit) -> Result<()> {
        if self.log.has_commit(commit.id)? {
            return Ok(());
        }
        let applier = &self.applier;
        let validate = self.config.auto_validate;
        self.log.transaction(|log| {
            log.add_commits(std::slice::from_ref(&commit))?;
            update_snapshots(log, applier, &commit)?;
            if validate {
                validate_chain(log)?;
            }
            Ok(())
        })
    }

    /// Applies a batch of commits from any source, ignoring the ones already
    /// known and invalidating snapshots back to the oldest new arrival.
    pub fn add_range(&mut self, commits: Vec<Commit>) -> Result<()> {
        self.add_range_inner(commits, false)
    }

    fn add_range_inner(&mut self, commits: Vec<Commit>, force_validate: bool) -> Result<()> {
        let filtered = self.log.filter_existing(commits)?;
        let Some(oldest) = filtered.oldest else {
            return Ok(());
        };
        info!(count = filtered.new_commits.len(), oldest = %oldest.id, "applying commit batch");
        let applier = &self.applier;
        let validate = self.config.auto_validate || force_validate;
        self.log.transaction(|log| {
            log.add_commits(&filtered.new_commits)?;
            update_snapshots(log, applier, &oldest)?;
            if validate {
                validate_chain(log)?;
            }
            Ok(())
        })
    }

    /// Walks the whole history in total order checking that every commit's
    /// hash and parent link match its predecessor.
    pub fn validate_commits(&self) -> Result<()> {
        validate_chain(&self.log)
    }

    /// Current state of one entity, or `None` if it never existed. Deleted
    /// entities are still returned, with `deleted_at` set.
    pub fn get_latest(&self, entity_id: Uuid) -> Result<Option<Entity>> {
        Ok(self.log.current_snapshot_for(entity_id, None)?.map(|s| s.entity))
    }

    pub fn get_latest_snapshot(&self, entity_id: Uuid) -> Result<Option<ObjectSnapshot>> {
        self.log.current_snapshot_for(entity_id, None)
    }

    /// Current live entities of one type.
    pub fn get_latest_objects(&self, type_name: &str) -> Result<Vec<Entity>> {
        Ok(self
            .log
            .current_snapshots(None)?
            .into_iter()
            .filter(|s| s.type_name == type_name && !s.entity_is_deleted)
            .map(|s| s.entity)
            .collect())
    }

    /// State of one entity as it was at `as_of` wall time, reconstructed by
    /// replay where no retained snapshot lands exactly there.
    pub fn get_entity_at(&mut self, as_of: u64, entity_id: Uuid) -> Result<Option<ObjectSnapshot>> {
        Ok(self.get_snapshots_at(as_of)?.remove(&entity_id))
    }

    pub fn get_snapshots_at(&mut self, as_of: u64) -> Result<HashMap<Uuid, ObjectSnapshot>> {
        SnapshotWorker::snapshots_at(&mut self.log, &self.applier, as_of)
    }

    /// Pull-then-push reconciliation against one peer.
    pub fn sync_with<R: Syncable>(&mut self, remote: &mut R) -> Result<SyncResults> {
        sync_with(self, remote)
    }
}

fn update_snapshots<A: ChangeApplier, S: Storage>(
    log: &mut CommitLog<S>,
    applier: &A,
    oldest_added: &Commit,
) -> Result<()> {
    log.delete_stale_snapshots(oldest_added)?;
    SnapshotWorker::update_snapshots(log, applier)
}

fn validate_chain<S: Storage>(log: &CommitLog<S>) -> Result<()> {
    let mut expected_parent = String::new();
    for commit in log.current_commits(None)? {
        let expected_hash = commit.generate_hash(&expected_parent)?;
        if commit.hash() != expected_hash || commit.parent_hash() != expected_parent {
            return Err(Error::BrokenChain {
                commit_id: commit.id,
                parent_hash: commit.parent_hash().to_string(),
                expected_parent,
            });
        }
        expected_parent = commit.hash().to_string();
    }
    Ok(())
}

impl<A: ChangeApplier, S: Storage> Syncable for DataModel<A, S> {
    fn sync_state(&mut self) -> Result<SyncState> {
        self.log.sync_state(None)
    }

    fn changes_for(&mut self, remote_state: &SyncState) -> Result<ChangesResult> {
        self.log.changes_for(remote_state)
    }

    fn add_range_from_sync(&mut self, commits: Vec<Commit>) -> Result<()> {
        // advance past every remote timestamp so local commits issued after
        // this sync sort after everything just received
        self.clock.observe_all(commits.iter().map(|c| c.timestamp));
        self.add_range_inner(commits, true)
    }
}
