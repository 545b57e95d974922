#[cfg(feature = "sqlite")]
mod sqlite;

mod memory;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

pub use memory::MemoryStorage;

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::clock::HybridTimestamp;
use crate::commit::{Commit, CommitKey};
use crate::error::Result;
use crate::snapshot::ObjectSnapshot;

/// Lightweight view of an entity's current snapshot joined with its owning
/// commit's ordering key, enough for the replay worker to pick a base
/// without loading entity payloads.
#[derive(Debug, Clone)]
pub struct SnapshotRef {
    pub snapshot_id: Uuid,
    pub entity_id: Uuid,
    pub commit_id: Uuid,
    pub commit_key: CommitKey,
    pub commit_hash: String,
    pub is_root: bool,
    pub entity_is_deleted: bool,
}

/// Durable store for the three logical tables: commits, changes, snapshots.
///
/// Ordering everywhere is the commit key triple `(wall_ms, counter, id)`.
/// Mutating calls between `begin_transaction` and `commit_transaction` must
/// land atomically; a commit must never be observable without its changes.
pub trait Storage {
    fn add_commit(&mut self, commit: &Commit) -> Result<()>;
    fn has_commit(&self, id: Uuid) -> Result<bool>;
    /// Which of `candidates` are already stored.
    fn known_commit_ids(&self, candidates: &[Uuid]) -> Result<Vec<Uuid>>;
    fn find_commit(&self, id: Uuid) -> Result<Option<Commit>>;
    fn find_commit_by_hash(&self, hash: &str) -> Result<Option<Commit>>;
    /// All commits with `wall_ms <= bound` (unbounded when `None`), ascending,
    /// changes included.
    fn commits_up_to(&self, bound: Option<u64>) -> Result<Vec<Commit>>;
    /// Commits strictly after `key`, ascending, changes included.
    fn commits_after(&self, key: CommitKey) -> Result<Vec<Commit>>;
    /// Newest commit strictly before `key`, for parent resolution fallback.
    fn commit_before(&self, key: CommitKey) -> Result<Option<Commit>>;
    /// Persists a re-linked chain entry after a merge re-sorts history.
    fn update_commit_parent(&mut self, id: Uuid, parent_hash: &str, hash: &str) -> Result<()>;
    /// Greatest `(wall_ms, counter)` issued into this store; seeds the clock.
    fn latest_clock(&self) -> Result<Option<HybridTimestamp>>;
    /// Max hybrid timestamp per authoring client, bounded by wall time.
    fn client_heads(&self, bound: Option<u64>) -> Result<BTreeMap<Uuid, HybridTimestamp>>;

    fn add_snapshot(&mut self, snapshot: &ObjectSnapshot) -> Result<()>;
    fn has_snapshot(&self, id: Uuid) -> Result<bool>;
    fn find_snapshot(&self, id: Uuid) -> Result<Option<ObjectSnapshot>>;
    /// One ref per entity: the snapshot on the greatest commit key not
    /// exceeding `bound`.
    fn current_snapshot_refs(&self, bound: Option<u64>) -> Result<Vec<SnapshotRef>>;
    /// Current snapshot for one entity, with payload.
    fn current_snapshot_for(&self, entity_id: Uuid, bound: Option<u64>) -> Result<Option<ObjectSnapshot>>;
    /// Range-deletes every snapshot owned by a commit with key strictly
    /// greater than `key`. Returns how many were dropped.
    fn delete_snapshots_after(&mut self, key: CommitKey) -> Result<usize>;

    fn begin_transaction(&mut self) -> Result<()>;
    fn commit_transaction(&mut self) -> Result<()>;
    fn rollback_transaction(&mut self) -> Result<()>;
}
