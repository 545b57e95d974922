//! A CRDT commit-log engine for local-first, multi-writer data stores.
//!
//! History is an append-only log of hash-chained commits totally ordered by
//! hybrid logical timestamp. Entity state is materialized into snapshots by
//! replaying changes in that order; commits arriving out of order invalidate
//! the snapshots they predate and replay forward. Replicas reconcile through
//! a pull-then-push delta exchange keyed on per-client commit heads.

mod clock;
mod commit;
mod error;
mod model;
mod projection;
mod repo;
mod snapshot;
mod storage;
mod sync;
mod worker;

#[cfg(test)]
mod test_domain;

pub use clock::{now_millis, HybridClock, HybridTimestamp};
pub use commit::{Change, ChangeKind, Commit, CommitKey};
pub use error::{Error, Result};
pub use model::{DataModel, EngineConfig};
pub use projection::{rebuild_projection, ProjectedRow, ProjectedTable};
pub use repo::{CommitLog, FilteredCommits};
pub use snapshot::{ChangeApplier, Entity, ObjectSnapshot};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
pub use storage::{MemoryStorage, SnapshotRef, Storage};
pub use sync::{
    sync_with, ChangesResult, NullSyncable, RemotePeer, SyncResults, SyncState, SyncTransport,
    Syncable,
};
pub use worker::SnapshotWorker;
