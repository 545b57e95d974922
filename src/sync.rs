use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::HybridTimestamp;
use crate::commit::Commit;
use crate::error::Result;

/// Compact, replica-comparable summary of known history: the greatest hybrid
/// timestamp seen per authoring client. Clocks are monotonic per client, so a
/// peer holding head `t` for client `c` has every commit `c` authored at or
/// before `t`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub client_heads: BTreeMap<Uuid, HybridTimestamp>,
}

impl SyncState {
    pub fn new(client_heads: BTreeMap<Uuid, HybridTimestamp>) -> Self {
        Self { client_heads }
    }

    /// Whether a commit authored by `client_id` at `timestamp` is already
    /// covered by this summary.
    pub fn covers(&self, client_id: Uuid, timestamp: HybridTimestamp) -> bool {
        self.client_heads
            .get(&client_id)
            .is_some_and(|head| *head >= timestamp)
    }
}

/// What one side must send the other to reach parity. `oldest_missing` is the
/// earliest divergence point by commit key and drives snapshot invalidation
/// on the receiving side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangesResult {
    pub missing_commits: Vec<Commit>,
    pub oldest_missing: Option<Commit>,
}

impl ChangesResult {
    pub fn is_empty(&self) -> bool {
        self.missing_commits.is_empty()
    }
}

/// Outcome of one `sync_with` exchange, so callers can react to exactly what
/// moved in each direction.
#[derive(Debug, Default)]
pub struct SyncResults {
    pub missing_from_local: Vec<Commit>,
    pub missing_from_remote: Vec<Commit>,
    pub is_synced: bool,
}

/// One side of the reconciliation protocol. Implemented by the local store
/// facade and by remote peers.
pub trait Syncable {
    fn sync_state(&mut self) -> Result<SyncState>;

    /// Everything this side has that `remote_state` does not cover.
    fn changes_for(&mut self, remote_state: &SyncState) -> Result<ChangesResult>;

    /// Ingest commits pushed from a peer. Must be idempotent.
    fn add_range_from_sync(&mut self, commits: Vec<Commit>) -> Result<()>;

    /// Availability gate; a transport failure is a normal `false`, never an
    /// error.
    fn should_sync(&mut self) -> bool {
        true
    }
}

/// Pull-then-push reconciliation between a local store and one peer. Both
/// directions are exchanged because either side may hold unseen commits.
pub fn sync_with<L, R>(local: &mut L, remote: &mut R) -> Result<SyncResults>
where
    L: Syncable,
    R: Syncable,
{
    if !local.should_sync() || !remote.should_sync() {
        debug!("peer unavailable, skipping sync");
        return Ok(SyncResults::default());
    }

    let local_state = local.sync_state()?;
    let remote_state = remote.sync_state()?;

    let missing_from_local = remote.changes_for(&local_state)?;
    let missing_from_remote = local.changes_for(&remote_state)?;

    debug!(
        pulled = missing_from_local.missing_commits.len(),
        pushed = missing_from_remote.missing_commits.len(),
        "exchanging commits"
    );

    if !missing_from_local.is_empty() {
        local.add_range_from_sync(missing_from_local.missing_commits.clone())?;
    }
    if !missing_from_remote.is_empty() {
        remote.add_range_from_sync(missing_from_remote.missing_commits.clone())?;
    }

    Ok(SyncResults {
        missing_from_local: missing_from_local.missing_commits,
        missing_from_remote: missing_from_remote.missing_commits,
        is_synced: true,
    })
}

/// Transport boundary for a remote peer. Keeps the engine free of any
/// concrete network stack; an HTTP client implements this against the peer's
/// exposed endpoints.
pub trait SyncTransport {
    /// Cheap reachability probe.
    fn health_check(&mut self) -> Result<()>;
    fn fetch_sync_state(&mut self) -> Result<SyncState>;
    fn fetch_changes(&mut self, local_state: &SyncState) -> Result<ChangesResult>;
    fn push_commits(&mut self, commits: Vec<Commit>) -> Result<()>;
}

const HEALTH_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

/// A remote store reachable over some transport, with a cached health probe
/// so repeated sync attempts against an unreachable peer don't hammer it.
pub struct RemotePeer<T: SyncTransport> {
    transport: T,
    health_ttl: Duration,
    last_probe: Option<(Instant, bool)>,
}

impl<T: SyncTransport> RemotePeer<T> {
    pub fn new(transport: T) -> Self {
        Self::with_health_ttl(transport, HEALTH_CACHE_TTL)
    }

    pub fn with_health_ttl(transport: T, health_ttl: Duration) -> Self {
        Self { transport, health_ttl, last_probe: None }
    }

    fn probe(&mut self) -> bool {
        if let Some((at, healthy)) = self.last_probe {
            if at.elapsed() < self.health_ttl {
                return healthy;
            }
        }
        let healthy = match self.transport.health_check() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "peer health check failed");
                false
            }
        };
        self.last_probe = Some((Instant::now(), healthy));
        healthy
    }
}

impl<T: SyncTransport> Syncable for RemotePeer<T> {
    fn sync_state(&mut self) -> Result<SyncState> {
        self.transport.fetch_sync_state()
    }

    fn changes_for(&mut self, local_state: &SyncState) -> Result<ChangesResult> {
        self.transport.fetch_changes(local_state)
    }

    fn add_range_from_sync(&mut self, commits: Vec<Commit>) -> Result<()> {
        self.transport.push_commits(commits)
    }

    fn should_sync(&mut self) -> bool {
        self.probe()
    }
}

/// A peer that never syncs. Useful where a `Syncable` is required but no
/// remote is configured.
#[derive(Debug, Default)]
pub struct NullSyncable;

impl Syncable for NullSyncable {
    fn sync_state(&mut self) -> Result<SyncState> {
        Ok(SyncState::default())
    }

    fn changes_for(&mut self, _remote_state: &SyncState) -> Result<ChangesResult> {
        Ok(ChangesResult::default())
    }

    fn add_range_from_sync(&mut self, _commits: Vec<Commit>) -> Result<()> {
        Ok(())
    }

    fn should_sync(&mut self) -> bool {
        false
    }
}
