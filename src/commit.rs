use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use xxhash_rust::xxh64::xxh64;

use crate::clock::HybridTimestamp;
use crate::error::{Error, Result};

/// Total order key for commits: `(wall_ms, counter, id)` ascending. The
/// random commit id is the final tiebreak, so the order is total and
/// deterministic across replicas even when hybrid timestamps collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitKey {
    pub timestamp: HybridTimestamp,
    pub commit_id: Uuid,
}

impl CommitKey {
    pub fn new(timestamp: HybridTimestamp, commit_id: Uuid) -> Self {
        Self { timestamp, commit_id }
    }
}

/// One polymorphic mutation applied to exactly one domain entity. The domain
/// payload is opaque to the engine; the collaborator's applier interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: Uuid,
    pub commit_id: Uuid,
    pub entity_id: Uuid,
    pub kind: ChangeKind,
}

/// The discriminator serializes first so peers can dispatch on it before
/// reading the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ChangeKind {
    Create { type_name: String, payload: Value },
    Delete,
    FieldPatch { payload: Value },
}

impl Change {
    pub fn create(entity_id: Uuid, type_name: &str, payload: Value) -> Self {
        Self::with_kind(entity_id, ChangeKind::Create { type_name: type_name.to_string(), payload })
    }

    pub fn delete(entity_id: Uuid) -> Self {
        Self::with_kind(entity_id, ChangeKind::Delete)
    }

    pub fn field_patch(entity_id: Uuid, payload: Value) -> Self {
        Self::with_kind(entity_id, ChangeKind::FieldPatch { payload })
    }

    fn with_kind(entity_id: Uuid, kind: ChangeKind) -> Self {
        Self { id: Uuid::new_v4(), commit_id: Uuid::nil(), entity_id, kind }
    }
}

/// An immutable, hash-chained unit of history: an ordered batch of entity
/// changes authored by one client, linked to its causal predecessor by hash.
///
/// `hash` is a pure function of `(id, parent_hash)` and is recomputed
/// whenever the parent link is (re)assigned; it is never mutated otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub id: Uuid,
    pub client_id: Uuid,
    pub timestamp: HybridTimestamp,
    hash: String,
    parent_hash: String,
    pub changes: Vec<Change>,
}

impl Commit {
    /// Builds an unlinked commit: `parent_hash` is empty (root form) until
    /// the replay worker links it into the chain. Back-fills each change's
    /// `commit_id`.
    pub fn new(client_id: Uuid, timestamp: HybridTimestamp, changes: Vec<Change>) -> Result<Self> {
        let id = Uuid::new_v4();
        let mut commit = Self {
            id,
            client_id,
            timestamp,
            hash: String::new(),
            parent_hash: String::new(),
            changes,
        };
        commit.hash = commit.generate_hash("")?;
        for change in &mut commit.changes {
            change.commit_id = id;
        }
        Ok(commit)
    }

    pub fn key(&self) -> CommitKey {
        CommitKey::new(self.timestamp, self.id)
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn parent_hash(&self) -> &str {
        &self.parent_hash
    }

    /// Links this commit under `parent_hash` and recomputes `hash`. Called
    /// when a commit is first chained and again when a merge re-sorts
    /// history underneath it.
    pub fn set_parent_hash(&mut self, parent_hash: &str) -> Result<()> {
        self.hash = self.generate_hash(parent_hash)?;
        self.parent_hash = parent_hash.to_string();
        Ok(())
    }

    /// xxHash64 over the 16 raw id bytes followed by the decoded parent
    /// digest; a root commit hashes over the id bytes alone. Fast integrity
    /// bookkeeping, not a security boundary.
    pub fn generate_hash(&self, parent_hash: &str) -> Result<String> {
        let parent_bytes = decode_digest(parent_hash)?;
        let mut buf = Vec::with_capacity(16 + parent_bytes.len());
        buf.extend_from_slice(self.id.as_bytes());
        buf.extend_from_slice(&parent_bytes);
        Ok(hex::encode_upper(xxh64(&buf, 0).to_be_bytes()))
    }

    /// Ingest gate: a commit whose stored hash is not reproducible from its
    /// own `(id, parent_hash)` is rejected outright.
    pub fn verify_hash(&self) -> Result<()> {
        let expected = self.generate_hash(&self.parent_hash)?;
        if self.hash != expected {
            return Err(Error::HashMismatch {
                commit_id: self.id,
                expected,
                actual: self.hash.clone(),
            });
        }
        Ok(())
    }

    /// Rebuilds a commit from persisted columns; storage backends only.
    pub(crate) fn from_parts(
        id: Uuid,
        client_id: Uuid,
        timestamp: HybridTimestamp,
        hash: String,
        parent_hash: String,
        changes: Vec<Change>,
    ) -> Self {
        Self { id, client_id, timestamp, hash, parent_hash, changes }
    }
}

fn decode_digest(digest: &str) -> Result<Vec<u8>> {
    hex::decode(digest).map_err(|source| Error::InvalidDigest {
        digest: digest.to_string(),
        source,
    })
}
