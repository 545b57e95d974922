use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid hex digest {digest:?}: {source}")]
    InvalidDigest {
        digest: String,
        source: hex::FromHexError,
    },

    /// A commit arrived whose stored hash is not `hash(id, parent_hash)`.
    /// This is a hard ingest gate, never a warning.
    #[error("commit {commit_id} rejected: hash {actual} does not match expected {expected}")]
    HashMismatch {
        commit_id: Uuid,
        expected: String,
        actual: String,
    },

    #[error("commit {commit_id} breaks the chain: parent hash [{parent_hash}] != [{expected_parent}]")]
    BrokenChain {
        commit_id: Uuid,
        parent_hash: String,
        expected_parent: String,
    },

    #[error("no snapshot found for entity {0}")]
    SnapshotNotFound(Uuid),

    #[error("transport error: {0}")]
    Transport(String),
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
