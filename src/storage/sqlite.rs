use std::collections::{BTreeMap, HashMap};

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{SnapshotRef, Storage};
use crate::clock::HybridTimestamp;
use crate::commit::{Change, ChangeKind, Commit, CommitKey};
use crate::error::{Error, Result};
use crate::snapshot::{Entity, ObjectSnapshot};

// Uuids are stored as lowercase hyphenated text so equality and ordering in
// SQL match the in-memory byte order. Hybrid timestamps are split into two
// integer columns so the commit key `(wall_ms, counter, id)` is a plain
// composite index.
const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS commits (
    id TEXT NOT NULL,
    client_id TEXT NOT NULL,
    wall_ms INTEGER NOT NULL,
    counter INTEGER NOT NULL,
    hash TEXT NOT NULL,
    parent_hash TEXT NOT NULL,
    PRIMARY KEY (id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_commits_key ON commits(wall_ms, counter, id);
CREATE INDEX IF NOT EXISTS idx_commits_hash ON commits(hash);

CREATE TABLE IF NOT EXISTS changes (
    id TEXT NOT NULL,
    commit_id TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    kind TEXT NOT NULL,
    PRIMARY KEY (id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_changes_commit ON changes(commit_id, ordinal);

CREATE TABLE IF NOT EXISTS snapshots (
    id TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    type_name TEXT NOT NULL,
    commit_id TEXT NOT NULL,
    entity TEXT NOT NULL,
    refs TEXT NOT NULL,
    is_root INTEGER NOT NULL DEFAULT 0,
    entity_is_deleted INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_snapshots_entity ON snapshots(entity_id);
CREATE INDEX IF NOT EXISTS idx_snapshots_commit ON snapshots(commit_id);

PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
"#;

pub struct SqliteStorage {
    conn: Connection,
    in_transaction: bool,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        conn.execute_batch(INIT_SQL)?;
        Ok(Self { conn, in_transaction: false })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn load_changes(&self, commit_id: Uuid) -> Result<Vec<Change>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entity_id, kind FROM changes WHERE commit_id = ?1 ORDER BY ordinal",
        )?;
        let rows = stmt
            .query_map(params![commit_id.to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut changes = Vec::with_capacity(rows.len());
        for (id, entity_id, kind) in rows {
            let kind: ChangeKind = serde_json::from_str(&kind)?;
            changes.push(Change {
                id: parse_uuid(&id)?,
                commit_id,
                entity_id: parse_uuid(&entity_id)?,
                kind,
            });
        }
        Ok(changes)
    }

    fn hydrate_commit(&self, row: CommitRow) -> Result<Commit> {
        let id = parse_uuid(&row.id)?;
        let changes = self.load_changes(id)?;
        Ok(Commit::from_parts(
            id,
            parse_uuid(&row.client_id)?,
            HybridTimestamp::new(row.wall_ms, row.counter),
            row.hash,
            row.parent_hash,
            changes,
        ))
    }

    fn hydrate_commits(&self, rows: Vec<CommitRow>) -> Result<Vec<Commit>> {
        rows.into_iter().map(|row| self.hydrate_commit(row)).collect()
    }
}

struct CommitRow {
    id: String,
    client_id: String,
    wall_ms: u64,
    counter: u64,
    hash: String,
    parent_hash: String,
}

fn commit_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommitRow> {
    Ok(CommitRow {
        id: row.get(0)?,
        client_id: row.get(1)?,
        wall_ms: row.get(2)?,
        counter: row.get(3)?,
        hash: row.get(4)?,
        parent_hash: row.get(5)?,
    })
}

fn parse_uuid(text: &str) -> Result<Uuid> {
    Uuid::parse_str(text).map_err(|e| Error::Storage(format!("malformed uuid {text:?}: {e}")))
}

const COMMIT_COLS: &str = "id, client_id, wall_ms, counter, hash, parent_hash";

impl Storage for SqliteStorage {
    fn add_commit(&mut self, commit: &Commit) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO commits (id, client_id, wall_ms, counter, hash, parent_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                commit.id.to_string(),
                commit.client_id.to_string(),
                commit.timestamp.wall_ms,
                commit.timestamp.counter,
                commit.hash(),
                commit.parent_hash(),
            ],
        )?;
        self.conn
            .execute("DELETE FROM changes WHERE commit_id = ?1", params![commit.id.to_string()])?;
        for (ordinal, change) in commit.changes.iter().enumerate() {
            self.conn.execute(
                "INSERT INTO changes (id, commit_id, entity_id, ordinal, kind)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    change.id.to_string(),
                    commit.id.to_string(),
                    change.entity_id.to_string(),
                    ordinal as i64,
                    serde_json::to_string(&change.kind)?,
                ],
            )?;
        }
        Ok(())
    }

    fn has_commit(&self, id: Uuid) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM commits WHERE id = ?1", params![id.to_string()], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    fn known_commit_ids(&self, candidates: &[Uuid]) -> Result<Vec<Uuid>> {
        let mut stmt = self.conn.prepare("SELECT 1 FROM commits WHERE id = ?1")?;
        let mut known = Vec::new();
        for id in candidates {
            let found: Option<i64> =
                stmt.query_row(params![id.to_string()], |row| row.get(0)).optional()?;
            if found.is_some() {
                known.push(*id);
            }
        }
        Ok(known)
    }

    fn find_commit(&self, id: Uuid) -> Result<Option<Commit>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {COMMIT_COLS} FROM commits WHERE id = ?1"),
                params![id.to_string()],
                commit_row,
            )
            .optional()?;
        row.map(|r| self.hydrate_commit(r)).transpose()
    }

    fn find_commit_by_hash(&self, hash: &str) -> Result<Option<Commit>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {COMMIT_COLS} FROM commits WHERE hash = ?1"),
                params![hash],
                commit_row,
            )
            .optional()?;
        row.map(|r| self.hydrate_commit(r)).transpose()
    }

    fn commits_up_to(&self, bound: Option<u64>) -> Result<Vec<Commit>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COMMIT_COLS} FROM commits
             WHERE ?1 IS NULL OR wall_ms <= ?1
             ORDER BY wall_ms, counter, id"
        ))?;
        let rows = stmt
            .query_map(params![bound], commit_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.hydrate_commits(rows)
    }

    fn commits_after(&self, key: CommitKey) -> Result<Vec<Commit>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COMMIT_COLS} FROM commits
             WHERE wall_ms > ?1
                OR (wall_ms = ?1 AND counter > ?2)
                OR (wall_ms = ?1 AND counter = ?2 AND id > ?3)
             ORDER BY wall_ms, counter, id"
        ))?;
        let rows = stmt
            .query_map(
                params![key.timestamp.wall_ms, key.timestamp.counter, key.commit_id.to_string()],
                commit_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.hydrate_commits(rows)
    }

    fn commit_before(&self, key: CommitKey) -> Result<Option<Commit>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {COMMIT_COLS} FROM commits
                     WHERE wall_ms < ?1
                        OR (wall_ms = ?1 AND counter < ?2)
                        OR (wall_ms = ?1 AND counter = ?2 AND id < ?3)
                     ORDER BY wall_ms DESC, counter DESC, id DESC
                     LIMIT 1"
                ),
                params![key.timestamp.wall_ms, key.timestamp.counter, key.commit_id.to_string()],
                commit_row,
            )
            .optional()?;
        row.map(|r| self.hydrate_commit(r)).transpose()
    }

    fn update_commit_parent(&mut self, id: Uuid, parent_hash: &str, hash: &str) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE commits SET parent_hash = ?2, hash = ?3 WHERE id = ?1",
            params![id.to_string(), parent_hash, hash],
        )?;
        if updated == 0 {
            return Err(Error::Storage(format!("unknown commit {id}")));
        }
        Ok(())
    }

    fn latest_clock(&self) -> Result<Option<HybridTimestamp>> {
        let latest = self
            .conn
            .query_row(
                "SELECT wall_ms, counter FROM commits
                 ORDER BY wall_ms DESC, counter DESC
                 LIMIT 1",
                [],
                |row| Ok(HybridTimestamp::new(row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(latest)
    }

    fn client_heads(&self, bound: Option<u64>) -> Result<BTreeMap<Uuid, HybridTimestamp>> {
        let mut stmt = self.conn.prepare(
            "SELECT client_id, wall_ms, counter FROM commits
             WHERE ?1 IS NULL OR wall_ms <= ?1",
        )?;
        let rows = stmt
            .query_map(params![bound], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?, row.get::<_, u64>(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut heads = BTreeMap::new();
        for (client_id, wall_ms, counter) in rows {
            let client_id = parse_uuid(&client_id)?;
            let timestamp = HybridTimestamp::new(wall_ms, counter);
            let head = heads.entry(client_id).or_insert(timestamp);
            if timestamp > *head {
                *head = timestamp;
            }
        }
        Ok(heads)
    }

    fn add_snapshot(&mut self, snapshot: &ObjectSnapshot) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO snapshots
             (id, entity_id, type_name, commit_id, entity, refs, is_root, entity_is_deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                snapshot.id.to_string(),
                snapshot.entity_id.to_string(),
                snapshot.type_name,
                snapshot.commit_id.to_string(),
                serde_json::to_string(&snapshot.entity)?,
                serde_json::to_string(&snapshot.references)?,
                snapshot.is_root as i32,
                snapshot.entity_is_deleted as i32,
            ],
        )?;
        Ok(())
    }

    fn has_snapshot(&self, id: Uuid) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM snapshots WHERE id = ?1", params![id.to_string()], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    fn find_snapshot(&self, id: Uuid) -> Result<Option<ObjectSnapshot>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, entity_id, type_name, commit_id, entity, refs, is_root, entity_is_deleted
                 FROM snapshots WHERE id = ?1",
                params![id.to_string()],
                snapshot_row,
            )
            .optional()?;
        row.map(hydrate_snapshot).transpose()
    }

    fn current_snapshot_refs(&self, bound: Option<u64>) -> Result<Vec<SnapshotRef>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.entity_id, s.commit_id, c.wall_ms, c.counter, c.hash,
                    s.is_root, s.entity_is_deleted
             FROM snapshots s JOIN commits c ON c.id = s.commit_id
             WHERE ?1 IS NULL OR c.wall_ms <= ?1
             ORDER BY c.wall_ms, c.counter, c.id",
        )?;
        let rows = stmt
            .query_map(params![bound], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u64>(3)?,
                    row.get::<_, u64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i32>(6)? != 0,
                    row.get::<_, i32>(7)? != 0,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // Rows arrive in ascending commit-key order; later rows supersede
        // earlier ones for the same entity.
        let mut current: HashMap<Uuid, SnapshotRef> = HashMap::new();
        for (id, entity_id, commit_id, wall_ms, counter, hash, is_root, entity_is_deleted) in rows {
            let commit_id = parse_uuid(&commit_id)?;
            let entity_id = parse_uuid(&entity_id)?;
            current.insert(
                entity_id,
                SnapshotRef {
                    snapshot_id: parse_uuid(&id)?,
                    entity_id,
                    commit_id,
                    commit_key: CommitKey::new(HybridTimestamp::new(wall_ms, counter), commit_id),
                    commit_hash: hash,
                    is_root,
                    entity_is_deleted,
                },
            );
        }

        let mut refs: Vec<SnapshotRef> = current.into_values().collect();
        refs.sort_by_key(|r| r.commit_key);
        Ok(refs)
    }

    fn current_snapshot_for(&self, entity_id: Uuid, bound: Option<u64>) -> Result<Option<ObjectSnapshot>> {
        let row = self
            .conn
            .query_row(
                "SELECT s.id, s.entity_id, s.type_name, s.commit_id, s.entity, s.refs,
                        s.is_root, s.entity_is_deleted
                 FROM snapshots s JOIN commits c ON c.id = s.commit_id
                 WHERE s.entity_id = ?1 AND (?2 IS NULL OR c.wall_ms <= ?2)
                 ORDER BY c.wall_ms DESC, c.counter DESC, c.id DESC
                 LIMIT 1",
                params![entity_id.to_string(), bound],
                snapshot_row,
            )
            .optional()?;
        row.map(hydrate_snapshot).transpose()
    }

    fn delete_snapshots_after(&mut self, key: CommitKey) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM snapshots WHERE commit_id IN (
                 SELECT id FROM commits
                 WHERE wall_ms > ?1
                    OR (wall_ms = ?1 AND counter > ?2)
                    OR (wall_ms = ?1 AND counter = ?2 AND id > ?3)
             )",
            params![key.timestamp.wall_ms, key.timestamp.counter, key.commit_id.to_string()],
        )?;
        Ok(deleted)
    }

    fn begin_transaction(&mut self) -> Result<()> {
        if !self.in_transaction {
            self.conn.execute("BEGIN", [])?;
            self.in_transaction = true;
        }
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<()> {
        if self.in_transaction {
            self.conn.execute("COMMIT", [])?;
            self.in_transaction = false;
        }
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<()> {
        if self.in_transaction {
            self.conn.execute("ROLLBACK", [])?;
            self.in_transaction = false;
        }
        Ok(())
    }
}

struct SnapshotRow {
    id: String,
    entity_id: String,
    type_name: String,
    commit_id: String,
    entity: String,
    refs: String,
    is_root: bool,
    entity_is_deleted: bool,
}

fn snapshot_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SnapshotRow> {
    Ok(SnapshotRow {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        type_name: row.get(2)?,
        commit_id: row.get(3)?,
        entity: row.get(4)?,
        refs: row.get(5)?,
        is_root: row.get::<_, i32>(6)? != 0,
        entity_is_deleted: row.get::<_, i32>(7)? != 0,
    })
}

fn hydrate_snapshot(row: SnapshotRow) -> Result<ObjectSnapshot> {
    let entity: Entity = serde_json::from_str(&row.entity)?;
    let references: Vec<Uuid> = serde_json::from_str(&row.refs)?;
    Ok(ObjectSnapshot {
        id: parse_uuid(&row.id)?,
        entity_id: parse_uuid(&row.entity_id)?,
        type_name: row.type_name,
        entity,
        references,
        is_root: row.is_root,
        entity_is_deleted: row.entity_is_deleted,
        commit_id: parse_uuid(&row.commit_id)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::Change;

    fn commit_at(wall_ms: u64, counter: u64) -> Commit {
        Commit::new(Uuid::new_v4(), HybridTimestamp::new(wall_ms, counter), vec![]).unwrap()
    }

    #[test]
    fn test_commit_round_trip_with_changes() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let entity_id = Uuid::new_v4();
        let commit = Commit::new(
            Uuid::new_v4(),
            HybridTimestamp::new(100, 2),
            vec![
                Change::create(entity_id, "entry", serde_json::json!({"headword": "run"})),
                Change::field_patch(entity_id, serde_json::json!({"headword": "ran"})),
            ],
        )
        .unwrap();
        storage.add_commit(&commit).unwrap();

        let loaded = storage.find_commit(commit.id).unwrap().unwrap();
        assert_eq!(loaded.id, commit.id);
        assert_eq!(loaded.timestamp, commit.timestamp);
        assert_eq!(loaded.hash(), commit.hash());
        assert_eq!(loaded.changes, commit.changes);
        loaded.verify_hash().unwrap();
    }

    #[test]
    fn test_commits_after_excludes_key_itself() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let a = commit_at(100, 0);
        let b = commit_at(200, 0);
        let c = commit_at(300, 0);
        for commit in [&a, &b, &c] {
            storage.add_commit(commit).unwrap();
        }

        let after = storage.commits_after(a.key()).unwrap();
        assert_eq!(after.iter().map(|c| c.id).collect::<Vec<_>>(), vec![b.id, c.id]);

        let after = storage.commits_after(c.key()).unwrap();
        assert!(after.is_empty());
    }

    #[test]
    fn test_commit_before_finds_predecessor() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let a = commit_at(100, 0);
        let b = commit_at(200, 0);
        storage.add_commit(&a).unwrap();
        storage.add_commit(&b).unwrap();

        assert_eq!(storage.commit_before(b.key()).unwrap().unwrap().id, a.id);
        assert!(storage.commit_before(a.key()).unwrap().is_none());
    }

    #[test]
    fn test_find_commit_by_hash() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let commit = commit_at(50, 0);
        storage.add_commit(&commit).unwrap();

        let found = storage.find_commit_by_hash(commit.hash()).unwrap().unwrap();
        assert_eq!(found.id, commit.id);
        assert!(storage.find_commit_by_hash("0000000000000000").unwrap().is_none());
    }

    #[test]
    fn test_update_commit_parent_persists() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let parent = commit_at(10, 0);
        let mut child = commit_at(20, 0);
        storage.add_commit(&parent).unwrap();
        storage.add_commit(&child).unwrap();

        child.set_parent_hash(parent.hash()).unwrap();
        storage
            .update_commit_parent(child.id, child.parent_hash(), child.hash())
            .unwrap();

        let loaded = storage.find_commit(child.id).unwrap().unwrap();
        assert_eq!(loaded.parent_hash(), parent.hash());
        loaded.verify_hash().unwrap();
    }

    #[test]
    fn test_current_snapshot_tracks_greatest_commit_key() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let entity_id = Uuid::new_v4();
        let old = commit_at(100, 0);
        let new = commit_at(200, 0);
        storage.add_commit(&old).unwrap();
        storage.add_commit(&new).unwrap();

        let entity = Entity::new(entity_id, "entry", serde_json::json!({"headword": "go"}));
        storage
            .add_snapshot(&ObjectSnapshot::new(entity.clone(), vec![], &old, true))
            .unwrap();
        let newer = ObjectSnapshot::new(entity, vec![], &new, false);
        storage.add_snapshot(&newer).unwrap();

        let current = storage.current_snapshot_for(entity_id, None).unwrap().unwrap();
        assert_eq!(current.id, newer.id);

        // bounded view sees the older state
        let bounded = storage.current_snapshot_for(entity_id, Some(150)).unwrap().unwrap();
        assert_eq!(bounded.commit_id, old.id);

        let refs = storage.current_snapshot_refs(None).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].snapshot_id, newer.id);
    }

    #[test]
    fn test_delete_snapshots_after_range_deletes() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let entity_id = Uuid::new_v4();
        let a = commit_at(100, 0);
        let b = commit_at(200, 0);
        let c = commit_at(300, 0);
        for commit in [&a, &b, &c] {
            storage.add_commit(commit).unwrap();
            let entity = Entity::new(entity_id, "entry", serde_json::json!({}));
            storage
                .add_snapshot(&ObjectSnapshot::new(entity, vec![], commit, commit.id == a.id))
                .unwrap();
        }

        let dropped = storage.delete_snapshots_after(a.key()).unwrap();
        assert_eq!(dropped, 2);

        let current = storage.current_snapshot_for(entity_id, None).unwrap().unwrap();
        assert_eq!(current.commit_id, a.id);
    }

    #[test]
    fn test_rollback_discards_writes() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
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
    fn test_latest_clock_and_client_heads() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        assert!(storage.latest_clock().unwrap().is_none());

        let client_a = Uuid::new_v4();
        let client_b = Uuid::new_v4();
        storage
            .add_commit(&Commit::new(client_a, HybridTimestamp::new(100, 1), vec![]).unwrap())
            .unwrap();
        storage
            .add_commit(&Commit::new(client_a, HybridTimestamp::new(100, 4), vec![]).unwrap())
            .unwrap();
        storage
            .add_commit(&Commit::new(client_b, HybridTimestamp::new(250, 0), vec![]).unwrap())
            .unwrap();

        assert_eq!(storage.latest_clock().unwrap(), Some(HybridTimestamp::new(250, 0)));

        let heads = storage.client_heads(None).unwrap();
        assert_eq!(heads[&client_a], HybridTimestamp::new(100, 4));
        assert_eq!(heads[&client_b], HybridTimestamp::new(250, 0));

        let bounded = storage.client_heads(Some(150)).unwrap();
        assert_eq!(bounded.len(), 1);
        assert_eq!(bounded[&client_a], HybridTimestamp::new(100, 4));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let path = path.to_str().unwrap();

        let commit = commit_at(100, 0);
        {
            let mut storage = SqliteStorage::open(path).unwrap();
            storage.add_commit(&commit).unwrap();
        }

        let storage = SqliteStorage::open(path).unwrap();
        assert!(storage.has_commit(commit.id).unwrap());
    }
}
