//! Core Store implementation
//!
//! A single SQLite database holds every collection. Rows carry the JSON
//! payload plus store-managed columns: integer id, version counter, row
//! timestamps, and the soft-delete flag. An auxiliary index table maps each
//! record's declared fields to canonical text values for equality queries.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OpenFlags, params};
use tracing::debug;

use crate::error::StoreError;
use crate::{IndexValue, Record, now_ms};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    data TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection, deleted);

CREATE TABLE IF NOT EXISTS record_index (
    record_id INTEGER NOT NULL,
    collection TEXT NOT NULL,
    field TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (record_id, field)
);
CREATE INDEX IF NOT EXISTS idx_record_index_lookup ON record_index(collection, field, value);

CREATE TABLE IF NOT EXISTS checkpoints (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_key TEXT NOT NULL,
    seq INTEGER NOT NULL,
    snapshot TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE (session_key, seq)
);
CREATE INDEX IF NOT EXISTS idx_checkpoints_session ON checkpoints(session_key, seq);
";

/// A stored record with its store-managed columns
#[derive(Debug, Clone)]
pub struct Row<R> {
    /// Store-assigned integer id
    pub id: i64,
    /// Version counter, bumped on every update
    pub version: i64,
    /// Row creation time (Unix milliseconds)
    pub created_at: i64,
    /// Last update time (Unix milliseconds)
    pub updated_at: i64,
    /// The deserialized payload
    pub data: R,
}

/// An equality filter over an indexed field
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub value: IndexValue,
}

impl Filter {
    /// Match records whose indexed `field` equals `value`
    pub fn eq(field: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// One entry in a session's append-only checkpoint stream
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub seq: i64,
    pub snapshot: String,
    pub created_at: i64,
}

/// The store. Writers are serialized behind an internal mutex; every
/// operation runs inside a SQLite transaction that commits entirely or
/// leaves the database unchanged.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        Self::init(conn, Some(path.as_ref()))
    }

    /// Open an in-memory store (tests)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<&Path>) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = ?path, "Opened work store");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Run `f` inside a transaction. Commits when `f` returns `Ok`, rolls
    /// back otherwise. Reads inside `f` are snapshot-consistent. The error
    /// type is generic so callers can abort with their own domain errors.
    pub fn transaction<T, E>(&self, f: impl FnOnce(&Txn<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| E::from(StoreError::Unavailable("store mutex poisoned".to_string())))?;
        let tx = conn.transaction().map_err(|e| E::from(StoreError::from(e)))?;
        let result = f(&Txn { tx: &tx });
        match result {
            Ok(value) => {
                tx.commit().map_err(|e| E::from(StoreError::from(e)))?;
                Ok(value)
            }
            Err(e) => {
                // Transaction rolls back on drop
                Err(e)
            }
        }
    }

    /// Insert a record, returning its store-assigned id
    pub fn insert<R: Record>(&self, record: &R) -> Result<i64, StoreError> {
        self.transaction(|txn| txn.insert(record))
    }

    /// Fetch a record by id. Soft-deleted rows are not found.
    pub fn get<R: Record>(&self, id: i64) -> Result<Row<R>, StoreError> {
        self.transaction(|txn| txn.get(id))
    }

    /// Fetch a record by id, soft-deleted rows included
    pub fn get_any<R: Record>(&self, id: i64) -> Result<Row<R>, StoreError> {
        self.transaction(|txn| txn.get_any(id))
    }

    /// Update a record under an optimistic version check. Returns the new
    /// version; a stale `expected_version` fails with `Conflict`.
    pub fn update<R: Record>(&self, id: i64, expected_version: i64, record: &R) -> Result<i64, StoreError> {
        self.transaction(|txn| txn.update(id, expected_version, record))
    }

    /// Mark a record deleted. Non-cascading.
    pub fn soft_delete<R: Record>(&self, id: i64) -> Result<(), StoreError> {
        self.transaction(|txn| txn.soft_delete::<R>(id))
    }

    /// Equality query over indexed fields; non-deleted rows only
    pub fn query<R: Record>(&self, filters: &[Filter]) -> Result<Vec<Row<R>>, StoreError> {
        self.transaction(|txn| txn.query(filters))
    }

    /// All non-deleted records in the collection
    pub fn list<R: Record>(&self) -> Result<Vec<Row<R>>, StoreError> {
        self.transaction(|txn| txn.query::<R>(&[]))
    }

    /// Append a snapshot to the session's checkpoint stream
    pub fn append_checkpoint(&self, session_key: &str, snapshot: &str) -> Result<i64, StoreError> {
        self.transaction(|txn| txn.append_checkpoint(session_key, snapshot))
    }

    /// Read a session's checkpoint stream in sequence order
    pub fn list_checkpoints(&self, session_key: &str) -> Result<Vec<Checkpoint>, StoreError> {
        self.transaction(|txn| txn.list_checkpoints(session_key))
    }
}

/// Handle for operations within one transaction
pub struct Txn<'a> {
    tx: &'a rusqlite::Transaction<'a>,
}

impl Txn<'_> {
    /// Insert a record, returning its store-assigned id
    pub fn insert<R: Record>(&self, record: &R) -> Result<i64, StoreError> {
        let data = serde_json::to_string(record)?;
        let now = now_ms();
        self.tx.execute(
            "INSERT INTO records (collection, data, version, created_at, updated_at, deleted)
             VALUES (?1, ?2, 1, ?3, ?3, 0)",
            params![R::collection_name(), data, now],
        )?;
        let id = self.tx.last_insert_rowid();
        self.write_index(id, R::collection_name(), record)?;
        debug!(collection = R::collection_name(), id, "Inserted record");
        Ok(id)
    }

    /// Fetch a record by id, excluding soft-deleted rows
    pub fn get<R: Record>(&self, id: i64) -> Result<Row<R>, StoreError> {
        let mut stmt = self.tx.prepare(
            "SELECT id, data, version, created_at, updated_at FROM records
             WHERE id = ?1 AND collection = ?2 AND deleted = 0",
        )?;
        let mut rows = stmt.query(params![id, R::collection_name()])?;
        match rows.next()? {
            Some(row) => Self::read_row(row),
            None => Err(StoreError::NotFound(format!("{}/{}", R::collection_name(), id))),
        }
    }

    /// Fetch a record by id, soft-deleted rows included
    pub fn get_any<R: Record>(&self, id: i64) -> Result<Row<R>, StoreError> {
        let mut stmt = self.tx.prepare(
            "SELECT id, data, version, created_at, updated_at FROM records
             WHERE id = ?1 AND collection = ?2",
        )?;
        let mut rows = stmt.query(params![id, R::collection_name()])?;
        match rows.next()? {
            Some(row) => Self::read_row(row),
            None => Err(StoreError::NotFound(format!("{}/{}", R::collection_name(), id))),
        }
    }

    /// Versioned update; reindexes the record's declared fields
    pub fn update<R: Record>(&self, id: i64, expected_version: i64, record: &R) -> Result<i64, StoreError> {
        let data = serde_json::to_string(record)?;
        let changed = self.tx.execute(
            "UPDATE records SET data = ?2, version = version + 1, updated_at = ?3
             WHERE id = ?1 AND collection = ?4 AND version = ?5 AND deleted = 0",
            params![id, data, now_ms(), R::collection_name(), expected_version],
        )?;
        if changed == 0 {
            let current: Option<i64> = self
                .tx
                .query_row(
                    "SELECT version FROM records WHERE id = ?1 AND collection = ?2 AND deleted = 0",
                    params![id, R::collection_name()],
                    |row| row.get(0),
                )
                .ok();
            return match current {
                Some(_) => Err(StoreError::Conflict {
                    collection: R::collection_name(),
                    id,
                    expected: expected_version,
                }),
                None => Err(StoreError::NotFound(format!("{}/{}", R::collection_name(), id))),
            };
        }
        self.write_index(id, R::collection_name(), record)?;
        Ok(expected_version + 1)
    }

    /// Mark a record deleted
    pub fn soft_delete<R: Record>(&self, id: i64) -> Result<(), StoreError> {
        let changed = self.tx.execute(
            "UPDATE records SET deleted = 1, updated_at = ?2 WHERE id = ?1 AND collection = ?3 AND deleted = 0",
            params![id, now_ms(), R::collection_name()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("{}/{}", R::collection_name(), id)));
        }
        debug!(collection = R::collection_name(), id, "Soft-deleted record");
        Ok(())
    }

    /// Equality query over indexed fields; deterministic id order
    pub fn query<R: Record>(&self, filters: &[Filter]) -> Result<Vec<Row<R>>, StoreError> {
        let mut sql = String::from(
            "SELECT r.id, r.data, r.version, r.created_at, r.updated_at FROM records r
             WHERE r.collection = ?1 AND r.deleted = 0",
        );
        let mut args: Vec<String> = vec![R::collection_name().to_string()];
        for filter in filters {
            let base = args.len();
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM record_index i WHERE i.record_id = r.id
                   AND i.field = ?{} AND i.value = ?{})",
                base + 1,
                base + 2
            ));
            args.push(filter.field.clone());
            args.push(filter.value.canonical());
        }
        sql.push_str(" ORDER BY r.id ASC");

        let mut stmt = self.tx.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(args))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(Self::read_row(row)?);
        }
        Ok(out)
    }

    /// Append a snapshot to the session's checkpoint stream, returning the
    /// assigned sequence number (1-based, strictly increasing per session)
    pub fn append_checkpoint(&self, session_key: &str, snapshot: &str) -> Result<i64, StoreError> {
        let seq: i64 = self.tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM checkpoints WHERE session_key = ?1",
            params![session_key],
            |row| row.get(0),
        )?;
        self.tx.execute(
            "INSERT INTO checkpoints (session_key, seq, snapshot, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![session_key, seq, snapshot, now_ms()],
        )?;
        Ok(seq)
    }

    /// Read a session's checkpoint stream in sequence order
    pub fn list_checkpoints(&self, session_key: &str) -> Result<Vec<Checkpoint>, StoreError> {
        let mut stmt = self.tx.prepare(
            "SELECT seq, snapshot, created_at FROM checkpoints WHERE session_key = ?1 ORDER BY seq ASC",
        )?;
        let mut rows = stmt.query(params![session_key])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(Checkpoint {
                seq: row.get(0)?,
                snapshot: row.get(1)?,
                created_at: row.get(2)?,
            });
        }
        Ok(out)
    }

    fn write_index<R: Record>(&self, id: i64, collection: &str, record: &R) -> Result<(), StoreError> {
        self.tx
            .execute("DELETE FROM record_index WHERE record_id = ?1", params![id])?;
        for (field, value) in record.indexed_fields() {
            self.tx.execute(
                "INSERT INTO record_index (record_id, collection, field, value) VALUES (?1, ?2, ?3, ?4)",
                params![id, collection, field, value.canonical()],
            )?;
        }
        Ok(())
    }

    fn read_row<R: Record>(row: &rusqlite::Row<'_>) -> Result<Row<R>, StoreError> {
        let data: String = row.get(1)?;
        Ok(Row {
            id: row.get(0)?,
            data: serde_json::from_str(&data)?,
            version: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }
}
