//! SQLite-backed directory store.
//!
//! One row per object. The identity columns are indexed; the attribute map
//! is stored as JSON and filters are evaluated in process.
//!
//! `transaction_begin` issues `BEGIN IMMEDIATE`, so two stores opened on the
//! same file serialize their transactions: the second writer waits up to the
//! busy timeout and then fails with [`StoreError::Busy`].

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use dirsam_id::{Dn, ExtendedDn, ObjectGuid, Sid};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use tracing::debug;

use super::{
    apply_changes, lookup_reference, prepare_add, strip_references, DirectoryStore, Entry,
    EntryLookup, Modification, Scope, StoreError, StoreResult,
};
use crate::filter::Filter;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const COLUMNS: &str = "guid, sid, dn, attributes";

struct SqliteInner {
    conn: Connection,
    owner: Option<ThreadId>,
}

/// SQLite directory store.
pub struct SqliteStore {
    inner: Mutex<SqliteInner>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;

        conn.busy_timeout(BUSY_TIMEOUT)?;
        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::with_connection(conn)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        init_schema(&conn)?;
        Ok(Self {
            inner: Mutex::new(SqliteInner { conn, owner: None }),
        })
    }

    /// Locks the connection. A thread other than the transaction owner is
    /// turned away rather than writing into someone else's transaction.
    fn lock(&self) -> StoreResult<MutexGuard<'_, SqliteInner>> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match inner.owner {
            Some(owner) if owner != thread::current().id() => Err(StoreError::Busy(
                "transaction held by another caller".to_string(),
            )),
            _ => Ok(inner),
        }
    }
}

fn init_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            guid TEXT NOT NULL UNIQUE,
            sid TEXT UNIQUE,
            dn TEXT NOT NULL,
            dn_key TEXT NOT NULL UNIQUE,
            attributes TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

/// Maps lock contention and uniqueness failures onto store errors.
fn map_sqlite(err: rusqlite::Error, what: &str) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => StoreError::Busy(what.to_string()),
        Some(ErrorCode::ConstraintViolation) => StoreError::EntryAlreadyExists(what.to_string()),
        _ => StoreError::Sqlite(err),
    }
}

fn decode_row(row: &Row<'_>) -> rusqlite::Result<(String, Option<String>, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_entry(raw: (String, Option<String>, String, String)) -> StoreResult<Entry> {
    let (guid, sid, dn, attributes) = raw;
    let attributes: BTreeMap<String, Vec<String>> = serde_json::from_str(&attributes)?;
    Ok(Entry::from_parts(
        Dn::parse(&dn)?,
        ObjectGuid::parse(&guid)?,
        sid.as_deref().map(Sid::parse).transpose()?,
        attributes,
    ))
}

struct Rows<'a>(&'a Connection);

impl Rows<'_> {
    fn one(&self, column: &str, value: &str) -> StoreResult<Option<Entry>> {
        let sql = format!("SELECT {COLUMNS} FROM entries WHERE {column} = ?1");
        self.0
            .query_row(&sql, params![value], decode_row)
            .optional()?
            .map(decode_entry)
            .transpose()
    }

    fn all(&self) -> StoreResult<Vec<Entry>> {
        let sql = format!("SELECT {COLUMNS} FROM entries ORDER BY id");
        let mut stmt = self.0.prepare(&sql)?;
        let entries = stmt
            .query_map([], decode_row)?
            .map(|row| decode_entry(row?))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(entries)
    }

    fn insert(&self, entry: &Entry) -> StoreResult<()> {
        self.0
            .execute(
                "INSERT INTO entries (guid, sid, dn, dn_key, attributes) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.guid().to_string(),
                    entry.sid().map(ToString::to_string),
                    entry.dn().to_string(),
                    entry.dn().casefold(),
                    serde_json::to_string(entry.attributes_map())?,
                ],
            )
            .map_err(|e| map_sqlite(e, &entry.dn().to_string()))?;
        Ok(())
    }

    fn update_attributes(&self, entry: &Entry) -> StoreResult<()> {
        self.0
            .execute(
                "UPDATE entries SET attributes = ?2 WHERE guid = ?1",
                params![
                    entry.guid().to_string(),
                    serde_json::to_string(entry.attributes_map())?,
                ],
            )
            .map_err(|e| map_sqlite(e, &entry.dn().to_string()))?;
        Ok(())
    }

    fn remove(&self, guid: &ObjectGuid) -> StoreResult<()> {
        self.0
            .execute("DELETE FROM entries WHERE guid = ?1", params![guid.to_string()])
            .map_err(|e| map_sqlite(e, &guid.to_string()))?;
        Ok(())
    }

    fn find(&self, target: &ExtendedDn) -> StoreResult<Entry> {
        lookup_reference(self, target)?.ok_or_else(|| StoreError::NoSuchObject(target.to_string()))
    }

    /// Runs `body` inside a savepoint so a failed write leaves no trace,
    /// whether or not a transaction is open.
    fn atomically<T>(&self, body: impl FnOnce(&Self) -> StoreResult<T>) -> StoreResult<T> {
        self.0
            .execute_batch("SAVEPOINT store_op")
            .map_err(|e| map_sqlite(e, "savepoint"))?;
        match body(self) {
            Ok(value) => {
                self.0
                    .execute_batch("RELEASE store_op")
                    .map_err(|e| map_sqlite(e, "release"))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.0.execute_batch("ROLLBACK TO store_op; RELEASE store_op") {
                    debug!(error = %rollback, "savepoint rollback failed");
                }
                Err(err)
            }
        }
    }
}

impl EntryLookup for Rows<'_> {
    fn by_guid(&self, guid: &ObjectGuid) -> StoreResult<Option<Entry>> {
        self.one("guid", &guid.to_string())
    }

    fn by_sid(&self, sid: &Sid) -> StoreResult<Option<Entry>> {
        self.one("sid", &sid.to_string())
    }

    fn by_dn(&self, dn: &Dn) -> StoreResult<Option<Entry>> {
        self.one("dn_key", &dn.casefold())
    }
}

impl DirectoryStore for SqliteStore {
    fn search(
        &self,
        base: &ExtendedDn,
        scope: Scope,
        filter: &Filter,
        attributes: &[&str],
    ) -> StoreResult<Vec<Entry>> {
        let inner = self.lock()?;
        let rows = Rows(&inner.conn);

        let base_dn = if base.has_identifiers() || !base.dn().is_root() {
            let base_entry = rows.find(base)?;
            if scope == Scope::Base {
                let hit = filter.matches(&base_entry).then(|| base_entry.project(attributes));
                return Ok(hit.into_iter().collect());
            }
            base_entry.dn().clone()
        } else {
            Dn::root()
        };

        Ok(rows
            .all()?
            .into_iter()
            .filter(|e| scope.contains(&base_dn, e.dn()) && filter.matches(e))
            .map(|e| e.project(attributes))
            .collect())
    }

    fn add(&self, entry: Entry) -> StoreResult<()> {
        let inner = self.lock()?;
        Rows(&inner.conn).atomically(|rows| {
            let entry = prepare_add(rows, entry)?;
            rows.insert(&entry)
        })
    }

    fn modify(&self, modification: &Modification) -> StoreResult<()> {
        let inner = self.lock()?;
        Rows(&inner.conn).atomically(|rows| {
            let mut entry = rows.find(&modification.target)?;
            apply_changes(rows, &mut entry, &modification.changes)?;
            rows.update_attributes(&entry)
        })
    }

    fn delete(&self, target: &ExtendedDn) -> StoreResult<()> {
        let inner = self.lock()?;
        Rows(&inner.conn).atomically(|rows| {
            let victim = rows.find(target)?;
            let all = rows.all()?;
            if all
                .iter()
                .any(|e| e.guid() != victim.guid() && e.dn().is_child_of(victim.dn()))
            {
                return Err(StoreError::NotAllowedOnNonLeaf(victim.dn().to_string()));
            }

            rows.remove(&victim.guid())?;
            for mut entry in all.into_iter().filter(|e| e.guid() != victim.guid()) {
                if strip_references(&mut entry, &victim.guid()) {
                    rows.update_attributes(&entry)?;
                }
            }
            Ok(())
        })
    }

    fn transaction_begin(&self) -> StoreResult<()> {
        let mut inner = self.lock()?;
        if inner.owner.is_some() {
            return Err(StoreError::Transaction("a transaction is already open"));
        }
        inner
            .conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| map_sqlite(e, "begin"))?;
        inner.owner = Some(thread::current().id());
        Ok(())
    }

    fn transaction_commit(&self) -> StoreResult<()> {
        let mut inner = self.lock()?;
        if inner.owner.is_none() {
            return Err(StoreError::Transaction("no transaction is open"));
        }
        inner
            .conn
            .execute_batch("COMMIT")
            .map_err(|e| map_sqlite(e, "commit"))?;
        inner.owner = None;
        Ok(())
    }

    fn transaction_cancel(&self) -> StoreResult<()> {
        let mut inner = self.lock()?;
        if inner.owner.is_none() {
            return Err(StoreError::Transaction("no transaction is open"));
        }
        inner.owner = None;
        inner
            .conn
            .execute_batch("ROLLBACK")
            .map_err(|e| map_sqlite(e, "rollback"))?;
        Ok(())
    }
}
