use super::{RecordResult, RecordStore, RecordStoreError};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Get SQL for creating the records table
pub fn get_table_sql() -> &'static str {
    "
    CREATE TABLE IF NOT EXISTS cache_records (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    "
}

/// Record store persisted in a single SQLite file.
///
/// One connection behind a mutex serializes writers, which also gives the
/// per-key atomicity the cache relies on.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Open (creating if needed) the database at `db_path`.
    pub fn open(db_path: &Path) -> RecordResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    /// Database that lives only as long as this value.
    pub fn open_in_memory() -> RecordResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> RecordResult<Self> {
        conn.execute_batch(get_table_sql())?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_connection<F, T>(&self, f: F) -> RecordResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn: MutexGuard<'_, Connection> =
            self.conn.lock().map_err(|_| RecordStoreError::Poisoned)?;
        Ok(f(&conn)?)
    }
}

impl RecordStore for SqliteRecordStore {
    fn get(&self, key: &str) -> RecordResult<Option<String>> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT value FROM cache_records WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
    }

    fn put(&self, key: &str, value: &str) -> RecordResult<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO cache_records (key, value) VALUES (?1, ?2)
                 ON CONFLICT (key) DO UPDATE SET value = ?2",
                params![key, value],
            )
            .map(|_| ())
        })
    }

    fn remove(&self, key: &str) -> RecordResult<()> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM cache_records WHERE key = ?1", params![key])
                .map(|_| ())
        })
    }

    fn list_by_prefix(&self, prefix: &str) -> RecordResult<Vec<(String, String)>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value FROM cache_records
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key",
            )?;
            let rows = stmt.query_map(params![prefix], |row| Ok((row.get(0)?, row.get(1)?)))?;
            let entries = rows.collect::<rusqlite::Result<Vec<(String, String)>>>();
            entries
        })
    }

    fn remove_by_prefix(&self, prefix: &str) -> RecordResult<usize> {
        self.with_connection(|conn| {
            conn.execute(
                "DELETE FROM cache_records WHERE substr(key, 1, length(?1)) = ?1",
                params![prefix],
            )
        })
    }
}
