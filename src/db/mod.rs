//! Local record store
//!
//! Small JSON records keyed by namespaced strings:
//! - `records`: the three record types and their key layout
//! - `sqlite`: embedded, persistent backend
//! - `memory`: map-backed backend for tests and ephemeral hosts

mod memory;
pub mod records;
mod sqlite;

pub use memory::MemoryRecordStore;
pub use records::{DownloadRecord, ObjectVersionRecord, SignedUrlRecord};
pub use sqlite::SqliteRecordStore;

#[derive(Debug, thiserror::Error)]
pub enum RecordStoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("record store lock poisoned")]
    Poisoned,
}

pub type RecordResult<T> = Result<T, RecordStoreError>;

/// Durable string key/value store shared by every cache component.
///
/// Each operation is atomic per key: a reader never sees a half-written value.
/// Missing keys are `Ok(None)`, never an error.
pub trait RecordStore: Send + Sync {
    fn get(&self, key: &str) -> RecordResult<Option<String>>;

    /// Insert or overwrite.
    fn put(&self, key: &str, value: &str) -> RecordResult<()>;

    /// Removing an absent key is a no-op.
    fn remove(&self, key: &str) -> RecordResult<()>;

    /// All `(key, value)` pairs whose key starts with `prefix`, ordered by key.
    fn list_by_prefix(&self, prefix: &str) -> RecordResult<Vec<(String, String)>>;

    /// Remove every key starting with `prefix`, returning how many were removed.
    fn remove_by_prefix(&self, prefix: &str) -> RecordResult<usize> {
        let entries = self.list_by_prefix(prefix)?;
        for (key, _) in &entries {
            self.remove(key)?;
        }
        Ok(entries.len())
    }
}
