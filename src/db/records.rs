//! Record types persisted in the [`RecordStore`] and their key layout
//!
//! Keys are `s3-link/<kind>/...` so every record kind can be enumerated
//! and cleared by prefix.

use super::{RecordResult, RecordStore};
use crate::download::DownloadState;
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const NAMESPACE: &str = "s3-link";
pub const OBJECT_PREFIX: &str = "s3-link/object/";
pub const SIGNED_PREFIX: &str = "s3-link/signed/";
pub const DOWNLOAD_PREFIX: &str = "s3-link/download/";

pub fn object_record_key(object_key: &str) -> String {
    format!("{OBJECT_PREFIX}{object_key}")
}

pub fn signed_record_key(object_key: &str) -> String {
    format!("{SIGNED_PREFIX}{object_key}")
}

/// Download records are keyed by the `(object, version)` pair so a fetch of a
/// newer version never collides with a record left by an older one.
pub fn download_record_key(object_key: &str, version_id: &str) -> String {
    format!("{DOWNLOAD_PREFIX}{version_id}/{object_key}")
}

/// Last version confirmed for an object, and when it was confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectVersionRecord {
    pub object_key: String,
    pub version_id: String,
    pub last_update: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrlRecord {
    pub object_key: String,
    pub signed_url: String,
    pub issued_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRecord {
    pub object_key: String,
    pub version_id: String,
    pub started_at: i64,
    pub state: DownloadState,
}

/// Read and decode a record.
///
/// A value that fails to decode is logged, deleted and reported as absent so
/// the next resolution rebuilds it.
pub fn read_record<T: DeserializeOwned>(
    store: &dyn RecordStore,
    key: &str,
) -> RecordResult<Option<T>> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            warn!("corrupt_record: {} dropped: {}", key, e);
            store.remove(key)?;
            Ok(None)
        }
    }
}

pub fn write_record<T: Serialize>(store: &dyn RecordStore, key: &str, record: &T) -> RecordResult<()> {
    let encoded = serde_json::to_string(record)?;
    store.put(key, &encoded)
}

/// Decode every record under `prefix`, dropping (and deleting) corrupt ones.
pub fn list_records<T: DeserializeOwned>(
    store: &dyn RecordStore,
    prefix: &str,
) -> RecordResult<Vec<(String, T)>> {
    let mut records = Vec::new();
    for (key, raw) in store.list_by_prefix(prefix)? {
        match serde_json::from_str(&raw) {
            Ok(record) => records.push((key, record)),
            Err(e) => {
                warn!("corrupt_record: {} dropped: {}", key, e);
                store.remove(&key)?;
            }
        }
    }
    Ok(records)
}
