//! Remote object store client seam
//!
//! The cache only talks to the remote store through [`RemoteStore`];
//! `s3_client` provides the S3 implementation.

mod s3_client;

pub use s3_client::{create_s3_client, S3RemoteStore, S3Settings, PROFILE_NONE};

use crate::artifacts::ByteStream;
use crate::error::RemoteError;
use async_trait::async_trait;
use std::time::Duration;

/// One remote revision of an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectVersion {
    pub version_id: String,
    /// Milliseconds since the Unix epoch, when the store reports it.
    pub last_modified: Option<i64>,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Versions of `key`, newest first. Empty when the object does not exist.
    async fn list_versions(&self, key: &str) -> Result<Vec<ObjectVersion>, RemoteError>;

    /// Stream the bytes of one specific version.
    async fn get_object(&self, key: &str, version_id: &str) -> Result<ByteStream, RemoteError>;

    /// Time-limited URL granting direct read access to `key`.
    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, RemoteError>;

    /// Newest version of `key`, or [`RemoteError::NotFound`].
    async fn latest_version(&self, key: &str) -> Result<ObjectVersion, RemoteError> {
        self.list_versions(key)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::NotFound(key.to_string()))
    }
}
