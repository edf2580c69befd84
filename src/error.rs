//! Error types surfaced by the cache engine

use crate::artifacts::ArtifactError;
use crate::db::RecordStoreError;
use crate::download::DownloadError;

/// Errors raised by a [`RemoteStore`](crate::providers::RemoteStore) implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    /// The remote store has no version of this object.
    #[error("object not found: {0}")]
    NotFound(String),

    /// Network or service failure talking to the remote store.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Per-key resolution failure handed back to the caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    #[error("object {0} does not exist in the remote store")]
    NotFound(String),

    #[error("remote store unavailable while resolving {key}: {reason}")]
    Transport { key: String, reason: String },

    #[error(transparent)]
    DownloadFailed(#[from] DownloadError),

    #[error("record store failure: {0}")]
    Store(String),

    #[error("artifact store failure: {0}")]
    Artifact(String),
}

/// Failure bringing the cache up.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("failed to prepare artifact store: {0}")]
    Artifacts(#[from] ArtifactError),

    #[error("failed to prepare record store: {0}")]
    Records(#[from] RecordStoreError),

    #[error("failed to connect to remote store: {0}")]
    Remote(#[from] RemoteError),
}

impl ResolveError {
    pub(crate) fn from_remote(key: &str, err: RemoteError) -> Self {
        match err {
            RemoteError::NotFound(_) => ResolveError::NotFound(key.to_string()),
            RemoteError::Transport(reason) => ResolveError::Transport {
                key: key.to_string(),
                reason,
            },
        }
    }
}

impl From<RecordStoreError> for ResolveError {
    fn from(err: RecordStoreError) -> Self {
        ResolveError::Store(err.to_string())
    }
}

impl From<ArtifactError> for ResolveError {
    fn from(err: ArtifactError) -> Self {
        ResolveError::Artifact(err.to_string())
    }
}
