//! Download state and failure types

use serde::{Deserialize, Serialize};

/// Lifecycle of one `(object key, version)` fetch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DownloadState {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "completed")]
    Completed,
}

impl std::fmt::Display for DownloadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadState::Pending => write!(f, "pending"),
            DownloadState::Running => write!(f, "running"),
            DownloadState::Failed => write!(f, "failed"),
            DownloadState::Completed => write!(f, "completed"),
        }
    }
}

/// Terminal failure of one fetch attempt. Cloned to every waiter that joined it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("download of {object_key} (version {version_id}) failed: {reason}")]
pub struct DownloadError {
    pub object_key: String,
    pub version_id: String,
    pub reason: String,
}
