//! Local cache for objects referenced from rendered documents.
//!
//! Object keys resolve either to a versioned copy on local disk, revalidated
//! against the remote store once the freshness window lapses, or to a cached
//! pre-signed URL.

pub mod artifacts;
pub mod clock;
pub mod config;
pub mod db;
pub mod download;
pub mod engine;
pub mod error;
pub mod providers;
pub mod reconciler;
pub mod resolver;
pub mod signed;

#[cfg(test)]
mod test_support;

pub use artifacts::{ArtifactStore, LocalArtifact};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use db::{MemoryRecordStore, RecordStore, SqliteRecordStore};
pub use download::{DownloadCoordinator, DownloadError, DownloadState};
pub use engine::ObjectCache;
pub use error::{OpenError, RemoteError, ResolveError};
pub use providers::{ObjectVersion, RemoteStore, S3RemoteStore, S3Settings};
pub use resolver::{Resolution, ResolveRequests};
