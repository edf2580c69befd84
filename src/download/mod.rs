//! Download coordination
//!
//! Fetches one object version from the remote store into the artifact store
//! with:
//! - at most one fetch in flight per `(object key, version)`; later callers join it
//! - persisted PENDING / RUNNING / COMPLETED / FAILED state
//! - a startup sweep that purges downloads abandoned by a crash

mod coordinator;
mod types;

pub use coordinator::{DownloadCoordinator, SweepReport};
pub use types::{DownloadError, DownloadState};
