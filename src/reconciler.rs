//! Version reconciliation
//!
//! Decides whether the cached version of an object can be served as is,
//! must be revalidated against the remote store, or has to be fetched.

use crate::artifacts::{extension_of, ArtifactStore, LocalArtifact};
use crate::clock::{is_expired, Clock};
use crate::config::CacheConfig;
use crate::db::records::{object_record_key, read_record, write_record};
use crate::db::{ObjectVersionRecord, RecordStore};
use crate::download::DownloadCoordinator;
use crate::error::{RemoteError, ResolveError};
use crate::providers::RemoteStore;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

pub struct VersionReconciler {
    records: Arc<dyn RecordStore>,
    artifacts: Arc<ArtifactStore>,
    downloads: Arc<DownloadCoordinator>,
    remote: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    freshness_window: Duration,
    serve_stale_on_error: bool,
}

impl VersionReconciler {
    pub fn new(
        records: Arc<dyn RecordStore>,
        artifacts: Arc<ArtifactStore>,
        downloads: Arc<DownloadCoordinator>,
        remote: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            records,
            artifacts,
            downloads,
            remote,
            clock,
            freshness_window: config.freshness_window(),
            serve_stale_on_error: config.serve_stale_on_error,
        }
    }

    /// Resolve `object_key` to a local artifact.
    ///
    /// A record whose artifact vanished from disk is dropped and the key is
    /// resolved once more from scratch.
    pub async fn resolve(&self, object_key: &str) -> Result<LocalArtifact, ResolveError> {
        if let Some(artifact) = self.reconcile(object_key).await? {
            return Ok(artifact);
        }

        self.forget_version(object_key)?;
        match self.reconcile(object_key).await? {
            Some(artifact) => Ok(artifact),
            None => Err(ResolveError::Artifact(format!(
                "artifact for {} disappeared after download",
                object_key
            ))),
        }
    }

    /// `Ok(None)` when the record points at an artifact that is not on disk.
    async fn reconcile(&self, object_key: &str) -> Result<Option<LocalArtifact>, ResolveError> {
        let key = object_record_key(object_key);
        let Some(record) = read_record::<ObjectVersionRecord>(self.records.as_ref(), &key)? else {
            debug!("cache_miss: {}", object_key);
            let latest = self
                .remote
                .latest_version(object_key)
                .await
                .map_err(|e| ResolveError::from_remote(object_key, e))?;
            return self.fetch(object_key, &latest.version_id).await.map(Some);
        };

        let cached = LocalArtifact {
            object_key: object_key.to_string(),
            path: self
                .artifacts
                .path_for(&record.version_id, &extension_of(object_key)),
            version_id: record.version_id,
        };
        if !self.artifacts.exists(&cached.path) {
            warn!(
                "artifact_missing: {} version={} at {}",
                object_key,
                cached.version_id,
                cached.path.display()
            );
            return Ok(None);
        }

        if !is_expired(self.clock.now_millis(), record.last_update, self.freshness_window) {
            debug!("cache_fresh: {} version={}", object_key, cached.version_id);
            self.touch(&cached)?;
            return Ok(Some(cached));
        }

        match self.remote.latest_version(object_key).await {
            Ok(latest) if latest.version_id == cached.version_id => {
                debug!("cache_revalidated: {} version={}", object_key, cached.version_id);
                self.touch(&cached)?;
                Ok(Some(cached))
            }
            Ok(latest) => {
                info!(
                    "version_changed: {} {} -> {}",
                    object_key, cached.version_id, latest.version_id
                );
                self.fetch(object_key, &latest.version_id).await.map(Some)
            }
            Err(RemoteError::Transport(reason)) if self.serve_stale_on_error => {
                warn!(
                    "revalidate_failed: {} serving stale version={}: {}",
                    object_key, cached.version_id, reason
                );
                Ok(Some(cached))
            }
            Err(e) => Err(ResolveError::from_remote(object_key, e)),
        }
    }

    async fn fetch(&self, object_key: &str, version_id: &str) -> Result<LocalArtifact, ResolveError> {
        Ok(self.downloads.fetch(object_key, version_id).await?)
    }

    /// Slide the freshness window forward.
    fn touch(&self, artifact: &LocalArtifact) -> Result<(), ResolveError> {
        let record = ObjectVersionRecord {
            object_key: artifact.object_key.clone(),
            version_id: artifact.version_id.clone(),
            last_update: self.clock.now_millis(),
        };
        write_record(
            self.records.as_ref(),
            &object_record_key(&artifact.object_key),
            &record,
        )?;
        Ok(())
    }

    fn forget_version(&self, object_key: &str) -> Result<(), ResolveError> {
        self.records.remove(&object_record_key(object_key))?;
        self.downloads.forget(object_key)?;
        Ok(())
    }
}
