//! Object cache facade
//!
//! Wires the record store, artifact store, download coordinator, version
//! reconciler and signed-URL cache into one instance. A process that owns
//! the cache creates exactly one [`ObjectCache`] and shares it.

use crate::artifacts::{extension_of, ArtifactStore, LocalArtifact};
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::db::records::{object_record_key, read_record, NAMESPACE};
use crate::db::{ObjectVersionRecord, RecordStore, SqliteRecordStore};
use crate::download::DownloadCoordinator;
use crate::error::{OpenError, ResolveError};
use crate::providers::{RemoteStore, S3RemoteStore, S3Settings};
use crate::reconciler::VersionReconciler;
use crate::resolver::{Resolution, ResolveRequests};
use crate::signed::SignedUrlCache;
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

pub struct ObjectCache {
    config: CacheConfig,
    records: Arc<dyn RecordStore>,
    artifacts: Arc<ArtifactStore>,
    remote: Arc<dyn RemoteStore>,
    downloads: Arc<DownloadCoordinator>,
    reconciler: VersionReconciler,
    signed: SignedUrlCache,
}

impl ObjectCache {
    /// Prepare the cache folder, sweep downloads abandoned by a previous
    /// run, and return a ready cache.
    pub fn open(
        config: CacheConfig,
        records: Arc<dyn RecordStore>,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<Self, OpenError> {
        Self::open_with_clock(config, records, remote, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        config: CacheConfig,
        records: Arc<dyn RecordStore>,
        remote: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, OpenError> {
        let artifacts = Arc::new(ArtifactStore::new(config.cache_dir.clone()));
        artifacts.init()?;

        let downloads = Arc::new(DownloadCoordinator::new(
            records.clone(),
            artifacts.clone(),
            remote.clone(),
            clock.clone(),
        ));
        downloads.sweep_abandoned()?;

        let reconciler = VersionReconciler::new(
            records.clone(),
            artifacts.clone(),
            downloads.clone(),
            remote.clone(),
            clock.clone(),
            &config,
        );
        let signed = SignedUrlCache::new(records.clone(), clock, config.signed_url_ttl());

        info!("object_cache_open: artifacts in {}", config.cache_dir.display());
        Ok(Self {
            config,
            records,
            artifacts,
            remote,
            downloads,
            reconciler,
            signed,
        })
    }

    /// Open with a SQLite record store at `config.database_path` and an S3
    /// remote built from `settings`.
    pub async fn connect(config: CacheConfig, settings: &S3Settings) -> Result<Self, OpenError> {
        let records = Arc::new(SqliteRecordStore::open(&config.database_path)?);
        let remote = Arc::new(S3RemoteStore::connect(settings).await?);
        Self::open(config, records, remote)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn downloads(&self) -> &DownloadCoordinator {
        &self.downloads
    }

    /// Artifact writes currently in progress.
    pub fn open_writes(&self) -> Vec<PathBuf> {
        self.artifacts.list_open_writes()
    }

    pub async fn resolve(&self, object_key: &str) -> Result<LocalArtifact, ResolveError> {
        self.reconciler.resolve(object_key).await
    }

    /// Signed URL for `object_key`, from cache while it is within its TTL.
    ///
    /// A new URL is only issued after the remote store confirms the object
    /// exists.
    pub async fn resolve_signed(&self, object_key: &str) -> Result<String, ResolveError> {
        if let Some(url) = self.signed.find(object_key)? {
            debug!("signed_url_hit: {}", object_key);
            return Ok(url);
        }

        self.remote
            .latest_version(object_key)
            .await
            .map_err(|e| ResolveError::from_remote(object_key, e))?;
        let url = self
            .remote
            .signed_url(object_key, self.signed.ttl())
            .await
            .map_err(|e| ResolveError::from_remote(object_key, e))?;

        self.signed.write(object_key, &url)?;
        debug!("signed_url_issued: {}", object_key);
        Ok(url)
    }

    /// Resolve every key in `requests` concurrently.
    ///
    /// `notify` runs once per key and request class, in completion order,
    /// with the elements that referenced the key. Returns the number of
    /// failed keys.
    pub async fn resolve_requests<E, F>(&self, requests: ResolveRequests<E>, mut notify: F) -> usize
    where
        E: Send,
        F: FnMut(&str, Vec<E>, Resolution),
    {
        let (direct, signed) = requests.into_parts();
        let mut pending: FuturesUnordered<BoxFuture<'_, (String, Vec<E>, Resolution)>> =
            FuturesUnordered::new();

        for (object_key, elements) in direct {
            pending.push(
                async move {
                    let resolution = match self.resolve(&object_key).await {
                        Ok(artifact) => Resolution::Local(artifact),
                        Err(e) => Resolution::Failed(e),
                    };
                    (object_key, elements, resolution)
                }
                .boxed(),
            );
        }
        for (object_key, elements) in signed {
            pending.push(
                async move {
                    let resolution = match self.resolve_signed(&object_key).await {
                        Ok(url) => Resolution::Signed(url),
                        Err(e) => Resolution::Failed(e),
                    };
                    (object_key, elements, resolution)
                }
                .boxed(),
            );
        }

        let mut failures = 0;
        while let Some((object_key, elements, resolution)) = pending.next().await {
            if let Resolution::Failed(e) = &resolution {
                warn!("resolve_failed: {}: {}", object_key, e);
                failures += 1;
            }
            notify(&object_key, elements, resolution);
        }
        failures
    }

    /// Forget everything cached for `object_key`: version record, signed
    /// URL, download records and the artifact of the recorded version.
    /// Fetches already in flight are not cancelled.
    pub fn invalidate(&self, object_key: &str) -> Result<(), ResolveError> {
        let key = object_record_key(object_key);
        if let Some(record) = read_record::<ObjectVersionRecord>(self.records.as_ref(), &key)? {
            let path = self
                .artifacts
                .path_for(&record.version_id, &extension_of(object_key));
            self.artifacts.remove(&path)?;
        }
        self.records.remove(&key)?;
        self.signed.remove(object_key)?;
        self.downloads.forget(object_key)?;
        info!("cache_invalidate: {}", object_key);
        Ok(())
    }

    /// Invalidate each key in turn, e.g. every object referenced by one
    /// document.
    pub fn invalidate_many<I, S>(&self, object_keys: I) -> Result<usize, ResolveError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut count = 0;
        for object_key in object_keys {
            self.invalidate(object_key.as_ref())?;
            count += 1;
        }
        Ok(count)
    }

    /// Drop every record and every artifact.
    pub fn clear_all(&self) -> Result<(), ResolveError> {
        let records = self.records.remove_by_prefix(&format!("{}/", NAMESPACE))?;
        let artifacts = self.artifacts.remove_all()?;
        info!(
            "cache_clear_all: removed {} records, {} artifacts",
            records, artifacts
        );
        Ok(())
    }

    /// Abort open artifact writes and refuse new ones. Returns how many
    /// writes were aborted.
    pub fn shutdown(&self) -> usize {
        let aborted = self.artifacts.close();
        info!("object_cache_shutdown: aborted {} open writes", aborted);
        aborted
    }
}
