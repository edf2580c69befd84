use super::types::{DownloadError, DownloadState};
use crate::artifacts::{extension_of, ArtifactStore, LocalArtifact};
use crate::clock::Clock;
use crate::db::records::{
    download_record_key, list_records, object_record_key, read_record, write_record,
    DOWNLOAD_PREFIX,
};
use crate::db::{DownloadRecord, ObjectVersionRecord, RecordResult, RecordStore};
use crate::providers::RemoteStore;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type FetchResult = Result<LocalArtifact, DownloadError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;
type FetchKey = (String, String);
type InFlight = Arc<Mutex<HashMap<FetchKey, SharedFetch>>>;

/// Outcome of [`DownloadCoordinator::sweep_abandoned`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// PENDING / RUNNING / FAILED records whose version was purged.
    pub abandoned: usize,
    /// COMPLETED records dropped as no longer needed.
    pub pruned: usize,
}

/// Runs remote fetches, one per `(object key, version)` at a time.
pub struct DownloadCoordinator {
    records: Arc<dyn RecordStore>,
    artifacts: Arc<ArtifactStore>,
    remote: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    in_flight: InFlight,
}

fn lock_in_flight(
    in_flight: &Mutex<HashMap<FetchKey, SharedFetch>>,
) -> MutexGuard<'_, HashMap<FetchKey, SharedFetch>> {
    in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DownloadCoordinator {
    pub fn new(
        records: Arc<dyn RecordStore>,
        artifacts: Arc<ArtifactStore>,
        remote: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            records,
            artifacts,
            remote,
            clock,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Make `version_id` of `object_key` available locally.
    ///
    /// Concurrent calls for the same pair share one fetch and all observe its
    /// result. The fetch runs on its own task, so it completes even when
    /// every caller stops waiting.
    pub async fn fetch(&self, object_key: &str, version_id: &str) -> FetchResult {
        let pair = (object_key.to_string(), version_id.to_string());

        let shared = {
            let mut in_flight = lock_in_flight(&self.in_flight);
            if let Some(existing) = in_flight.get(&pair) {
                debug!("download_join: {} version={}", object_key, version_id);
                existing.clone()
            } else {
                let job = FetchJob {
                    records: self.records.clone(),
                    artifacts: self.artifacts.clone(),
                    remote: self.remote.clone(),
                    clock: self.clock.clone(),
                    object_key: pair.0.clone(),
                    version_id: pair.1.clone(),
                };
                let guard = InFlightGuard {
                    in_flight: self.in_flight.clone(),
                    pair: pair.clone(),
                };
                let handle = tokio::spawn(async move {
                    let _guard = guard;
                    job.run().await
                });

                let error_key = pair.clone();
                let fetch = async move {
                    match handle.await {
                        Ok(result) => result,
                        Err(e) => Err(DownloadError {
                            object_key: error_key.0,
                            version_id: error_key.1,
                            reason: format!("download task failed: {}", e),
                        }),
                    }
                }
                .boxed()
                .shared();

                in_flight.insert(pair, fetch.clone());
                fetch
            }
        };

        shared.await
    }

    /// Number of fetches currently running.
    pub fn in_flight(&self) -> usize {
        lock_in_flight(&self.in_flight).len()
    }

    /// Persisted state of the fetch for one pair, if any record exists.
    pub fn state(&self, object_key: &str, version_id: &str) -> RecordResult<Option<DownloadState>> {
        let record: Option<DownloadRecord> = read_record(
            self.records.as_ref(),
            &download_record_key(object_key, version_id),
        )?;
        Ok(record.map(|r| r.state))
    }

    /// Clean up after a previous process that stopped mid-download.
    ///
    /// Every record not in COMPLETED state has its version's artifact and
    /// its object's version record purged. COMPLETED records are dropped.
    pub fn sweep_abandoned(&self) -> RecordResult<SweepReport> {
        let mut report = SweepReport::default();

        for (record_key, record) in list_records::<DownloadRecord>(self.records.as_ref(), DOWNLOAD_PREFIX)? {
            let pair = (record.object_key.clone(), record.version_id.clone());
            if lock_in_flight(&self.in_flight).contains_key(&pair) {
                continue;
            }

            if record.state == DownloadState::Completed {
                self.records.remove(&record_key)?;
                report.pruned += 1;
                continue;
            }

            warn!(
                "download_sweep: abandoned {} version={} state={}",
                record.object_key, record.version_id, record.state
            );
            purge(
                self.records.as_ref(),
                &self.artifacts,
                &record.object_key,
                &record.version_id,
            );
            self.records.remove(&record_key)?;
            report.abandoned += 1;
        }

        if report.abandoned > 0 || report.pruned > 0 {
            info!(
                "download_sweep: purged {} abandoned, pruned {} completed",
                report.abandoned, report.pruned
            );
        }
        Ok(report)
    }

    /// Drop every download record for `object_key`. In-flight fetches keep
    /// running.
    pub fn forget(&self, object_key: &str) -> RecordResult<usize> {
        let mut removed = 0;
        for (record_key, record) in list_records::<DownloadRecord>(self.records.as_ref(), DOWNLOAD_PREFIX)? {
            if record.object_key == object_key {
                self.records.remove(&record_key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Remove the version record of `object_key` and the artifact of `version_id`.
///
/// Failures are logged: the purge runs on paths that are already reporting
/// an error.
fn purge(records: &dyn RecordStore, artifacts: &ArtifactStore, object_key: &str, version_id: &str) {
    if let Err(e) = records.remove(&object_record_key(object_key)) {
        error!("download_purge: record for {} not removed: {}", object_key, e);
    }
    let path = artifacts.path_for(version_id, &extension_of(object_key));
    if let Err(e) = artifacts.remove(&path) {
        error!("download_purge: artifact {} not removed: {}", path.display(), e);
    }
}

/// Drops the in-flight entry when the fetch task ends, including by panic.
struct InFlightGuard {
    in_flight: InFlight,
    pair: FetchKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock_in_flight(&self.in_flight).remove(&self.pair);
    }
}

struct FetchJob {
    records: Arc<dyn RecordStore>,
    artifacts: Arc<ArtifactStore>,
    remote: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    object_key: String,
    version_id: String,
}

impl FetchJob {
    async fn run(self) -> FetchResult {
        let started_at = self.clock.now_millis();
        match self.download(started_at).await {
            Ok(artifact) => Ok(artifact),
            Err(reason) => {
                self.fail(started_at, &reason);
                Err(DownloadError {
                    object_key: self.object_key,
                    version_id: self.version_id,
                    reason,
                })
            }
        }
    }

    async fn download(&self, started_at: i64) -> Result<LocalArtifact, String> {
        self.set_state(started_at, DownloadState::Pending)?;

        let extension = extension_of(&self.object_key);
        let existing = self.artifacts.path_for(&self.version_id, &extension);

        let path = if self.artifacts.exists(&existing) {
            debug!(
                "download_reuse: {} version={} already on disk",
                self.object_key, self.version_id
            );
            existing
        } else {
            self.set_state(started_at, DownloadState::Running)?;
            info!("download_start: {} version={}", self.object_key, self.version_id);

            let body = self
                .remote
                .get_object(&self.object_key, &self.version_id)
                .await
                .map_err(|e| e.to_string())?;
            self.artifacts
                .write(&self.version_id, &extension, body)
                .await
                .map_err(|e| e.to_string())?
        };

        let record = ObjectVersionRecord {
            object_key: self.object_key.clone(),
            version_id: self.version_id.clone(),
            last_update: self.clock.now_millis(),
        };
        write_record(self.records.as_ref(), &object_record_key(&self.object_key), &record)
            .map_err(|e| e.to_string())?;
        self.set_state(started_at, DownloadState::Completed)?;

        info!("download_complete: {} version={}", self.object_key, self.version_id);
        Ok(LocalArtifact {
            object_key: self.object_key.clone(),
            version_id: self.version_id.clone(),
            path,
        })
    }

    /// Persist FAILED, purge, then drop the record. A crash part-way leaves
    /// a FAILED record for the startup sweep to finish.
    fn fail(&self, started_at: i64, reason: &str) {
        error!(
            "download_failed: {} version={}: {}",
            self.object_key, self.version_id, reason
        );
        if let Err(e) = self.set_state(started_at, DownloadState::Failed) {
            warn!("download_failed: state not persisted: {}", e);
        }
        purge(
            self.records.as_ref(),
            &self.artifacts,
            &self.object_key,
            &self.version_id,
        );
        let record_key = download_record_key(&self.object_key, &self.version_id);
        if let Err(e) = self.records.remove(&record_key) {
            warn!("download_failed: record {} not removed: {}", record_key, e);
        }
    }

    fn set_state(&self, started_at: i64, state: DownloadState) -> Result<(), String> {
        let record = DownloadRecord {
            object_key: self.object_key.clone(),
            version_id: self.version_id.clone(),
            started_at,
            state,
        };
        debug!(
            "download_state: {} version={} -> {}",
            self.object_key, self.version_id, state
        );
        write_record(
            self.records.as_ref(),
            &download_record_key(&self.object_key, &self.version_id),
            &record,
        )
        .map_err(|e| e.to_string())
    }
}
