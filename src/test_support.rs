//! In-memory remote store for unit tests

use crate::artifacts::ByteStream;
use crate::error::RemoteError;
use crate::providers::{ObjectVersion, RemoteStore};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

/// Holds every download body until opened (or dropped).
pub(crate) struct DownloadGate {
    open: watch::Sender<bool>,
}

impl DownloadGate {
    pub(crate) fn open(&self) {
        let _ = self.open.send(true);
    }
}

#[derive(Default)]
pub(crate) struct FakeRemote {
    /// key -> (version, body), newest first
    objects: Mutex<HashMap<String, Vec<(String, Vec<u8>)>>>,
    gate: Mutex<Option<watch::Receiver<bool>>>,
    fail_transport: AtomicBool,
    fail_streams: AtomicBool,
    fail_signing: AtomicBool,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
    sign_calls: AtomicUsize,
}

impl FakeRemote {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Publish a new latest version of `key`.
    pub(crate) fn put_version(&self, key: &str, version_id: &str, body: &[u8]) {
        let mut objects = self.objects.lock().unwrap();
        objects
            .entry(key.to_string())
            .or_default()
            .insert(0, (version_id.to_string(), body.to_vec()));
    }

    /// Drop every version of `key`, as if it were deleted remotely.
    pub(crate) fn remove_object(&self, key: &str) {
        self.objects.lock().unwrap().remove(key);
    }

    /// Make listing and fetching fail with a transport error.
    pub(crate) fn fail_transport(&self, fail: bool) {
        self.fail_transport.store(fail, Ordering::SeqCst);
    }

    /// Make download bodies break after their first chunk.
    pub(crate) fn fail_streams(&self, fail: bool) {
        self.fail_streams.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_signing(&self, fail: bool) {
        self.fail_signing.store(fail, Ordering::SeqCst);
    }

    /// Bodies returned from now on wait for the gate to open.
    pub(crate) fn hold_downloads(&self) -> DownloadGate {
        let (open, rx) = watch::channel(false);
        *self.gate.lock().unwrap() = Some(rx);
        DownloadGate { open }
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }

    fn check_transport(&self) -> Result<(), RemoteError> {
        if self.fail_transport.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn list_versions(&self, key: &str) -> Result<Vec<ObjectVersion>, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_transport()?;
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .get(key)
            .map(|versions| {
                versions
                    .iter()
                    .map(|(version_id, _)| ObjectVersion {
                        version_id: version_id.clone(),
                        last_modified: None,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_object(&self, key: &str, version_id: &str) -> Result<ByteStream, RemoteError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check_transport()?;
        let body = {
            let objects = self.objects.lock().unwrap();
            objects
                .get(key)
                .and_then(|versions| versions.iter().find(|(v, _)| v == version_id))
                .map(|(_, body)| body.clone())
                .ok_or_else(|| RemoteError::NotFound(key.to_string()))?
        };
        let gate = self.gate.lock().unwrap().clone();
        let broken = self.fail_streams.load(Ordering::SeqCst);

        let first = stream::once(async move {
            if let Some(mut gate) = gate {
                let _opened = gate.wait_for(|open| *open).await.is_ok();
            }
            Ok::<Bytes, io::Error>(Bytes::from(body))
        });
        if broken {
            let failure = stream::once(async {
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"))
            });
            Ok(first.chain(failure).boxed())
        } else {
            Ok(first.boxed())
        }
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, RemoteError> {
        let n = self.sign_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_signing.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport("signing failed".to_string()));
        }
        Ok(format!(
            "https://fake.remote/{}?expires={}&sig={}",
            key,
            ttl.as_secs(),
            n
        ))
    }
}
