//! Artifact store - downloaded object bytes on disk
//!
//! Artifacts live at `<root>/<version><extension>`. The path depends only on
//! the version and extension, so repeated or concurrent downloads of one
//! version converge on one file. Bytes are streamed into `<root>/.partial/`
//! and renamed into place after a full flush; a file at the final path is
//! therefore always complete.

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Stream of object bytes as produced by a remote store.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Write buffer size (1 MB) - reduces I/O operations
const WRITE_BUFFER_SIZE: usize = 1024 * 1024;

const PARTIAL_DIR: &str = ".partial";

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("source stream failed: {0}")]
    Stream(String),

    #[error("write to {0} was aborted")]
    Aborted(PathBuf),

    #[error("artifact store is shut down")]
    Closed,
}

/// A resolved object version available on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArtifact {
    pub object_key: String,
    pub version_id: String,
    pub path: PathBuf,
}

struct OpenWrite {
    target: PathBuf,
    partial: PathBuf,
    cancel: CancellationToken,
}

pub struct ArtifactStore {
    root: PathBuf,
    open_writes: Mutex<HashMap<u64, OpenWrite>>,
    next_write_id: AtomicU64,
    closed: AtomicBool,
}

/// File extension of an object key including the leading dot, or `""`.
pub fn extension_of(object_key: &str) -> String {
    let name = object_key.rsplit('/').next().unwrap_or(object_key);
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => name[idx..].to_string(),
        _ => String::new(),
    }
}

fn sanitize_version(version_id: &str) -> String {
    let sanitized: String = version_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    // "", "." and ".." would name the root or its parent
    if sanitized.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        sanitized
    }
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            open_writes: Mutex::new(HashMap::new()),
            next_write_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the cache folder and drop partial files left by a previous run.
    pub fn init(&self) -> Result<(), ArtifactError> {
        if self.root.exists() {
            debug!("artifact_store_init: {} already present", self.root.display());
        } else {
            info!("artifact_store_init: creating {}", self.root.display());
        }
        std::fs::create_dir_all(&self.root)?;

        let partial_dir = self.root.join(PARTIAL_DIR);
        if partial_dir.exists() {
            let removed = remove_files_in(&partial_dir)?;
            if removed > 0 {
                info!("artifact_store_init: removed {} partial files", removed);
            }
        }
        Ok(())
    }

    /// Deterministic location of the artifact for `version_id`.
    pub fn path_for(&self, version_id: &str, extension: &str) -> PathBuf {
        self.root
            .join(format!("{}{}", sanitize_version(version_id), extension))
    }

    /// Stream `bytes` to the artifact path for `version_id`.
    ///
    /// When the artifact already exists its path is returned without touching
    /// the stream. On any failure nothing is left at the artifact path.
    pub async fn write(
        &self,
        version_id: &str,
        extension: &str,
        bytes: ByteStream,
    ) -> Result<PathBuf, ArtifactError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ArtifactError::Closed);
        }

        let target = self.path_for(version_id, extension);
        if is_regular_file(&target).await? {
            debug!("artifact_write: {} already cached", target.display());
            return Ok(target);
        }

        let partial_dir = self.root.join(PARTIAL_DIR);
        tokio::fs::create_dir_all(&partial_dir).await?;

        let write_id = self.next_write_id.fetch_add(1, Ordering::SeqCst);
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let partial = partial_dir.join(format!("{}.{}", file_name, write_id));
        let cancel = CancellationToken::new();

        let registration = self.register(write_id, &target, &partial, &cancel)?;

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(ArtifactError::Aborted(target.clone())),
            streamed = stream_to_file(&partial, bytes) => streamed,
        };

        match result {
            Ok(written) => {
                registration.commit()?;
                info!("artifact_write: {} complete ({} bytes)", target.display(), written);
                Ok(target)
            }
            Err(e) => {
                warn!("artifact_write: {} failed: {}", target.display(), e);
                drop(registration);
                Err(e)
            }
        }
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Returns whether a file was removed.
    pub fn remove(&self, path: &Path) -> Result<bool, ArtifactError> {
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!("artifact_remove: {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every artifact in the cache folder.
    pub fn remove_all(&self) -> Result<usize, ArtifactError> {
        if !self.root.exists() {
            warn!("artifact_remove_all: {} does not exist", self.root.display());
            return Ok(0);
        }
        let removed = remove_files_in(&self.root)?;
        info!("artifact_remove_all: removed {} files", removed);
        Ok(removed)
    }

    /// Target paths of writes currently in progress.
    pub fn list_open_writes(&self) -> Vec<PathBuf> {
        let writes = self
            .open_writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writes.values().map(|w| w.target.clone()).collect()
    }

    /// Terminate every in-progress write and discard its partial file.
    ///
    /// An aborted write fails with [`ArtifactError::Aborted`] and never
    /// publishes its file.
    pub fn abort_all(&self) -> usize {
        let aborted: Vec<OpenWrite> = match self.open_writes.lock() {
            Ok(mut writes) => writes.drain().map(|(_, w)| w).collect(),
            Err(poisoned) => poisoned.into_inner().drain().map(|(_, w)| w).collect(),
        };
        for write in &aborted {
            write.cancel.cancel();
            let _ = std::fs::remove_file(&write.partial);
            debug!("artifact_abort: {}", write.target.display());
        }
        if !aborted.is_empty() {
            info!("artifact_abort_all: aborted {} open writes", aborted.len());
        }
        aborted.len()
    }

    /// Abort open writes and refuse new ones.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        self.abort_all()
    }

    fn register(
        &self,
        write_id: u64,
        target: &Path,
        partial: &Path,
        cancel: &CancellationToken,
    ) -> Result<WriteRegistration<'_>, ArtifactError> {
        let mut writes = self.open_writes.lock().map_err(|_| ArtifactError::Closed)?;
        if self.closed.load(Ordering::SeqCst) {
            return Err(ArtifactError::Closed);
        }
        writes.insert(
            write_id,
            OpenWrite {
                target: target.to_path_buf(),
                partial: partial.to_path_buf(),
                cancel: cancel.clone(),
            },
        );
        Ok(WriteRegistration {
            store: self,
            write_id,
            target: target.to_path_buf(),
            partial: partial.to_path_buf(),
            committed: false,
        })
    }
}

/// Entry in the open-write registry. Dropping it without committing
/// deregisters the write and deletes the partial file.
struct WriteRegistration<'a> {
    store: &'a ArtifactStore,
    write_id: u64,
    target: PathBuf,
    partial: PathBuf,
    committed: bool,
}

impl WriteRegistration<'_> {
    /// Publish the partial file at the target path.
    ///
    /// Runs under the registry lock so it cannot interleave with `abort_all`:
    /// either the write is still registered and gets published, or it was
    /// aborted and is reported as such.
    fn commit(mut self) -> Result<(), ArtifactError> {
        let mut writes = self
            .store
            .open_writes
            .lock()
            .map_err(|_| ArtifactError::Aborted(self.target.clone()))?;
        let Some(write) = writes.remove(&self.write_id) else {
            return Err(ArtifactError::Aborted(self.target.clone()));
        };
        if write.cancel.is_cancelled() {
            return Err(ArtifactError::Aborted(self.target.clone()));
        }
        std::fs::rename(&self.partial, &self.target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for WriteRegistration<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Ok(mut writes) = self.store.open_writes.lock() {
            writes.remove(&self.write_id);
        }
        let _ = std::fs::remove_file(&self.partial);
    }
}

async fn stream_to_file(path: &Path, mut bytes: ByteStream) -> Result<u64, ArtifactError> {
    let mut file = File::create(path).await?;
    let mut write_buffer: Vec<u8> = Vec::with_capacity(WRITE_BUFFER_SIZE);
    let mut written: u64 = 0;

    while let Some(chunk) = bytes.next().await {
        let chunk = chunk.map_err(|e| ArtifactError::Stream(e.to_string()))?;
        written += chunk.len() as u64;
        write_buffer.extend_from_slice(&chunk);

        if write_buffer.len() >= WRITE_BUFFER_SIZE {
            file.write_all(&write_buffer).await?;
            write_buffer.clear();
        }
    }

    if !write_buffer.is_empty() {
        file.write_all(&write_buffer).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

async fn is_regular_file(path: &Path) -> io::Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn remove_files_in(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}
