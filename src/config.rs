//! Cache configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Folder (relative to the host's data dir) holding downloaded artifacts
pub const CACHE_FOLDER: &str = "s3_cache";

/// Records older than this are revalidated against the remote store (1 hour)
pub const DEFAULT_FRESHNESS_WINDOW_SECS: u64 = 60 * 60;

/// Signed URLs are served from cache for at most this long (7 days)
pub const DEFAULT_SIGNED_URL_TTL_SECS: u64 = 60 * 60 * 24 * 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub cache_dir: PathBuf,
    pub database_path: PathBuf,
    pub freshness_window_secs: u64,
    pub signed_url_ttl_secs: u64,
    /// Serve the existing artifact when a stale record cannot be revalidated
    /// because the remote store is unreachable.
    pub serve_stale_on_error: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            cache_dir: PathBuf::from(CACHE_FOLDER),
            database_path: PathBuf::from("s3-link.db"),
            freshness_window_secs: DEFAULT_FRESHNESS_WINDOW_SECS,
            signed_url_ttl_secs: DEFAULT_SIGNED_URL_TTL_SECS,
            serve_stale_on_error: true,
        }
    }
}

impl CacheConfig {
    /// Config rooted at `base`: artifacts in `base/s3_cache`, records in `base/s3-link.db`.
    pub fn with_base_dir(base: &Path) -> Self {
        CacheConfig {
            cache_dir: base.join(CACHE_FOLDER),
            database_path: base.join("s3-link.db"),
            ..CacheConfig::default()
        }
    }

    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CacheConfig::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_window_secs)
    }

    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"freshnessWindowSecs": 10, "cacheDir": "/tmp/x"}"#).unwrap();
        assert_eq!(config.freshness_window(), Duration::from_secs(10));
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/x"));
        assert_eq!(config.signed_url_ttl_secs, DEFAULT_SIGNED_URL_TTL_SECS);
        assert!(config.serve_stale_on_error);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.freshness_window_secs, DEFAULT_FRESHNESS_WINDOW_SECS);
    }

    #[test]
    fn load_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(CacheConfig::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn base_dir_layout() {
        let config = CacheConfig::with_base_dir(Path::new("/data"));
        assert_eq!(config.cache_dir, PathBuf::from("/data/s3_cache"));
        assert_eq!(config.database_path, PathBuf::from("/data/s3-link.db"));
    }
}
