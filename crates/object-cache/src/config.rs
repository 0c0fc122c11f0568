//! Cache configuration

use std::path::PathBuf;

const DEFAULT_DIR_NAME: &str = "object-cache";
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Configuration shared by every cache created from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Root directory; each cache name gets its own subdirectory
    pub root_dir: PathBuf,
    /// Timeout applied to remote fetches
    pub fetch_timeout_secs: u64,
}

impl CacheConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from `CACHE_DIR` and `FETCH_TIMEOUT_SECS`
    pub fn from_env() -> Self {
        let root_dir = std::env::var("CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_root_dir());

        let fetch_timeout_secs = std::env::var("FETCH_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS);

        Self {
            root_dir,
            fetch_timeout_secs,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
        }
    }
}

fn default_root_dir() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_DIR_NAME)
}
