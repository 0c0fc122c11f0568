//! Cache types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Metadata for a file in the disk tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskEntry {
    pub path: PathBuf,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

/// Statistics about a cache instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub memory_entries: u64,
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
}
