//! File-backed disk tier
//!
//! Every cache name owns one directory under the root. Each key is stored in a
//! single file named by the hex SHA-256 of the key, holding the raw bytes with
//! no framing. Writes go through a temporary file in the same directory that is
//! renamed over the target, so readers never observe a partial file.

use crate::error::{CacheError, Result};
use crate::types::DiskEntry;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const TEMP_PREFIX: &str = ".tmp-";

/// Disk view of a single cache name
#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    /// Create a store for `name` under `root`. No I/O is performed.
    pub fn new(root: impl AsRef<Path>, name: &str) -> Result<Self> {
        validate_name(name)?;
        Ok(Self::new_unchecked(root, name))
    }

    /// For names known to be a single path component
    pub(crate) fn new_unchecked(root: impl AsRef<Path>, name: &str) -> Self {
        Self {
            dir: root.as_ref().join(name),
        }
    }

    /// Directory holding this cache's files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name for a key (hex SHA-256)
    pub fn file_name(key: &str) -> String {
        hex::encode(Sha256::digest(key.as_bytes()))
    }

    /// Path a key is stored at, whether or not it exists
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(Self::file_name(key))
    }

    /// Read a key's bytes, `None` if there is no file
    pub fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.path_for(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn read_async(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replace the file for `key` with `data`
    pub fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let path = self.path_for(key);
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.dir)?;
        tmp.write_all(data)?;
        tmp.flush()?;
        tmp.persist(&path)?;

        debug!(path = ?path, size = data.len(), "Wrote cache file");
        Ok(())
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }

    pub async fn exists_async(&self, key: &str) -> bool {
        match tokio::fs::metadata(self.path_for(key)).await {
            Ok(meta) => meta.is_file(),
            Err(_) => false,
        }
    }

    /// Remove the file for `key`; missing files are not an error
    pub fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Delete the whole directory; it is recreated on the next write
    pub fn remove_all(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.dir) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Size and modification time of the file for `key`
    pub fn entry_info(&self, key: &str) -> Result<Option<DiskEntry>> {
        let path = self.path_for(key);
        let meta = match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let modified_at: DateTime<Utc> = meta.modified()?.into();
        Ok(Some(DiskEntry {
            path,
            size: meta.len(),
            modified_at,
        }))
    }
}

/// A cache name must be usable as exactly one directory component
fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);

    if invalid {
        return Err(CacheError::InvalidName(name.to_string()));
    }
    Ok(())
}
