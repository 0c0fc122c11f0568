//! Two-tier object cache: memory in front of per-name disk storage

use crate::config::CacheConfig;
use crate::disk::DiskStore;
use crate::error::{CacheError, Result};
use crate::memory::{MemoryEntry, MemoryStore};
use crate::types::{CacheStats, DiskEntry};
use bytes::Bytes;
use std::any::Any;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct Inner {
    name: String,
    memory: MemoryStore,
    disk: DiskStore,
    /// Serializes mutations end to end so the memory and disk tiers agree on
    /// the last writer. Held across disk I/O; readers never take it.
    write_lock: Mutex<()>,
    /// Guards memory-tier transitions that must observe `epoch`. Never held
    /// across disk I/O.
    memory_lock: Mutex<()>,
    /// Bumped by every mutation; disk reads only promote if it is unchanged
    epoch: AtomicU64,
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
}

/// A named cache instance.
///
/// Cloning is cheap and clones share the memory tier and statistics. Separate
/// instances created with the same name share only the disk directory.
#[derive(Clone)]
pub struct ObjectCache {
    inner: Arc<Inner>,
}

impl ObjectCache {
    /// Create a cache named `name` rooted at `config.root_dir`.
    ///
    /// Nothing is touched on disk until the first write.
    pub fn new(name: &str, config: &CacheConfig) -> Result<Self> {
        let disk = DiskStore::new(&config.root_dir, name)?;
        Ok(Self::with_disk(name, disk))
    }

    pub(crate) fn with_disk(name: &str, disk: DiskStore) -> Self {
        info!(cache = %name, dir = ?disk.dir(), "Cache created");

        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                memory: MemoryStore::new(),
                disk,
                write_lock: Mutex::new(()),
                memory_lock: Mutex::new(()),
                epoch: AtomicU64::new(0),
                memory_hits: AtomicU64::new(0),
                disk_hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        }
    }

    /// Name this cache was created with
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Directory holding this cache's files
    pub fn dir(&self) -> PathBuf {
        self.inner.disk.dir().to_path_buf()
    }

    /// True if both handles refer to the same instance (shared memory tier)
    pub fn same_instance(&self, other: &ObjectCache) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Look up `key`, checking memory before disk. A disk hit is promoted to
    /// memory. Disk read failures are logged and reported as a miss.
    pub fn object_for_key(&self, key: &str) -> Option<Bytes> {
        self.entry_for_key(key).map(|entry| entry.bytes)
    }

    /// Like [`object_for_key`](Self::object_for_key), reading disk through
    /// `tokio::fs`.
    pub async fn object_for_key_async(&self, key: &str) -> Option<Bytes> {
        self.entry_for_key_async(key).await.map(|entry| entry.bytes)
    }

    /// Resolve `key` on a spawned task and hand the result to `callback`.
    ///
    /// The memory tier is consulted before returning, so a value set earlier
    /// on the calling thread is always observed. The callback itself never
    /// runs on the caller's stack. Must be called within a tokio runtime.
    pub fn object_for_key_with<F>(&self, key: &str, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Option<Bytes>) + Send + 'static,
    {
        let cached = self.memory_hit(key);
        let cache = self.clone();
        let key = key.to_string();

        tokio::spawn(async move {
            let value = match cached {
                Some(entry) => Some(entry.bytes),
                None => cache.object_for_key_async(&key).await,
            };
            callback(value);
        })
    }

    /// True if `key` is in memory or has a file on disk. File contents are
    /// never read.
    pub fn object_exists_for_key(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }
        self.inner.memory.contains(key) || self.inner.disk.exists(key)
    }

    /// Like [`object_exists_for_key`](Self::object_exists_for_key), checking
    /// disk through `tokio::fs`
    pub async fn object_exists_for_key_async(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }
        self.inner.memory.contains(key) || self.inner.disk.exists_async(key).await
    }

    /// Store `value` under `key` in both tiers.
    ///
    /// The memory tier is updated before the disk write starts. If the disk
    /// write fails the error is returned but the memory value stays in place.
    pub fn set_object(&self, value: impl Into<Bytes>, key: &str) -> Result<()> {
        validate_key(key)?;
        self.store_entry(key, MemoryEntry::raw(value.into()))
    }

    /// Like [`set_object`](Self::set_object) with the disk write on the
    /// blocking pool.
    pub async fn set_object_async(&self, value: impl Into<Bytes>, key: &str) -> Result<()> {
        validate_key(key)?;
        let cache = self.clone();
        let key = key.to_string();
        let entry = MemoryEntry::raw(value.into());

        tokio::task::spawn_blocking(move || cache.store_entry(&key, entry)).await?
    }

    /// Remove `key` from both tiers. Absent keys are not an error.
    pub fn remove_object_for_key(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Ok(());
        }

        let _guard = lock(&self.inner.write_lock);
        self.evict(key);
        let removed = self.inner.disk.remove(key);
        // Drop anything a reader promoted from the file before it was deleted
        self.evict(key);
        removed.map_err(|e| {
            warn!(cache = %self.inner.name, key, error = %e, "Failed to remove cache file");
            e
        })?;

        debug!(cache = %self.inner.name, key, "Removed object");
        Ok(())
    }

    /// Clear the memory tier and delete this cache's directory
    pub fn remove_all_objects(&self) -> Result<()> {
        let _guard = lock(&self.inner.write_lock);
        self.evict_all();
        let removed = self.inner.disk.remove_all();
        self.evict_all();
        removed.map_err(|e| {
            warn!(cache = %self.inner.name, error = %e, "Failed to remove cache directory");
            e
        })?;

        info!(cache = %self.inner.name, "Removed all objects");
        Ok(())
    }

    /// Disk path for `key`, only if the file currently exists
    pub fn path_for_key(&self, key: &str) -> Option<PathBuf> {
        if key.is_empty() || !self.inner.disk.exists(key) {
            return None;
        }
        Some(self.inner.disk.path_for(key))
    }

    /// Size and modification time of the disk entry for `key`
    pub fn entry_info(&self, key: &str) -> Result<Option<DiskEntry>> {
        if key.is_empty() {
            return Ok(None);
        }
        self.inner.disk.entry_info(key)
    }

    /// Entry count and hit/miss counters since this instance was created
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_entries: self.inner.memory.len(),
            memory_hits: self.inner.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.inner.disk_hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn entry_for_key(&self, key: &str) -> Option<MemoryEntry> {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        if let Some(entry) = self.memory_hit(key) {
            return Some(entry);
        }
        if key.is_empty() {
            return None;
        }

        let read = self.inner.disk.read(key);
        self.finish_disk_read(key, read, epoch)
    }

    pub(crate) async fn entry_for_key_async(&self, key: &str) -> Option<MemoryEntry> {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        if let Some(entry) = self.memory_hit(key) {
            return Some(entry);
        }
        if key.is_empty() {
            return None;
        }

        let read = self.inner.disk.read_async(key).await;
        self.finish_disk_read(key, read, epoch)
    }

    /// Write `entry` to memory, then persist its bytes
    pub(crate) fn store_entry(&self, key: &str, entry: MemoryEntry) -> Result<()> {
        let _guard = lock(&self.inner.write_lock);
        {
            let _memory = lock(&self.inner.memory_lock);
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            self.inner.memory.set(key, entry.clone());
        }

        self.inner.disk.write(key, &entry.bytes).map_err(|e| {
            warn!(cache = %self.inner.name, key, error = %e, "Failed to persist object");
            e
        })?;

        debug!(cache = %self.inner.name, key, size = entry.bytes.len(), "Stored object");
        Ok(())
    }

    /// Attach a decoded object to the memory entry for `key`, provided the
    /// entry still holds the buffer the object was decoded from.
    pub(crate) fn attach_object(
        &self,
        key: &str,
        bytes: &Bytes,
        object: Arc<dyn Any + Send + Sync>,
    ) {
        let _guard = lock(&self.inner.memory_lock);
        let current = match self.inner.memory.get(key) {
            Some(entry) => entry,
            None => return,
        };

        if same_buffer(&current.bytes, bytes) {
            self.inner
                .memory
                .set(key, MemoryEntry::with_object(current.bytes, object));
        }
    }

    fn memory_hit(&self, key: &str) -> Option<MemoryEntry> {
        let entry = self.inner.memory.get(key)?;
        self.inner.memory_hits.fetch_add(1, Ordering::Relaxed);
        debug!(cache = %self.inner.name, key, "Memory hit");
        Some(entry)
    }

    fn finish_disk_read(
        &self,
        key: &str,
        read: Result<Option<Vec<u8>>>,
        epoch: u64,
    ) -> Option<MemoryEntry> {
        let data = match read {
            Ok(Some(data)) => Bytes::from(data),
            Ok(None) => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                debug!(cache = %self.inner.name, key, "Cache miss");
                return None;
            }
            Err(e) => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                warn!(
                    cache = %self.inner.name,
                    key,
                    error = %e,
                    "Failed to read cache file, treating as miss"
                );
                return None;
            }
        };

        self.inner.disk_hits.fetch_add(1, Ordering::Relaxed);
        debug!(cache = %self.inner.name, key, size = data.len(), "Disk hit");

        let _guard = lock(&self.inner.memory_lock);
        if let Some(current) = self.inner.memory.get(key) {
            return Some(current);
        }
        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            // Removed while the file was being read; serve it without promoting
            return Some(MemoryEntry::raw(data));
        }

        let entry = MemoryEntry::raw(data);
        self.inner.memory.set(key, entry.clone());
        Some(entry)
    }

    fn evict(&self, key: &str) {
        let _guard = lock(&self.inner.memory_lock);
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.memory.remove(key);
    }

    fn evict_all(&self) {
        let _guard = lock(&self.inner.memory_lock);
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.memory.remove_all();
    }
}

fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl std::fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCache")
            .field("name", &self.inner.name)
            .field("dir", &self.inner.disk.dir())
            .finish()
    }
}

pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey("key must not be empty".to_string()));
    }
    Ok(())
}

fn same_buffer(a: &Bytes, b: &Bytes) -> bool {
    a.as_ptr() == b.as_ptr() && a.len() == b.len()
}
